//! Wire codec for broker payloads.
//!
//! Every payload crossing the broker is a JSON object compressed with gzip:
//! outbound requests are serialized then compressed, inbound replies are
//! decompressed then deserialized. The codec is independent of transport
//! state; it never touches connections or message metadata.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};

/// Serialize `value` to JSON and gzip the result.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    // ---
    let json = serde_json::to_vec(value)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(Error::Compress)?;
    let compressed = encoder.finish().map_err(Error::Compress)?;

    Ok(Bytes::from(compressed))
}

/// Gunzip `bytes` and deserialize the JSON within.
///
/// Validation is structural: unknown status values or missing required
/// fields fail here, before any field is trusted.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    // ---
    let mut json = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut json)
        .map_err(Error::Decompress)?;

    Ok(serde_json::from_slice(&json)?)
}
