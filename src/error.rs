use thiserror::Error;

use crate::CorrelationId;

/// Errors that can occur while submitting jobs or operating the broker link.
#[derive(Error, Debug)]
pub enum Error {
    /// No terminal reply arrived within the operation's time-to-live.
    #[error("{operation} timed out waiting for a reply")]
    Timeout {
        /// Display name of the operation that timed out.
        operation: String,
    },

    /// The broker connection went away and the caller cannot be served.
    #[error("broker connection lost")]
    ConnectionLost,

    /// Reconnection was attempted and exhausted; the connection is dead.
    ///
    /// Surfaced as an error (and as [`ConnectionState::Failed`]) rather than
    /// terminating the process; the hosting application decides what to do.
    ///
    /// [`ConnectionState::Failed`]: crate::ConnectionState::Failed
    #[error("broker connection failed permanently after {attempts} reconnect attempts")]
    Fatal {
        /// Number of reconnect attempts made before giving up.
        attempts: u32,
    },

    /// AMQP client error.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Transport-level failure outside the AMQP client itself.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Gzip compression of an outbound payload failed.
    #[error("failed to compress message")]
    Compress(#[source] std::io::Error),

    /// Gzip decompression of an inbound payload failed.
    #[error("failed to decompress message")]
    Decompress(#[source] std::io::Error),

    /// An inbound reply was structurally unusable (missing metadata, empty
    /// result set).
    #[error("invalid reply: {0}")]
    InvalidReply(String),

    /// The caller-supplied job parameters cannot form a request payload.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The downstream worker reported an application-level failure.
    ///
    /// Carries the worker's `errorMessage` verbatim.
    #[error("{0}")]
    Remote(String),

    /// A waiter is already registered under this correlation id.
    #[error("waiter already registered for correlation id {0}")]
    DuplicateCorrelation(CorrelationId),
}

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, Error>;
