use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Process-unique token linking one outbound request to its replies.
///
/// Correlation ids travel as AMQP message properties, not in the payload,
/// and are opaque to everything except the reply demultiplexer. One id
/// identifies exactly one in-flight request/response exchange; its lifetime
/// runs from publish until the first terminal reply or timeout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh correlation id (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
