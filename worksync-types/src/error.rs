//! Error types for the wire codec.

use thiserror::Error;

/// Errors raised while encoding commands or decoding server events.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A command failed to serialize to a JSON text frame.
    #[error("failed to encode command: {0}")]
    Encode(#[source] serde_json::Error),

    /// An inbound frame was not a valid tagged server event.
    #[error("failed to decode server event: {0}")]
    Decode(#[source] serde_json::Error),

    /// A handle string was not a decimal integer.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}
