//! Client error taxonomy.

use thiserror::Error;

/// Errors surfaced by [`FileSystemClient`](crate::FileSystemClient) operations.
///
/// The variants are cheap to clone because a single connection failure may
/// have to reject several callers awaiting the same attempt.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The peer violated the protocol: an undecodable frame, a terminal
    /// event of the wrong kind, or an error event nobody asked for.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A connection attempt did not produce a usable channel.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// The channel went away while a command was outstanding.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The server answered a command with an `error` event.
    #[error("server error: {message}")]
    Remote {
        /// The server-supplied message, verbatim.
        message: String,
        /// The path involved, when the server reported one.
        path: Option<String>,
    },

    /// The event stream for this file was already taken.
    #[error("event stream already consumed")]
    StreamConsumed,

    /// The file was closed before or during the operation.
    #[error("file is closed")]
    FileClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_send_sync_clone() {
        fn assert_bounds<T: Send + Sync + Clone>() {}
        assert_bounds::<ClientError>();
    }

    #[test]
    fn remote_error_keeps_the_server_message_verbatim() {
        let err = ClientError::Remote {
            message: "File not found: nope.md".into(),
            path: Some("nope.md".into()),
        };
        assert_eq!(err.to_string(), "server error: File not found: nope.md");
    }
}
