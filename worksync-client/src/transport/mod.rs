//! Transport abstraction for the worksync client.
//!
//! This module provides a pluggable transport layer that abstracts the
//! underlying duplex text-frame connection (WebSocket in production, mock
//! for testing).
//!
//! # Design
//!
//! The transport is async and connection-oriented:
//! - `connect()` establishes (or re-establishes) the one live connection
//! - `send()` transmits an encoded text frame
//! - `recv()` awaits the next inbound text frame
//! - `close()` terminates the current connection
//!
//! A transport never reconnects on its own; the client's supervisor decides
//! when to dial again and drives `connect()` for every attempt.

mod mock;
mod ws;

pub use mock::MockTransport;
pub use ws::WsTransport;

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection attempt failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// No live connection.
    #[error("not connected")]
    NotConnected,

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be sent.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A frame could not be received.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),
}

/// A duplex, ordered, text-frame connection to the file server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the server at the given URL, replacing any prior
    /// connection state.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one text frame over the live connection.
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Await the next inbound text frame.
    ///
    /// Returns [`TransportError::ConnectionClosed`] when the peer hangs up.
    async fn recv(&self) -> Result<String, TransportError>;

    /// Whether a connection is currently live.
    fn is_connected(&self) -> bool;

    /// Close the current connection. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;
}
