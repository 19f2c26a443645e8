//! # worksync-client
//!
//! Client engine for the worksync file synchronization protocol.
//!
//! The engine sits between UI code and a remote file server reached over a
//! persistent duplex text channel (WebSocket in production). It owns:
//!
//! - **Connection lifecycle** with exponential-backoff reconnection and
//!   state reporting ([`FileSystemClient::on_state_change`]).
//! - **Strict FIFO correlation** of commands with terminal server events on
//!   a channel that has no request identifiers.
//! - **Per-handle event streams** delivered lazily ([`FileStream`]).
//! - **Silent re-establishment** of open files after a reconnect, including
//!   suppression of spurious "opened again" events when the server's view
//!   of the content is unchanged.
//!
//! ## Example
//!
//! ```ignore
//! use worksync_client::{ClientConfig, FileSystemClient};
//!
//! let client = FileSystemClient::websocket(ClientConfig::new("ws://localhost:8080/ws"));
//! let file = client.open_file("TASKS.md");
//! let mut events = file.events()?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?);
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bus;
mod client;
mod error;
mod pending;
mod stream;
mod transport;

pub use bus::StateSubscription;
pub use client::{ClientConfig, FileSystemClient, RemoteFile};
pub use error::ClientError;
pub use stream::{FileStream, StreamItem};
pub use transport::{MockTransport, Transport, TransportError, WsTransport};

pub use worksync_core::{BackoffPolicy, ConnectionState};
pub use worksync_types::{FileEvent, Handle};
