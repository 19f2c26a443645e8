//! # worksync-types
//!
//! Wire format types for the worksync file synchronization protocol.
//!
//! This crate provides the foundational types used across all worksync crates:
//! - [`Handle`] - Client-allocated identifier naming one opened view of a path
//! - [`Command`] - Client-to-server commands (`open_file`, `write_file`, etc.)
//! - [`ServerEvent`] - Server-to-client events (`file_opened`, `file_updated`, etc.)
//! - [`FileEvent`] - The normalized per-handle events delivered to consumers
//! - [`ProtocolError`] - Codec error types
//!
//! Frames on the wire are JSON text, tagged with a `type` field. Encoding and
//! decoding live here; interpretation (ordering, correlation, normalization)
//! lives in `worksync-core` and `worksync-client`.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod handle;
mod protocol;

pub use error::ProtocolError;
pub use event::FileEvent;
pub use handle::Handle;
pub use protocol::{committed_path, is_committed_path, Command, ServerEvent, COMMITTED_SIGIL};
