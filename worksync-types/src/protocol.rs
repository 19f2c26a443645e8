//! Protocol commands and events.
//!
//! Every frame carries a `type` discriminant. Commands flow client to server;
//! events flow server to client. The channel is strictly ordered: each command
//! is answered by exactly one terminal event, in submission order, while
//! `file_updated` events arrive unsolicited and answer nothing.

use crate::{Handle, ProtocolError};
use serde::{Deserialize, Serialize};

/// Reserved path sigil denoting the committed (HEAD) snapshot of a path.
pub const COMMITTED_SIGIL: char = '@';

/// Build the committed-snapshot path for a working-tree path.
pub fn committed_path(path: &str) -> String {
    format!("{COMMITTED_SIGIL}{path}")
}

/// Whether a path refers to a committed snapshot rather than the working tree.
pub fn is_committed_path(path: &str) -> bool {
    path.starts_with(COMMITTED_SIGIL)
}

/// Client-to-server commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Open a path under a client-chosen handle.
    OpenFile {
        /// Path relative to the repository root; may carry the `@` sigil.
        path: String,
        /// The handle the client assigns to this view.
        handle: Handle,
    },
    /// Release a handle.
    CloseFile {
        /// The handle to release.
        handle: Handle,
    },
    /// Write new content, carrying the last content this client observed so
    /// the server can merge concurrent edits.
    WriteFile {
        /// The handle being written through.
        handle: Handle,
        /// The content this client last saw for the handle.
        last_content: String,
        /// The desired new content.
        new_content: String,
    },
    /// Commit all outstanding changes in the repository.
    Commit {
        /// The commit message.
        message: String,
    },
}

impl Command {
    /// Encode this command as a JSON text frame.
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a command from a JSON text frame.
    ///
    /// The engine never decodes commands; this exists for tests and mock
    /// servers that assert on outbound traffic.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Terminal response to `open_file`, carrying the current content.
    FileOpened {
        /// The handle named in the command.
        handle: Handle,
        /// The file content as the server sees it.
        content: String,
        /// Echo of the opened path; informational.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Terminal response to `close_file`.
    FileClosed {
        /// The released handle.
        handle: Handle,
    },
    /// Unsolicited notification that a file changed outside this handle.
    FileUpdated {
        /// The handle whose path changed.
        handle: Handle,
        /// The new content.
        content: String,
    },
    /// Terminal response to `write_file`, carrying the merged content.
    FileWritten {
        /// The handle that was written through.
        handle: Handle,
        /// The content actually stored, which may differ from what was sent.
        content: String,
    },
    /// Terminal response to `commit`.
    Committed,
    /// Terminal failure response to any command.
    Error {
        /// Human-readable server message.
        message: String,
        /// The path involved, when the server knows it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl ServerEvent {
    /// Encode this event as a JSON text frame (mock servers in tests).
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a server event from a JSON text frame.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Decode)
    }

    /// Whether this event answers (and dequeues) a pending command.
    ///
    /// Everything except `file_updated` is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::FileUpdated { .. })
    }

    /// The handle this event refers to, when it carries one.
    pub fn handle(&self) -> Option<Handle> {
        match self {
            Self::FileOpened { handle, .. }
            | Self::FileClosed { handle }
            | Self::FileUpdated { handle, .. }
            | Self::FileWritten { handle, .. } => Some(*handle),
            Self::Committed | Self::Error { .. } => None,
        }
    }
}
