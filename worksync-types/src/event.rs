//! Consumer-facing file events.

use crate::Handle;

/// A normalized event delivered on a per-handle stream.
///
/// Consumers observe exactly one [`FileEvent::Opened`] first, then any number
/// of [`FileEvent::Updated`] and [`FileEvent::Written`] while the handle stays
/// open. Reconnect-era re-opens never surface as a second `Opened`; they are
/// rewritten to `Updated` or suppressed when the content did not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// The file finished opening; carries the initial content.
    Opened {
        /// The handle this stream belongs to.
        handle: Handle,
        /// The initial content.
        content: String,
    },
    /// The file changed outside this handle, or changed across a reconnect.
    Updated {
        /// The handle this stream belongs to.
        handle: Handle,
        /// The new content.
        content: String,
    },
    /// Echo of a successful write made through this handle.
    Written {
        /// The handle this stream belongs to.
        handle: Handle,
        /// The merged content the server stored.
        content: String,
    },
}

impl FileEvent {
    /// The handle this event was delivered to.
    pub fn handle(&self) -> Handle {
        match self {
            Self::Opened { handle, .. }
            | Self::Updated { handle, .. }
            | Self::Written { handle, .. } => *handle,
        }
    }

    /// The content carried by this event.
    pub fn content(&self) -> &str {
        match self {
            Self::Opened { content, .. }
            | Self::Updated { content, .. }
            | Self::Written { content, .. } => content,
        }
    }
}
