//! Per-file tracking and event normalization.
//!
//! The client keeps one [`OpenFileState`] per handle. It remembers the last
//! content the server reported and whether the first `file_opened` response
//! already arrived, and it rewrites reconnect-era events so consumers never
//! see a spurious second open: a re-open with unchanged content produces no
//! event at all, and a re-open with changed content surfaces as a single
//! update.

use worksync_types::{FileEvent, ServerEvent};

/// Client-side record of one opened view of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenFileState {
    path: String,
    last_content: Option<String>,
    has_been_opened: bool,
}

impl OpenFileState {
    /// Create the record for a freshly allocated handle.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            last_content: None,
            has_been_opened: false,
        }
    }

    /// The path this handle was opened for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the first `file_opened` response has been delivered.
    ///
    /// Only handles that finished opening are re-established after a
    /// reconnect; a handle still in its initial opening phase has an opener
    /// awaiting the first response.
    pub fn has_been_opened(&self) -> bool {
        self.has_been_opened
    }

    /// The most recent content any event reported for this handle.
    pub fn last_content(&self) -> Option<&str> {
        self.last_content.as_deref()
    }

    /// Normalize a server event routed to this handle.
    ///
    /// Returns the event to deliver, or `None` when the event carries nothing
    /// new. A `file_opened` after the first one is a reconnect re-open and is
    /// rewritten to an update; updates whose content equals the last seen
    /// value are dropped; writes always deliver.
    pub fn normalize(&mut self, event: &ServerEvent) -> Option<FileEvent> {
        match event {
            ServerEvent::FileOpened {
                handle, content, ..
            } => {
                if self.has_been_opened {
                    self.content_changed(content).then(|| FileEvent::Updated {
                        handle: *handle,
                        content: content.clone(),
                    })
                } else {
                    self.has_been_opened = true;
                    self.last_content = Some(content.clone());
                    Some(FileEvent::Opened {
                        handle: *handle,
                        content: content.clone(),
                    })
                }
            }
            ServerEvent::FileUpdated { handle, content } => {
                self.content_changed(content).then(|| FileEvent::Updated {
                    handle: *handle,
                    content: content.clone(),
                })
            }
            ServerEvent::FileWritten { handle, content } => {
                self.last_content = Some(content.clone());
                Some(FileEvent::Written {
                    handle: *handle,
                    content: content.clone(),
                })
            }
            _ => None,
        }
    }

    /// Record `content` as the latest; true when it differs from the previous.
    fn content_changed(&mut self, content: &str) -> bool {
        if self.last_content.as_deref() == Some(content) {
            return false;
        }
        self.last_content = Some(content.to_string());
        true
    }
}
