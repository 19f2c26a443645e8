//! FIFO correlation of commands with terminal server events.
//!
//! The wire protocol has no request identifiers. Correlation relies on the
//! channel being strictly ordered: the n-th terminal event answers the n-th
//! submitted command. This module owns that FIFO; unsolicited `file_updated`
//! events never touch it.

use crate::ClientError;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::warn;
use worksync_types::{Command, ServerEvent};

/// Which terminal event kind answers a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CommandKind {
    OpenFile,
    CloseFile,
    WriteFile,
    Commit,
}

impl CommandKind {
    pub(crate) fn of(command: &Command) -> Self {
        match command {
            Command::OpenFile { .. } => Self::OpenFile,
            Command::CloseFile { .. } => Self::CloseFile,
            Command::WriteFile { .. } => Self::WriteFile,
            Command::Commit { .. } => Self::Commit,
        }
    }

    fn answers(&self, event: &ServerEvent) -> bool {
        matches!(
            (self, event),
            (Self::OpenFile, ServerEvent::FileOpened { .. })
                | (Self::CloseFile, ServerEvent::FileClosed { .. })
                | (Self::WriteFile, ServerEvent::FileWritten { .. })
                | (Self::Commit, ServerEvent::Committed)
        )
    }
}

struct Waiting {
    kind: CommandKind,
    reply: oneshot::Sender<Result<ServerEvent, ClientError>>,
}

/// Strict FIFO of commands awaiting their terminal event.
#[derive(Default)]
pub(crate) struct PendingCommands {
    queue: VecDeque<Waiting>,
}

impl PendingCommands {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a command; the returned receiver resolves with its terminal
    /// event or rejects on error / connection loss.
    pub(crate) fn push(
        &mut self,
        kind: CommandKind,
    ) -> oneshot::Receiver<Result<ServerEvent, ClientError>> {
        let (reply, rx) = oneshot::channel();
        self.queue.push_back(Waiting { kind, reply });
        rx
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Answer the head command with a terminal event.
    ///
    /// An `error` event rejects with the server message verbatim; a terminal
    /// event of the wrong kind rejects as a protocol violation. A terminal
    /// event with nothing queued is logged and dropped.
    pub(crate) fn resolve(&mut self, event: ServerEvent) {
        let Some(waiting) = self.queue.pop_front() else {
            warn!(?event, "terminal event with no pending command; dropping");
            return;
        };
        let outcome = if let ServerEvent::Error { message, path } = &event {
            Err(ClientError::Remote {
                message: message.clone(),
                path: path.clone(),
            })
        } else if waiting.kind.answers(&event) {
            Ok(event)
        } else {
            Err(ClientError::Protocol(format!(
                "expected a response to {:?}, got {event:?}",
                waiting.kind
            )))
        };
        // The caller may have given up waiting; that is fine.
        let _ = waiting.reply.send(outcome);
    }

    /// Reject the head command without consuming an event (undecodable frame).
    pub(crate) fn fail_head(&mut self, error: ClientError) {
        if let Some(waiting) = self.queue.pop_front() {
            let _ = waiting.reply.send(Err(error));
        }
    }

    /// Reject every queued command with a connection-closed error.
    pub(crate) fn drain(&mut self, reason: &str) {
        for waiting in self.queue.drain(..) {
            let _ = waiting
                .reply
                .send(Err(ClientError::ConnectionClosed(reason.to_string())));
        }
    }
}
