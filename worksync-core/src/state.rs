//! Connection state machine for the worksync client.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the connection lifecycle. The machine takes inputs and produces a new
//! phase plus a list of actions to execute.
//!
//! The actual I/O (connecting, closing the channel, arming timers) is
//! performed by `worksync-client`, not by this module. This enables instant
//! unit testing without network mocks.

use crate::BackoffPolicy;
use std::fmt;
use std::time::Duration;

/// The externally observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The channel is up and commands flow.
    Connected,
    /// The connection was lost; a retry timer is armed.
    ReconnectWait,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ReconnectWait => "reconnect-wait",
        };
        f.write_str(name)
    }
}

/// Connection phase - the machine state, carrying the consecutive-failure
/// count used to pick the next backoff delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Not connected, not retrying.
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// Consecutive failures before this attempt.
        failures: u32,
    },
    /// Fully connected.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    ReconnectWait {
        /// Consecutive failures so far (1-based; selects the delay).
        failures: u32,
    },
}

impl Phase {
    /// Create a new machine in the disconnected phase.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// The externally observable state for this phase.
    pub fn state(&self) -> ConnectionState {
        match self {
            Self::Disconnected => ConnectionState::Disconnected,
            Self::Connecting { .. } => ConnectionState::Connecting,
            Self::Connected => ConnectionState::Connected,
            Self::ReconnectWait { .. } => ConnectionState::ReconnectWait,
        }
    }

    /// Process an input and return the new phase plus actions to execute.
    ///
    /// This is a pure function; the caller performs the returned actions.
    /// Inputs that do not apply to the current phase (a stale timer, a loss
    /// signal from an already-replaced connection) are absorbed unchanged.
    pub fn on_input(self, input: Input, backoff: &BackoffPolicy) -> (Self, Vec<Action>) {
        match (self, input) {
            (Self::Disconnected, Input::ConnectRequested) => {
                (Self::Connecting { failures: 0 }, vec![Action::StartConnect])
            }

            (Self::ReconnectWait { failures }, Input::ConnectRequested) => (
                Self::Connecting { failures },
                vec![Action::CancelRetry, Action::StartConnect],
            ),
            (Self::ReconnectWait { failures }, Input::RetryTimerFired) => {
                (Self::Connecting { failures }, vec![Action::StartConnect])
            }

            (Self::Connecting { .. }, Input::ConnectSucceeded) => {
                (Self::Connected, vec![Action::Reestablish])
            }
            (Self::Connecting { failures }, Input::ConnectFailed { open_files, .. }) => {
                if open_files {
                    let failures = failures.saturating_add(1);
                    (
                        Self::ReconnectWait { failures },
                        vec![Action::ScheduleRetry {
                            delay: backoff.delay_for(failures),
                        }],
                    )
                } else {
                    (Self::Disconnected, vec![])
                }
            }

            (Self::Connected, Input::ConnectionLost { reason, open_files }) => {
                if open_files {
                    (
                        Self::ReconnectWait { failures: 1 },
                        vec![
                            Action::FailPending { reason },
                            Action::ScheduleRetry {
                                delay: backoff.delay_for(1),
                            },
                        ],
                    )
                } else {
                    (Self::Disconnected, vec![Action::FailPending { reason }])
                }
            }

            (Self::Disconnected, Input::DisconnectRequested) => (Self::Disconnected, vec![]),
            (_, Input::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::CancelRetry,
                    Action::CloseChannel,
                    Action::FailPending {
                        reason: "client disconnected".into(),
                    },
                ],
            ),

            // Anything else is stale; stay put.
            (phase, _) => (phase, vec![]),
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::new()
    }
}

/// Inputs that drive the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// A caller needs the channel (explicit connect or auto-connect).
    ConnectRequested,
    /// The transport connection attempt succeeded.
    ConnectSucceeded,
    /// The transport connection attempt failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
        /// Whether any open file records exist (they warrant retrying).
        open_files: bool,
    },
    /// An established connection dropped.
    ConnectionLost {
        /// Reason for the loss.
        reason: String,
        /// Whether any open file records exist (they warrant retrying).
        open_files: bool,
    },
    /// The backoff timer fired.
    RetryTimerFired,
    /// The caller requested a teardown.
    DisconnectRequested,
}

/// Actions to be executed by the client.
///
/// These are instructions, not side effects; the client interprets them and
/// performs the actual I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Begin a transport connection attempt.
    StartConnect,
    /// Arm the retry timer with the given delay.
    ScheduleRetry {
        /// Delay before the timer fires.
        delay: Duration,
    },
    /// Disarm any pending retry timer.
    CancelRetry,
    /// Reject every queued command with a connection-closed error.
    FailPending {
        /// Reason attached to the rejections.
        reason: String,
    },
    /// Reissue `open_file` for every handle that already finished opening.
    Reestablish,
    /// Close the underlying channel.
    CloseChannel,
}
