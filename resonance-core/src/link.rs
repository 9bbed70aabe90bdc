//! Per-peer link state machine.
//!
//! A pure state machine for one outbound socket link. The spoke feeds it
//! events as I/O happens and reads back whether the peer currently counts
//! as connected. No I/O and no timers live here.

use std::time::Duration;

/// Delay between reconnect attempts when none is configured.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Link state - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection and no attempt in flight.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// Failed attempts preceding this one.
        attempt: u32,
    },
    /// Connected; sends are allowed.
    Connected,
    /// Lost or failed, waiting to retry.
    Reconnecting {
        /// Consecutive failed or lost connections so far.
        attempt: u32,
    },
}

/// Events that drive the link lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A connect attempt starts.
    ConnectRequested,
    /// The transport connected.
    ConnectSucceeded,
    /// The transport failed to connect.
    ConnectFailed,
    /// The peer closed, or a receive failed.
    ConnectionLost,
    /// A send failed; the link is considered down.
    SendFailed,
    /// Local shutdown.
    DisconnectRequested,
}

impl LinkState {
    /// Process an event and return the new state.
    ///
    /// Transitions not listed keep the current state.
    pub fn on_event(self, event: LinkEvent) -> Self {
        match (self, event) {
            (_, LinkEvent::DisconnectRequested) => Self::Disconnected,

            (Self::Disconnected, LinkEvent::ConnectRequested) => Self::Connecting { attempt: 0 },
            (Self::Reconnecting { attempt }, LinkEvent::ConnectRequested) => {
                Self::Connecting { attempt }
            }

            (Self::Connecting { .. }, LinkEvent::ConnectSucceeded) => Self::Connected,
            (Self::Connecting { attempt }, LinkEvent::ConnectFailed) => Self::Reconnecting {
                attempt: attempt.saturating_add(1),
            },

            (Self::Connected, LinkEvent::ConnectionLost | LinkEvent::SendFailed) => {
                Self::Reconnecting { attempt: 1 }
            }

            (state, _) => state,
        }
    }

    /// Whether sends are currently allowed.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// How long to wait before the next reconnect attempt.
///
/// The delay is fixed and retries are unbounded; cancellation is the
/// only way out of a reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    delay: Duration,
}

impl ReconnectPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}
