//! Connection lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a realtime session.
///
/// Exactly one state is active at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// `start()` accepted, no transport attempt issued yet.
    Starting,
    /// Shutting the live transport down.
    Stopping,
    /// Idle. Initial state of every session.
    Stopped,
    /// A transport `start()` is in flight.
    Connecting,
    /// Auto-reconnect accepted, about to issue a new connect attempt.
    Reconnecting,
    /// Transport is up; `send`/`invoke` are forwarded.
    Connected,
    /// Connect attempt failed or the transport dropped.
    Error,
    /// Waiting out the retry delay between two transport starts.
    RetryBackoff,
}

impl ConnectionState {
    /// Every state, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Starting,
        Self::Stopping,
        Self::Stopped,
        Self::Connecting,
        Self::Reconnecting,
        Self::Connected,
        Self::Error,
        Self::RetryBackoff,
    ];

    /// Stable name used in logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Connecting => "connecting",
            Self::Reconnecting => "reconnecting",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::RetryBackoff => "retry_backoff",
        }
    }

    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub const fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
