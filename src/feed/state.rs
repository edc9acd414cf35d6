use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle phase of the single upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Phase::Disconnected => "disconnected",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
        })
    }
}

/// Connection health as seen by subscribers.
///
/// Only the feed state machine writes this; everybody else gets clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub phase: Phase,

    /// Failed attempts since the last successful open
    pub consecutive_failures: u32,

    /// Most recent failure, cleared on open and on forced reconnect
    pub last_error: Option<String>,

    /// When the next clock-aligned refresh fires, if one is armed
    pub next_refresh_at: Option<DateTime<Utc>>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            consecutive_failures: 0,
            last_error: None,
            next_refresh_at: None,
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.phase == Phase::Connected
    }
}
