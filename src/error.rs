use thiserror::Error;

/// Failures the feed client can run into.
///
/// None of these are ever returned to callers of `FeedClient`; they are
/// rendered into `ConnectionState::last_error` and observed through the
/// subscription callbacks. A deliberate local close is not an error and has
/// no variant here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The socket could not be opened or dropped unexpectedly.
    #[error("WebSocket connection error: {0}")]
    Transport(String),

    /// An inbound frame was not a valid feed object. The socket stays open.
    #[error("Failed to parse feed data: {0}")]
    Parse(String),

    /// Auto-retry gave up after this many consecutive failures.
    #[error(
        "Maximum reconnection attempts ({0}) reached. Will retry at next scheduled refresh or on manual reconnect."
    )]
    AttemptsExhausted(u32),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Parse(e.to_string())
    }
}
