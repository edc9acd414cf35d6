//! Live garden-shop stock feed client.
//!
//! One [`FeedClient`] per process owns the upstream WebSocket, keeps it
//! alive (backoff, scheduled refresh, resume), and publishes immutable
//! [`Snapshot`]s to any number of subscribers.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod schema;
pub mod util;

pub use error::FeedError;
pub use feed::{ConnectionState, FeedClient, Phase, Subscription};
pub use schema::{Item, SequenceId, Snapshot, StockCategory, WeatherCondition};
