/// Feed module
///
/// This module groups all logic responsible for:
/// - Owning the single upstream WebSocket connection
/// - Reconnect, forced refresh and resume policy
/// - Turning raw frames into published snapshots
/// - Fanning snapshots and connection changes out to subscribers
///
/// Layering:
/// - `machine`: pure state machine, no I/O, fully unit tested
/// - `runner`:  driver task executing the machine's effects
/// - `client`:  cloneable handle used by the rest of the application
///
/// Design notes:
/// - Every input goes through one queue, so handlers never interleave
/// - Presentation (filtering, search, rendering) MUST NOT live here
pub mod client;
pub mod machine;
mod runner;
pub mod state;
pub mod subscribers;

pub use client::{FeedClient, Subscription};
pub use machine::{Clock, Effect, FeedMachine, Input, SocketId, TimerKind, TimerToken, TransportEvent};
pub use state::{ConnectionState, Phase};
pub use subscribers::{Subscriber, SubscriberId};
