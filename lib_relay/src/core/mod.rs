//! # Core Engine Module
//!
//! The moving parts of the relay.
//!
//! - **`dispatcher`**: the subscriber registry and broadcaster. One serialized
//!   frame per event, shared by every subscriber, dead subscribers pruned as
//!   they are found.
//!
//! - **`dedup`**: the follow cooldown cache and its periodic sweeper.
//!
//! - **`upstream_manager`**: the connection state machine. Fetches a
//!   credential, connects, drains the session, waits and starts over, until
//!   told to stop.

/// Time-bounded follow dedup.
pub mod dedup;
/// Subscriber registry and broadcaster.
pub mod dispatcher;
/// The state machine that owns the upstream session.
pub mod upstream_manager;

// --- Public API Re-exports ---
pub use dedup::{spawn_sweeper, DedupCache};
pub use dispatcher::{BroadcastReport, Dispatcher, Frame, SubscriberId};
pub use upstream_manager::{ConnectionState, UpstreamConfig, UpstreamManager};
