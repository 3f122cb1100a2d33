//! # lib_relay
//!
//! Core of the Aparat live-event relay. The crate keeps one upstream event
//! feed alive for a named broadcaster, turns the platform payloads into
//! [`NormalizedEvent`]s and fans them out to every local subscriber.
//!
//! ## Modules:
//! - **`core`**: the subscriber registry / broadcaster, the follow dedup cache
//!   and the upstream connection state machine.
//! - **`events`**: the normalized event schema, the upstream envelope model and
//!   the classifier that maps one onto the other.
//! - **`ingestors`**: the WebSocket transport for the upstream feed.
//! - **`retrieve`**: HTTP helpers, including the session credential fetcher.
//! - **`error`**: the `RelayError` taxonomy shared by all of the above.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

pub mod core;
pub mod error;
pub mod events;
pub mod ingestors;
pub mod retrieve;

// --- Public API Re-exports ---
pub use crate::core::{
    spawn_sweeper, BroadcastReport, ConnectionState, DedupCache, Dispatcher, Frame, SubscriberId,
    UpstreamConfig, UpstreamManager,
};
pub use error::RelayError;
pub use events::{ClassifierOptions, EventClassifier, EventKind, NormalizedEvent};
pub use ingestors::{UpstreamConnector, UpstreamEvent, UpstreamSession, WssConnector};
pub use retrieve::{AparatCredentialFetcher, CredentialFetcher};
