//! # Data Ingestors Module
//!
//! Clients for the upstream event sources. There is one today, the Aparat
//! live socket; the [`UpstreamConnector`] trait is the seam the connection
//! manager depends on, so tests can hand it scripted sessions instead.

/// The WebSocket client for the Aparat live event feed.
pub mod aparat_wss;

pub use aparat_wss::{socket_uri, UpstreamConnector, UpstreamEvent, UpstreamSession, WssConnector};
