//! # Relay Errors
//!
//! None of these is fatal to the relay. Credential and socket errors end in a
//! log line and a fresh reconnect cycle, parse errors drop a single message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The session token for a broadcaster could not be obtained.
    #[error("credential fetch for '{streamer}' failed: {reason}")]
    CredentialFetch { streamer: String, reason: String },

    /// Connecting to, or reading from, the upstream socket failed.
    #[error("upstream socket error: {0}")]
    UpstreamSocket(String),

    /// A raw upstream frame was not a valid envelope.
    #[error("malformed upstream message: {0}")]
    MessageParse(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl RelayError {
    pub(crate) fn credential(streamer: &str, reason: impl Into<String>) -> Self {
        Self::CredentialFetch {
            streamer: streamer.to_string(),
            reason: reason.into(),
        }
    }
}
