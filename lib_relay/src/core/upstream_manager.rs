//! # Upstream Manager
//!
//! Keeps exactly one upstream session alive for the configured broadcaster,
//! forever. The lifecycle is an explicit state machine:
//!
//! ```text
//! Idle -> FetchingCredential -> Connecting -> Connected -> Disconnected
//!              ^    |  (fail: wait)                            |
//!              +----+------------------- (wait) --------------+
//! ```
//!
//! Every transition is one call to [`UpstreamManager::step`]; [`UpstreamManager::run`]
//! just loops it. Waits use a fixed delay, with no growth and no cap. The
//! only way out is the shutdown token, which moves any state to `Stopped`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::events::EventClassifier;
use crate::ingestors::aparat_wss::{socket_uri, UpstreamConnector, UpstreamEvent, UpstreamSession};
use crate::retrieve::credential::CredentialFetcher;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub streamer_name: String,
    /// Base URL of the live socket, without query.
    pub socket_url: String,
    /// Value of the `source` query parameter.
    pub source_tag: String,
    pub reconnect_delay: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            streamer_name: "rest_in_peace".to_string(),
            socket_url: "wss://lws.aparat.com/v1".to_string(),
            source_tag: "aparat".to_string(),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

pub enum ConnectionState {
    Idle,
    FetchingCredential,
    Connecting { credential: String },
    /// Owns the one live session. Leaving this state drops it.
    Connected(UpstreamSession),
    Disconnected,
    Stopped,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingCredential => "fetching_credential",
            Self::Connecting { .. } => "connecting",
            Self::Connected(_) => "connected",
            Self::Disconnected => "disconnected",
            Self::Stopped => "stopped",
        }
    }
}

// The credential must never reach a log line.
impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct UpstreamManager<F, C> {
    config: UpstreamConfig,
    fetcher: F,
    connector: C,
    classifier: EventClassifier,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
}

impl<F, C> UpstreamManager<F, C>
where
    F: CredentialFetcher,
    C: UpstreamConnector,
{
    pub fn new(
        config: UpstreamConfig,
        fetcher: F,
        connector: C,
        classifier: EventClassifier,
        dispatcher: Arc<Dispatcher>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            fetcher,
            connector,
            classifier,
            dispatcher,
            shutdown,
        }
    }

    /// Drives the state machine until shutdown.
    pub async fn run(self) {
        tracing::info!(streamer = %self.config.streamer_name, "Upstream manager started");

        let mut state = ConnectionState::Idle;
        while !matches!(state, ConnectionState::Stopped) {
            state = self.step(state).await;
            tracing::trace!(state = state.name(), "Upstream state");
        }

        tracing::info!("Upstream manager stopped");
    }

    /// Performs the work of `state` and returns the state that follows it.
    pub async fn step(&self, state: ConnectionState) -> ConnectionState {
        match state {
            ConnectionState::Idle => ConnectionState::FetchingCredential,
            ConnectionState::FetchingCredential => self.fetch_credential().await,
            ConnectionState::Connecting { credential } => self.connect(&credential).await,
            ConnectionState::Connected(session) => self.pump(session).await,
            ConnectionState::Disconnected => self.wait_then(ConnectionState::FetchingCredential).await,
            ConnectionState::Stopped => ConnectionState::Stopped,
        }
    }

    async fn fetch_credential(&self) -> ConnectionState {
        let streamer = &self.config.streamer_name;
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return ConnectionState::Stopped,
            result = self.fetcher.fetch(streamer) => result,
        };

        match result {
            Ok(credential) => {
                tracing::debug!(streamer = %streamer, "Obtained session credential");
                ConnectionState::Connecting { credential }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in_ms = self.config.reconnect_delay.as_millis() as u64,
                    "Credential fetch failed"
                );
                self.wait_then(ConnectionState::FetchingCredential).await
            }
        }
    }

    async fn connect(&self, credential: &str) -> ConnectionState {
        let uri = match socket_uri(
            &self.config.socket_url,
            credential,
            &self.config.source_tag,
            &self.config.streamer_name,
        ) {
            Ok(uri) => uri,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build upstream socket address");
                return ConnectionState::Disconnected;
            }
        };

        tracing::info!(
            host = uri.host_str().unwrap_or_default(),
            room = %self.config.streamer_name,
            "Connecting to upstream"
        );

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return ConnectionState::Stopped,
            result = self.connector.connect(&uri) => result,
        };

        match result {
            Ok(session) => {
                tracing::info!(room = %self.config.streamer_name, "Connected to upstream");
                ConnectionState::Connected(session)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Upstream connect failed");
                ConnectionState::Disconnected
            }
        }
    }

    /// Drains one session in arrival order until it closes.
    async fn pump(&self, mut session: UpstreamSession) -> ConnectionState {
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => return ConnectionState::Stopped,
                event = session.next_event() => event,
            };

            match event {
                UpstreamEvent::Open => tracing::debug!("Upstream socket open"),
                UpstreamEvent::Message(raw) => self.relay(&raw),
                UpstreamEvent::Error(reason) => {
                    tracing::warn!(error = %RelayError::UpstreamSocket(reason), "Upstream socket reported an error");
                }
                UpstreamEvent::Closed => {
                    tracing::warn!(
                        reconnect_in_ms = self.config.reconnect_delay.as_millis() as u64,
                        "Disconnected from upstream"
                    );
                    return ConnectionState::Disconnected;
                }
            }
        }
    }

    fn relay(&self, raw: &str) {
        let Some(event) = self.classifier.classify(raw) else {
            return;
        };
        let report = self.dispatcher.broadcast(&event);
        tracing::info!(
            kind = ?event.kind,
            username = event.username.as_deref().unwrap_or_default(),
            delivered = report.delivered,
            pruned = report.pruned,
            "Relayed event"
        );
    }

    async fn wait_then(&self, next: ConnectionState) -> ConnectionState {
        tokio::select! {
            _ = self.shutdown.cancelled() => ConnectionState::Stopped,
            _ = tokio::time::sleep(self.config.reconnect_delay) => next,
        }
    }
}
