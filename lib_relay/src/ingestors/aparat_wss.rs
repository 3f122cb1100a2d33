//! # Aparat WSS Ingestor
//!
//! Transport side of the upstream connection. A connected socket is turned
//! into an [`UpstreamSession`]: a reader task owns the socket and reports what
//! happens on it as [`UpstreamEvent`]s over a bounded channel, in arrival
//! order. The connection manager is the only consumer.
//!
//! A `Closed` event is always the last one a session produces.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::error::RelayError;

const SESSION_BUFFER: usize = 1024;

/// Bound on the TCP + TLS + upgrade handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    Open,
    Message(String),
    /// Transport error. Informational; the session stays up until `Closed`.
    Error(String),
    Closed,
}

/// One live upstream connection.
///
/// Dropping the session aborts its reader task, which drops the socket.
pub struct UpstreamSession {
    events: mpsc::Receiver<UpstreamEvent>,
    reader: Option<JoinHandle<()>>,
}

impl UpstreamSession {
    /// Wraps an event channel. Used by connectors that drive their own
    /// transport, and by tests.
    pub fn from_channel(events: mpsc::Receiver<UpstreamEvent>) -> Self {
        Self { events, reader: None }
    }

    fn with_reader(events: mpsc::Receiver<UpstreamEvent>, reader: JoinHandle<()>) -> Self {
        Self {
            events,
            reader: Some(reader),
        }
    }

    /// Next event in arrival order. A producer that went away without saying
    /// so is reported as `Closed`.
    pub async fn next_event(&mut self) -> UpstreamEvent {
        self.events.recv().await.unwrap_or(UpstreamEvent::Closed)
    }
}

impl Drop for UpstreamSession {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, uri: &Url) -> Result<UpstreamSession, RelayError>;
}

/// Builds the socket address for one session:
/// `{base}?JWT={credential}&source={source}&room={streamer}`.
pub fn socket_uri(base: &str, credential: &str, source: &str, streamer: &str) -> Result<Url, RelayError> {
    let mut url = Url::parse(base)?;
    url.query_pairs_mut()
        .clear()
        .append_pair("JWT", credential)
        .append_pair("source", source)
        .append_pair("room", streamer);
    Ok(url)
}

/// `tokio-tungstenite` backed connector.
#[derive(Debug, Clone)]
pub struct WssConnector {
    connect_timeout: Duration,
}

impl WssConnector {
    /// A peer that has not completed the handshake after `connect_timeout`
    /// counts as a failed connect.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WssConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl UpstreamConnector for WssConnector {
    async fn connect(&self, uri: &Url) -> Result<UpstreamSession, RelayError> {
        let (mut ws_stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(uri.as_str()))
            .await
            .map_err(|_| {
                RelayError::UpstreamSocket(format!(
                    "handshake timed out after {}ms",
                    self.connect_timeout.as_millis()
                ))
            })?
            .map_err(|e| RelayError::UpstreamSocket(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        let reader = tokio::spawn(async move {
            if tx.send(UpstreamEvent::Open).await.is_err() {
                return;
            }

            while let Some(msg) = ws_stream.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => UpstreamEvent::Message(text.as_str().to_owned()),
                    Ok(Message::Binary(bin)) => match String::from_utf8(bin.to_vec()) {
                        Ok(text) => UpstreamEvent::Message(text),
                        Err(_) => {
                            tracing::warn!(bytes = bin.len(), "Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        tracing::debug!(?frame, "Upstream sent close frame");
                        break;
                    }
                    // ping/pong are answered by tungstenite itself
                    Ok(_) => continue,
                    Err(e) => UpstreamEvent::Error(e.to_string()),
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }

            let _ = tx.send(UpstreamEvent::Closed).await;
        });

        Ok(UpstreamSession::with_reader(rx, reader))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_uri_carries_credential_source_and_room() {
        let url = socket_uri("wss://lws.aparat.com/v1", "a.b-c_d", "aparat", "rest_in_peace").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://lws.aparat.com/v1?JWT=a.b-c_d&source=aparat&room=rest_in_peace"
        );
    }

    #[test]
    fn socket_uri_encodes_query_values() {
        let url = socket_uri("wss://example.test/v1", "x+y=z", "aparat", "two words").unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("JWT".to_string(), "x+y=z".to_string()));
        assert_eq!(pairs[2], ("room".to_string(), "two words".to_string()));
    }

    #[test]
    fn socket_uri_rejects_bad_base() {
        assert!(matches!(
            socket_uri("not a url", "t", "aparat", "r"),
            Err(RelayError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn stalled_handshake_fails_within_the_connect_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accepts the TCP connection and then says nothing.
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(socket);
        });

        let uri = socket_uri(&format!("ws://{addr}/v1"), "tok", "aparat", "room").unwrap();
        let connector = WssConnector::new(Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(5), connector.connect(&uri))
            .await
            .expect("connect was not bounded by its timeout");
        match result {
            Err(RelayError::UpstreamSocket(reason)) => assert!(reason.contains("timed out"), "{reason}"),
            Err(other) => panic!("unexpected error {other:?}"),
            Ok(_) => panic!("a silent peer must not produce a session"),
        }
        server.abort();
    }

    #[tokio::test]
    async fn refused_connection_is_a_socket_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let uri = socket_uri(&format!("ws://127.0.0.1:{port}/v1"), "tok", "aparat", "room").unwrap();
        assert!(matches!(
            WssConnector::default().connect(&uri).await,
            Err(RelayError::UpstreamSocket(_))
        ));
    }

    #[tokio::test]
    async fn dropped_producer_reads_as_closed() {
        let (tx, rx) = mpsc::channel(4);
        let mut session = UpstreamSession::from_channel(rx);
        tx.send(UpstreamEvent::Message("{}".into())).await.unwrap();
        drop(tx);

        assert_eq!(session.next_event().await, UpstreamEvent::Message("{}".into()));
        assert_eq!(session.next_event().await, UpstreamEvent::Closed);
    }
}
