//! # Credential Fetcher
//!
//! The upstream socket only accepts a short-lived JWT that the platform hands
//! out per broadcaster. One call = one HTTP request; retrying is the
//! connection manager's job.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RelayError;
use crate::retrieve::ky_http::ApiClient;

#[async_trait]
pub trait CredentialFetcher: Send + Sync {
    /// Returns a session credential for `streamer_name`.
    ///
    /// # Errors
    /// `RelayError::CredentialFetch` for transport failures, non-2xx answers
    /// and bodies without a usable `jwt`.
    async fn fetch(&self, streamer_name: &str) -> Result<String, RelayError>;
}

#[derive(Debug, Deserialize)]
struct CredentialBody {
    #[serde(default)]
    jwt: Option<String>,
}

/// Fetches credentials from `GET {base}/show/username/{streamer}`.
pub struct AparatCredentialFetcher {
    client: ApiClient,
}

impl AparatCredentialFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        Ok(Self {
            client: ApiClient::new(base_url, timeout)?,
        })
    }
}

#[async_trait]
impl CredentialFetcher for AparatCredentialFetcher {
    async fn fetch(&self, streamer_name: &str) -> Result<String, RelayError> {
        let response = self
            .client
            .get_json::<CredentialBody>(&["show", "username", streamer_name])
            .await
            .map_err(|e| RelayError::credential(streamer_name, e.to_string()))?;

        if !response.success {
            let body = response.error_body.unwrap_or_default();
            return Err(RelayError::credential(
                streamer_name,
                format!("HTTP {}: {}", response.status, body.trim()),
            ));
        }

        response
            .data
            .and_then(|body| body.jwt)
            .filter(|jwt| !jwt.is_empty())
            .ok_or_else(|| RelayError::credential(streamer_name, "response carries no jwt"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    /// One-shot mock HTTP server. Returns the base URL and a handle yielding
    /// the request line it saw.
    fn serve_once(status: &str, body: &str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to random port");
        let port = listener.local_addr().unwrap().port();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Length: {}\r\nContent-Type: application/json\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            request.lines().next().unwrap_or_default().to_string()
        });

        (format!("http://127.0.0.1:{}/api/fa/v2/Live/LiveStream/", port), handle)
    }

    fn fetcher(base: &str) -> AparatCredentialFetcher {
        AparatCredentialFetcher::new(base, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn returns_jwt_from_show_endpoint() {
        let (base, server) = serve_once("200 OK", r#"{"jwt":"abc.def.ghi","other":1}"#);

        let jwt = fetcher(&base).fetch("rest_in_peace").await.unwrap();

        assert_eq!(jwt, "abc.def.ghi");
        assert_eq!(
            server.join().unwrap(),
            "GET /api/fa/v2/Live/LiveStream/show/username/rest_in_peace HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn non_success_status_is_a_fetch_error() {
        let (base, server) = serve_once("404 Not Found", r#"{"error":"no such user"}"#);

        let err = fetcher(&base).fetch("ghost").await.unwrap_err();
        server.join().unwrap();

        match err {
            RelayError::CredentialFetch { streamer, reason } => {
                assert_eq!(streamer, "ghost");
                assert!(reason.contains("404"), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_or_empty_jwt_is_a_fetch_error() {
        for body in [r#"{"data":{}}"#, r#"{"jwt":""}"#, r#"{"jwt":null}"#] {
            let (base, server) = serve_once("200 OK", body);
            let err = fetcher(&base).fetch("rest_in_peace").await.unwrap_err();
            server.join().unwrap();
            assert!(matches!(err, RelayError::CredentialFetch { .. }), "body {body}");
        }
    }

    #[tokio::test]
    async fn invalid_json_is_a_fetch_error() {
        let (base, server) = serve_once("200 OK", "<html>maintenance</html>");
        let err = fetcher(&base).fetch("rest_in_peace").await.unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, RelayError::CredentialFetch { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_fetch_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = fetcher(&format!("http://127.0.0.1:{port}/"))
            .fetch("rest_in_peace")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::CredentialFetch { .. }));
    }
}
