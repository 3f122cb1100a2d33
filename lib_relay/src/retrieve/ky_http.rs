//! # HTTP Retrieval Utilities
//!
//! A thin wrapper around `reqwest` for JSON GET endpoints hanging off one base
//! URL. Non-2xx answers are not errors at this level; they come back as an
//! [`ApiResponse`] with `success == false` and the raw body for diagnostics.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::RelayError;

const USER_AGENT: &str = concat!("lib_relay/", env!("CARGO_PKG_VERSION"));

/// A standardized container for API responses.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The deserialized body, only for 2xx answers.
    pub data: Option<T>,
    /// The raw body of a non-2xx answer, if it could be read.
    pub error_body: Option<String>,
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    pub headers: HeaderMap,
}

pub struct ApiClient {
    inner: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Creates a client rooted at `base_url` with a per-request `timeout`.
    ///
    /// # Errors
    /// `InvalidUrl` when `base_url` is not an absolute hierarchical URL, `Http`
    /// when the underlying client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RelayError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(RelayError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }

        let inner = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { inner, base_url })
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejected cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Performs a GET on `segments` under the base URL.
    ///
    /// # Errors
    /// Returns `Http` on transport failures and when a 2xx body is not valid
    /// JSON for `T`.
    pub async fn get_json<T>(&self, segments: &[&str]) -> Result<ApiResponse<T>, RelayError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(segments);
        tracing::debug!(%url, "GET");

        let response = self.inner.get(url).send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        if status.is_success() {
            let data = response.json::<T>().await?;
            Ok(ApiResponse {
                data: Some(data),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers,
            })
        } else {
            let error_body = response.text().await.ok();
            Ok(ApiResponse {
                data: None,
                error_body,
                status: status.as_u16(),
                success: false,
                headers,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_appends_segments_with_or_without_trailing_slash() {
        let with = ApiClient::new("https://host.test/api/v2/", Duration::from_secs(1)).unwrap();
        let without = ApiClient::new("https://host.test/api/v2", Duration::from_secs(1)).unwrap();
        for client in [with, without] {
            assert_eq!(
                client.endpoint(&["show", "username", "rest_in_peace"]).as_str(),
                "https://host.test/api/v2/show/username/rest_in_peace"
            );
        }
    }

    #[test]
    fn endpoint_encodes_segments() {
        let client = ApiClient::new("https://host.test/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint(&["a b", "c/d"]).as_str(),
            "https://host.test/a%20b/c%2Fd"
        );
    }

    #[test]
    fn rejects_unusable_base_urls() {
        assert!(ApiClient::new("/relative", Duration::from_secs(1)).is_err());
        assert!(ApiClient::new("mailto:someone@host.test", Duration::from_secs(1)).is_err());
    }
}
