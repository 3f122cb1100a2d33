//! # Data Retrieval Module
//!
//! HTTP-side collaborators of the relay.
//!
//! - **`ky_http`**: a small JSON GET client rooted at a base URL.
//! - **`credential`**: the session credential fetcher the connection manager
//!   calls before every connect attempt.

pub mod credential;
pub mod ky_http;

pub use credential::{AparatCredentialFetcher, CredentialFetcher};
pub use ky_http::{ApiClient, ApiResponse};
