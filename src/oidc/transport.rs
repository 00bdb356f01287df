//! Outbound HTTP to the provider
//!
//! All provider calls share one [`reqwest::Client`] with a client-wide
//! timeout. A request is retried exactly once, and only when the first
//! attempt failed to connect or timed out. Responses carrying any HTTP
//! status, 4xx included, are returned to the caller as-is.

use std::time::Duration;

use crate::config::{ClientConfig, MAX_HTTP_TIMEOUT_SECONDS};
use crate::error::{Result, RpError};

/// Builds the shared provider HTTP client.
///
/// The timeout is clamped to the supported maximum.
///
/// # Errors
///
/// Returns [`RpError::Config`] if the TLS backend cannot be initialised.
pub fn build_http_client(config: &ClientConfig) -> Result<reqwest::Client> {
    let secs = config
        .http_timeout_seconds
        .clamp(1, MAX_HTTP_TIMEOUT_SECONDS);

    reqwest::Client::builder()
        .timeout(Duration::from_secs(secs))
        .user_agent(concat!("oidc-rp/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| RpError::Config(format!("failed to build HTTP client: {e}")))
}

/// Whether a request error is worth a second attempt.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Sends the request produced by `build`, retrying once on a transient
/// network failure.
///
/// `build` is invoked once per attempt since a `RequestBuilder` is consumed
/// by `send`.
pub async fn send_with_retry<F>(build: F) -> std::result::Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    match build().send().await {
        Ok(resp) => Ok(resp),
        Err(e) if is_transient(&e) => {
            tracing::warn!(error = %e, "Transient provider error, retrying once");
            build().send().await
        }
        Err(e) => Err(e),
    }
}
