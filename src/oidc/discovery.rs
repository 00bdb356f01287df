//! OpenID Connect provider discovery
//!
//! Fetches the provider metadata document and resolves the JWKS location.
//! Resolution order for the JWKS URI:
//!
//! 1. the `jwks_uri` override in [`ClientConfig`]
//! 2. `jwks_uri` from `{issuer}/.well-known/openid-configuration`
//! 3. the conventional `{issuer}/.well-known/jwks.json`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{Result, RpError};
use crate::oidc::pkce;
use crate::oidc::transport;

/// Provider metadata (OpenID Connect Discovery 1.0, section 3)
///
/// Only the fields the relying party consumes are modelled; everything else
/// lands in `extra`.
///
/// # Examples
///
/// ```
/// use oidc_rp::oidc::discovery::ProviderMetadata;
///
/// let json = r#"{
///     "issuer": "https://tenant.example.com/",
///     "authorization_endpoint": "https://tenant.example.com/authorize",
///     "jwks_uri": "https://tenant.example.com/.well-known/jwks.json"
/// }"#;
///
/// let meta: ProviderMetadata = serde_json::from_str(json).unwrap();
/// assert_eq!(meta.issuer, "https://tenant.example.com/");
/// assert!(meta.token_endpoint.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,

    /// PKCE methods the provider advertises
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_methods_supported: Option<Vec<String>>,

    /// ID token signing algorithms the provider advertises
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token_signing_alg_values_supported: Option<Vec<String>>,

    /// Additional metadata not modelled above
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Fetches the provider metadata document from `url`.
///
/// # Errors
///
/// Returns [`RpError::Discovery`] on network failure, a non-success status,
/// or an unparseable body.
pub async fn fetch_provider_metadata(
    http: &reqwest::Client,
    url: &str,
) -> Result<ProviderMetadata> {
    let resp = transport::send_with_retry(|| http.get(url))
        .await
        .map_err(|e| RpError::Discovery(format!("failed to fetch {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(RpError::Discovery(format!(
            "discovery document at {url} returned {}",
            resp.status()
        )));
    }

    resp.json::<ProviderMetadata>()
        .await
        .map_err(|e| RpError::Discovery(format!("invalid discovery document at {url}: {e}")))
}

/// Conventional JWKS location used when discovery is unavailable.
pub fn fallback_jwks_uri(config: &ClientConfig) -> String {
    format!(
        "{}/.well-known/jwks.json",
        config.normalized_issuer().trim_end_matches('/')
    )
}

/// Resolves where the provider publishes its signing keys.
///
/// A discovery document without `jwks_uri` resolves to the conventional
/// location. The conventional location is not returned on failure: callers
/// decide whether to fall back for a single fetch.
///
/// # Errors
///
/// Returns [`RpError::Discovery`] if the discovery document cannot be
/// fetched or parsed.
pub async fn resolve_jwks_uri(http: &reqwest::Client, config: &ClientConfig) -> Result<String> {
    if let Some(uri) = &config.jwks_uri {
        tracing::debug!(jwks_uri = %uri, "Using configured JWKS location");
        return Ok(uri.clone());
    }

    let meta = fetch_provider_metadata(http, &config.discovery_endpoint()).await?;

    let expected = config.normalized_issuer();
    if meta.issuer != expected {
        tracing::warn!(
            expected = %expected,
            advertised = %meta.issuer,
            "Discovery document advertises a different issuer"
        );
    }
    if config.use_pkce && !pkce::provider_supports_s256(&meta) {
        tracing::warn!("Provider does not advertise PKCE S256 support");
    }

    match meta.jwks_uri {
        Some(uri) => {
            tracing::debug!(jwks_uri = %uri, "Resolved JWKS location from discovery");
            Ok(uri)
        }
        None => {
            let uri = fallback_jwks_uri(config);
            tracing::warn!(jwks_uri = %uri, "Discovery document has no jwks_uri");
            Ok(uri)
        }
    }
}
