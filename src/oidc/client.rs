//! OIDC client: protocol messages exchanged with the provider
//!
//! [`OidcClient`] builds the authorization redirect, redeems authorization
//! codes and refresh tokens at the token endpoint, and builds the provider
//! logout URL. It holds no per-login state; everything that must survive
//! between challenge and callback lives in the returned
//! [`AuthorizationRequest`].

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, RpError};
use crate::oidc::pkce::PkceChallenge;
use crate::oidc::transport;

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// A single-use login attempt.
///
/// `url` is where the browser must be sent. `state`, `nonce` and
/// `code_verifier` must be kept server-side until the callback arrives.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Provider authorization URL with all query parameters
    pub url: Url,
    /// CSRF correlation value echoed back on the callback
    pub state: String,
    /// Replay-protection value expected inside the ID token
    pub nonce: String,
    /// PKCE verifier, present when PKCE is enabled
    pub code_verifier: Option<String>,
    /// API audience requested for the access token
    pub audience: Option<String>,
}

/// Tokens returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub id_token: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.expires_in?).ok()?;
        Utc::now().checked_add_signed(chrono::Duration::try_seconds(secs)?)
    }

    fn into_token_set(self) -> Result<TokenSet> {
        let expires_at = self.expires_at();
        let id_token = self.id_token.ok_or_else(|| RpError::TokenExchange {
            message: "token response did not include an id_token".to_string(),
            status: None,
            body: None,
            transient: false,
        })?;

        Ok(TokenSet {
            id_token,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at,
            scope: self.scope,
        })
    }
}

/// Scheme, host and path base of the inbound request.
///
/// Used to turn relative return URLs into the absolute URLs the provider
/// requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOrigin {
    /// `http` or `https`
    pub scheme: String,
    /// Host, with port when not the default
    pub host: String,
    /// Path prefix the application is mounted under; empty or `/app` style
    pub path_base: String,
}

impl RequestOrigin {
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        path_base: impl Into<String>,
    ) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            path_base: path_base.into(),
        }
    }

    /// Resolves `uri` against this origin.
    ///
    /// Absolute `http(s)` URLs are returned unchanged; anything else is
    /// treated as a path below the path base.
    ///
    /// # Examples
    ///
    /// ```
    /// use oidc_rp::oidc::client::RequestOrigin;
    ///
    /// let origin = RequestOrigin::new("https", "app.example.com", "");
    /// assert_eq!(
    ///     origin.resolve("/home").unwrap().as_str(),
    ///     "https://app.example.com/home"
    /// );
    /// ```
    pub fn resolve(&self, uri: &str) -> Result<Url> {
        if let Ok(url) = Url::parse(uri) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(url);
            }
        }

        let base = self.path_base.trim_end_matches('/');
        let path = if uri.starts_with('/') {
            uri.to_string()
        } else {
            format!("/{uri}")
        };
        let absolute = format!("{}://{}{}{}", self.scheme, self.host, base, path);

        Url::parse(&absolute)
            .map_err(|e| RpError::Config(format!("cannot build absolute URL from {uri}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// OidcClient
// ---------------------------------------------------------------------------

/// Client for the provider's front- and back-channel endpoints.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use oidc_rp::config::ClientConfig;
/// use oidc_rp::oidc::client::OidcClient;
///
/// let config = Arc::new(ClientConfig::new(
///     "tenant.example.com",
///     "client-123",
///     "https://app.example.com/callback",
/// ));
/// let client = OidcClient::new(config).unwrap();
/// let request = client.build_authorization_request(None).unwrap();
///
/// assert!(request.url.as_str().starts_with("https://tenant.example.com/authorize?"));
/// assert_ne!(request.state, request.nonce);
/// ```
#[derive(Clone)]
pub struct OidcClient {
    config: Arc<ClientConfig>,
    http: reqwest::Client,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.config.normalized_issuer())
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}

impl OidcClient {
    /// Creates a client with its own timeout-bounded HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] if the HTTP client cannot be built.
    pub fn new(config: Arc<ClientConfig>) -> Result<Self> {
        let http = transport::build_http_client(&config)?;
        Ok(Self::with_http_client(config, http))
    }

    /// Creates a client that shares an existing HTTP client.
    pub fn with_http_client(config: Arc<ClientConfig>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Builds a fresh authorization request.
    ///
    /// # Arguments
    ///
    /// * `audience` - API audience for the access token; falls back to the
    ///   configured audience
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] if the issuer or client id is missing, or
    /// the authorization endpoint is not a valid URL.
    pub fn build_authorization_request(
        &self,
        audience: Option<&str>,
    ) -> Result<AuthorizationRequest> {
        if self.config.issuer.trim().is_empty() {
            return Err(RpError::Config("issuer is required".to_string()));
        }
        if self.config.client_id.trim().is_empty() {
            return Err(RpError::Config("client_id is required".to_string()));
        }

        let endpoint = self.config.authorization_endpoint();
        let mut url = Url::parse(&endpoint).map_err(|e| {
            RpError::Config(format!("invalid authorization endpoint {endpoint}: {e}"))
        })?;

        let state = random_value();
        let nonce = random_value();
        let pkce = self.config.use_pkce.then(PkceChallenge::generate);
        let audience = audience
            .map(str::to_string)
            .or_else(|| self.config.audience.clone())
            .filter(|a| !a.is_empty());

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("response_type", "code");
            query.append_pair("scope", &self.config.scope_string());
            query.append_pair("state", &state);
            query.append_pair("nonce", &nonce);
            if let Some(ref audience) = audience {
                query.append_pair("audience", audience);
            }
            if let Some(ref pkce) = pkce {
                query.append_pair("code_challenge", &pkce.challenge);
                query.append_pair("code_challenge_method", &pkce.method);
            }
        }

        tracing::debug!(
            state = %state_prefix(&state),
            audience = audience.as_deref().unwrap_or(""),
            pkce = pkce.is_some(),
            "Built authorization request"
        );

        Ok(AuthorizationRequest {
            url,
            state,
            nonce,
            code_verifier: pkce.map(|p| p.verifier),
            audience,
        })
    }

    /// Redeems an authorization code for tokens.
    ///
    /// The received `state` is compared with the expected one in constant
    /// time before any network call is made.
    ///
    /// # Errors
    ///
    /// - [`RpError::StateMismatch`] if the states differ
    /// - [`RpError::TokenExchange`] on network failure, a non-success status
    ///   (with the provider body attached), or a response without `id_token`
    pub async fn exchange_code(
        &self,
        code: &str,
        expected_state: &str,
        received_state: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        if !constant_time_eq(expected_state.as_bytes(), received_state.as_bytes()) {
            return Err(RpError::StateMismatch);
        }

        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &self.config.redirect_uri);
        if let Some(verifier) = code_verifier {
            params.insert("code_verifier", verifier);
        }

        let raw = self.post_token(params).await?;
        raw.into_token_set()
    }

    /// Exchanges the refresh token of `current` for a new token set.
    ///
    /// Tokens the provider does not return again (ID token, rotated refresh
    /// token) are carried over from `current`.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::TokenExchange`] if `current` has no refresh token
    /// or the provider rejects the request.
    pub async fn refresh(&self, current: &TokenSet) -> Result<TokenSet> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or_else(|| RpError::TokenExchange {
                message: "no refresh token available".to_string(),
                status: None,
                body: None,
                transient: false,
            })?;

        let scope = self.config.scope_string();
        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token);
        params.insert("scope", &scope);

        let raw = self.post_token(params).await?;
        let expires_at = raw.expires_at();

        Ok(TokenSet {
            id_token: raw.id_token.unwrap_or_else(|| current.id_token.clone()),
            access_token: raw.access_token,
            refresh_token: raw.refresh_token.or_else(|| current.refresh_token.clone()),
            token_type: raw.token_type,
            expires_at,
            scope: raw.scope.or_else(|| current.scope.clone()),
        })
    }

    /// Builds the provider logout URL.
    ///
    /// The return URL is `post_logout_redirect_uri`, else the configured one.
    /// Relative values are made absolute against `origin`. With neither,
    /// `returnTo` is omitted and the provider picks its default.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] if the logout endpoint or the return URL
    /// cannot be parsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use oidc_rp::config::ClientConfig;
    /// use oidc_rp::oidc::client::{OidcClient, RequestOrigin};
    ///
    /// let config = Arc::new(ClientConfig::new(
    ///     "https://tenant.example.com/",
    ///     "abc",
    ///     "https://app.example.com/callback",
    /// ));
    /// let client = OidcClient::new(config).unwrap();
    /// let origin = RequestOrigin::new("https", "app.example.com", "");
    /// let url = client.build_logout_url(Some("/home"), &origin).unwrap();
    ///
    /// assert_eq!(
    ///     url.as_str(),
    ///     "https://tenant.example.com/v2/logout?client_id=abc&returnTo=https%3A%2F%2Fapp.example.com%2Fhome"
    /// );
    /// ```
    pub fn build_logout_url(
        &self,
        post_logout_redirect_uri: Option<&str>,
        origin: &RequestOrigin,
    ) -> Result<Url> {
        let endpoint = self.config.end_session_endpoint();
        let mut url = Url::parse(&endpoint)
            .map_err(|e| RpError::Config(format!("invalid logout endpoint {endpoint}: {e}")))?;

        let target = post_logout_redirect_uri
            .or(self.config.post_logout_redirect_uri.as_deref())
            .filter(|u| !u.trim().is_empty());

        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id);
        if let Some(target) = target {
            let return_to = origin.resolve(target)?;
            url.query_pairs_mut().append_pair("returnTo", return_to.as_str());
        }

        Ok(url)
    }

    /// POSTs `params` (plus client credentials) to the token endpoint.
    async fn post_token<'a>(
        &'a self,
        mut params: HashMap<&'a str, &'a str>,
    ) -> Result<TokenResponse> {
        params.insert("client_id", &self.config.client_id);
        if let Some(ref secret) = self.config.client_secret {
            params.insert("client_secret", secret);
        }

        let endpoint = self.config.token_endpoint();
        let resp = transport::send_with_retry(|| self.http.post(&endpoint).form(&params))
            .await
            .map_err(|e| {
                let transient = transport::is_transient(&e);
                tracing::error!(error = %e, transient, "Token endpoint request failed");
                RpError::TokenExchange {
                    message: format!("token endpoint request failed: {e}"),
                    status: None,
                    body: None,
                    transient,
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                body = %body,
                "Token endpoint rejected the request"
            );
            return Err(RpError::TokenExchange {
                message: format!("token endpoint returned {status}"),
                status: Some(status.as_u16()),
                body: Some(body),
                transient: false,
            });
        }

        resp.json::<TokenResponse>()
            .await
            .map_err(|e| RpError::TokenExchange {
                message: format!("failed to parse token response: {e}"),
                status: Some(status.as_u16()),
                body: None,
                transient: false,
            })
    }
}

// ---------------------------------------------------------------------------
// Utility functions
// ---------------------------------------------------------------------------

/// 32 random bytes, base64url without padding.
fn random_value() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Byte comparison whose duration does not depend on where inputs differ.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Short, non-replayable prefix of a state value for log lines.
pub(crate) fn state_prefix(state: &str) -> &str {
    state.get(..8).unwrap_or(state)
}
