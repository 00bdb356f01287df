//! Configuration management for oidc-rp
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! The relying-party settings ([`ClientConfig`]) are immutable once loaded;
//! the reference host has its own [`ServerConfig`] block.

use crate::error::{Result, RpError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Relying-party (OIDC client) settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Reference host settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// OIDC client registration and validation settings
///
/// Immutable after construction; shared by the OIDC client, the token
/// validator and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Issuer URL, or a bare provider domain (normalised to
    /// `https://<domain>/`)
    #[serde(default)]
    pub issuer: String,

    /// Client identifier registered with the provider
    #[serde(default)]
    pub client_id: String,

    /// Client secret, set for confidential clients only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Absolute callback URL registered with the provider
    #[serde(default)]
    pub redirect_uri: String,

    /// Where the provider sends the browser after logout; may be relative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_logout_redirect_uri: Option<String>,

    /// Scopes requested at login; `openid` is always added
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    /// Downstream API audience for access tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,

    /// Claim mapped to the principal's display name
    #[serde(default = "default_name_claim")]
    pub name_claim: String,

    /// Clock skew tolerated on `exp` (seconds)
    #[serde(default = "default_clock_skew")]
    pub clock_skew_seconds: u64,

    /// Timeout for every call to the provider (seconds)
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,

    /// Lifetime of a pending login record (seconds)
    #[serde(default = "default_pending_ttl")]
    pub pending_ttl_seconds: u64,

    /// Interval after which cached signing keys are refetched (seconds)
    #[serde(default = "default_jwks_refresh")]
    pub jwks_refresh_seconds: u64,

    /// Send a PKCE S256 challenge with every authorization request
    #[serde(default = "default_use_pkce")]
    pub use_pkce: bool,

    /// Persist the token set in the principal
    #[serde(default)]
    pub save_tokens: bool,

    /// Accepted ID token signing algorithms
    #[serde(default = "default_allowed_algorithms")]
    pub allowed_algorithms: Vec<String>,

    /// Override for the authorization endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,

    /// Override for the token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,

    /// Override for the provider logout endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// Override for the JWKS location (skips discovery)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string()]
}

fn default_name_claim() -> String {
    "name".to_string()
}

fn default_clock_skew() -> u64 {
    300
}

fn default_http_timeout() -> u64 {
    10
}

fn default_pending_ttl() -> u64 {
    600
}

fn default_jwks_refresh() -> u64 {
    3600
}

fn default_use_pkce() -> bool {
    true
}

fn default_allowed_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

/// Upper bound on tolerated clock skew
pub const MAX_CLOCK_SKEW_SECONDS: u64 = 300;

/// Upper bound on the provider call timeout
pub const MAX_HTTP_TIMEOUT_SECONDS: u64 = 10;

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: String::new(),
            post_logout_redirect_uri: None,
            scopes: default_scopes(),
            audience: None,
            name_claim: default_name_claim(),
            clock_skew_seconds: default_clock_skew(),
            http_timeout_seconds: default_http_timeout(),
            pending_ttl_seconds: default_pending_ttl(),
            jwks_refresh_seconds: default_jwks_refresh(),
            use_pkce: default_use_pkce(),
            save_tokens: false,
            allowed_algorithms: default_allowed_algorithms(),
            authorization_endpoint: None,
            token_endpoint: None,
            end_session_endpoint: None,
            jwks_uri: None,
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with the three required settings and
    /// defaults for everything else.
    ///
    /// # Examples
    ///
    /// ```
    /// use oidc_rp::config::ClientConfig;
    ///
    /// let config = ClientConfig::new(
    ///     "tenant.example.com",
    ///     "my-client",
    ///     "https://app.example.com/callback",
    /// );
    /// assert_eq!(config.normalized_issuer(), "https://tenant.example.com/");
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            ..Self::default()
        }
    }

    /// Returns the issuer identifier compared against the `iss` claim.
    ///
    /// A bare domain becomes `https://<domain>/`; a value that already has a
    /// scheme is returned unchanged (trimmed).
    pub fn normalized_issuer(&self) -> String {
        let issuer = self.issuer.trim();
        if issuer.is_empty() || issuer.contains("://") {
            issuer.to_string()
        } else {
            format!("https://{}/", issuer.trim_end_matches('/'))
        }
    }

    /// Joins `path` onto the issuer without doubling the slash.
    fn issuer_endpoint(&self, path: &str) -> String {
        format!("{}{}", self.normalized_issuer().trim_end_matches('/'), path)
    }

    /// Authorization endpoint (`{issuer}/authorize` unless overridden).
    pub fn authorization_endpoint(&self) -> String {
        self.authorization_endpoint
            .clone()
            .unwrap_or_else(|| self.issuer_endpoint("/authorize"))
    }

    /// Token endpoint (`{issuer}/oauth/token` unless overridden).
    pub fn token_endpoint(&self) -> String {
        self.token_endpoint
            .clone()
            .unwrap_or_else(|| self.issuer_endpoint("/oauth/token"))
    }

    /// Provider logout endpoint (`{issuer}/v2/logout` unless overridden).
    pub fn end_session_endpoint(&self) -> String {
        self.end_session_endpoint
            .clone()
            .unwrap_or_else(|| self.issuer_endpoint("/v2/logout"))
    }

    /// Discovery document location.
    pub fn discovery_endpoint(&self) -> String {
        self.issuer_endpoint("/.well-known/openid-configuration")
    }

    /// Space-separated scope string with `openid` guaranteed first.
    pub fn scope_string(&self) -> String {
        let mut scopes: Vec<&str> = vec!["openid"];
        for scope in &self.scopes {
            let scope = scope.trim();
            if !scope.is_empty() && !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        scopes.join(" ")
    }

    /// Ensures the settings needed to run a login are present and sane.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(RpError::Config("issuer is required".to_string()));
        }

        Url::parse(&self.normalized_issuer())
            .map_err(|e| RpError::Config(format!("issuer is not a valid URL: {e}")))?;

        if self.client_id.trim().is_empty() {
            return Err(RpError::Config("client_id is required".to_string()));
        }

        if self.redirect_uri.trim().is_empty() {
            return Err(RpError::Config("redirect_uri is required".to_string()));
        }

        Url::parse(&self.redirect_uri)
            .map_err(|e| RpError::Config(format!("redirect_uri must be absolute: {e}")))?;

        if self.clock_skew_seconds > MAX_CLOCK_SKEW_SECONDS {
            return Err(RpError::Config(format!(
                "clock_skew_seconds must be less than or equal to {MAX_CLOCK_SKEW_SECONDS}"
            )));
        }

        if self.http_timeout_seconds == 0 || self.http_timeout_seconds > MAX_HTTP_TIMEOUT_SECONDS
        {
            return Err(RpError::Config(format!(
                "http_timeout_seconds must be between 1 and {MAX_HTTP_TIMEOUT_SECONDS}"
            )));
        }

        if self.pending_ttl_seconds == 0 {
            return Err(RpError::Config(
                "pending_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.allowed_algorithms.is_empty() {
            return Err(RpError::Config(
                "allowed_algorithms must not be empty".to_string(),
            ));
        }

        for alg in &self.allowed_algorithms {
            if alg.to_ascii_uppercase().starts_with("HS") || alg.eq_ignore_ascii_case("none") {
                return Err(RpError::Config(format!(
                    "algorithm {alg} is not allowed for ID tokens"
                )));
            }
        }

        if self.name_claim.trim().is_empty() {
            return Err(RpError::Config("name_claim must not be empty".to_string()));
        }

        Ok(())
    }
}

/// Reference host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Name of the session id cookie
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Mark cookies `Secure`
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,

    /// Session lifetime (seconds)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_seconds: u64,

    /// Local path of the generic authentication-failure page
    #[serde(default = "default_error_path")]
    pub error_path: String,

    /// Path prefix the application is mounted under (e.g. `/app`)
    #[serde(default)]
    pub path_base: String,

    /// Scheme assumed when the request does not carry one
    #[serde(default = "default_scheme")]
    pub default_scheme: String,

    /// Honour `X-Forwarded-Proto` / `X-Forwarded-Host`
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    /// Interval between sweeps of expired sessions and pending logins
    #[serde(default = "default_purge_interval")]
    pub purge_interval_seconds: u64,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_cookie_name() -> String {
    "oidc_rp_session".to_string()
}

fn default_secure_cookies() -> bool {
    true
}

fn default_session_ttl() -> u64 {
    8 * 60 * 60
}

fn default_error_path() -> String {
    "/auth/error".to_string()
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_purge_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cookie_name: default_cookie_name(),
            secure_cookies: default_secure_cookies(),
            session_ttl_seconds: default_session_ttl(),
            error_path: default_error_path(),
            path_base: String::new(),
            default_scheme: default_scheme(),
            trust_forwarded_headers: false,
            purge_interval_seconds: default_purge_interval(),
        }
    }
}

impl ServerConfig {
    /// Validate the host settings
    pub fn validate(&self) -> Result<()> {
        self.bind
            .parse::<SocketAddr>()
            .map_err(|e| RpError::Config(format!("invalid bind address {}: {e}", self.bind)))?;

        if self.cookie_name.trim().is_empty() {
            return Err(RpError::Config("cookie_name must not be empty".to_string()));
        }

        if self.session_ttl_seconds == 0 {
            return Err(RpError::Config(
                "session_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if !self.error_path.starts_with('/') || self.error_path.starts_with("//") {
            return Err(RpError::Config(
                "error_path must be a local absolute path".to_string(),
            ));
        }

        if !self.path_base.is_empty() && !self.path_base.starts_with('/') {
            return Err(RpError::Config(
                "path_base must be empty or start with '/'".to_string(),
            ));
        }

        if !matches!(self.default_scheme.as_str(), "http" | "https") {
            return Err(RpError::Config(
                "default_scheme must be http or https".to_string(),
            ));
        }

        if self.purge_interval_seconds == 0 {
            return Err(RpError::Config(
                "purge_interval_seconds must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RpError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RpError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(issuer) = std::env::var("OIDC_RP_ISSUER") {
            self.client.issuer = issuer;
        }

        if let Ok(client_id) = std::env::var("OIDC_RP_CLIENT_ID") {
            self.client.client_id = client_id;
        }

        if let Ok(secret) = std::env::var("OIDC_RP_CLIENT_SECRET") {
            self.client.client_secret = Some(secret).filter(|s| !s.is_empty());
        }

        if let Ok(redirect_uri) = std::env::var("OIDC_RP_REDIRECT_URI") {
            self.client.redirect_uri = redirect_uri;
        }

        if let Ok(uri) = std::env::var("OIDC_RP_POST_LOGOUT_REDIRECT_URI") {
            self.client.post_logout_redirect_uri = Some(uri).filter(|s| !s.is_empty());
        }

        if let Ok(audience) = std::env::var("OIDC_RP_AUDIENCE") {
            self.client.audience = Some(audience).filter(|s| !s.is_empty());
        }

        if let Ok(scopes) = std::env::var("OIDC_RP_SCOPES") {
            let parsed: Vec<String> = scopes
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if parsed.is_empty() {
                tracing::warn!("Ignoring empty OIDC_RP_SCOPES");
            } else {
                tracing::debug!(?parsed, "Env override: OIDC_RP_SCOPES");
                self.client.scopes = parsed;
            }
        }

        if let Ok(skew) = std::env::var("OIDC_RP_CLOCK_SKEW_SECONDS") {
            match skew.parse::<u64>() {
                Ok(v) => self.client.clock_skew_seconds = v,
                Err(_) => tracing::warn!("Invalid OIDC_RP_CLOCK_SKEW_SECONDS: {}", skew),
            }
        }

        if let Ok(bind) = std::env::var("OIDC_RP_BIND") {
            self.server.bind = bind;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let crate::cli::Commands::Serve {
            bind: Some(ref bind),
        } = cli.command
        {
            self.server.bind = bind.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] if any validation check fails
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.server.validate()
    }

    /// Copy of the configuration with the client secret masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.client.client_secret.is_some() {
            copy.client.client_secret = Some("********".to_string());
        }
        copy
    }
}
