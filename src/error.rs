//! Error types for oidc-rp
//!
//! This module defines the error taxonomy used by the relying-party core,
//! using `thiserror` for ergonomic error handling.  Every failure of a login
//! attempt maps to exactly one variant so callers can log precisely while the
//! browser only ever sees a generic outcome.

use thiserror::Error;

/// Main error type for relying-party operations
///
/// Variants fall into four groups:
///
/// - startup: [`RpError::Config`]
/// - CSRF / replay suspects: [`RpError::StateMismatch`],
///   [`RpError::UnknownState`], [`RpError::NonceMismatch`]
/// - provider back-channel: [`RpError::TokenExchange`],
///   [`RpError::Discovery`], [`RpError::AuthorizationDenied`]
/// - token validation: [`RpError::InvalidSignature`],
///   [`RpError::IssuerMismatch`], [`RpError::AudienceMismatch`],
///   [`RpError::ExpiredToken`]
#[derive(Error, Debug)]
pub enum RpError {
    /// Missing or out-of-range settings; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// The `state` returned by the provider differs from the one issued
    #[error("State mismatch in authorization callback")]
    StateMismatch,

    /// No live pending login matches the callback `state`
    #[error("Unknown or expired login state")]
    UnknownState,

    /// The ID token `nonce` differs from the one issued with the challenge
    #[error("Nonce mismatch in ID token")]
    NonceMismatch,

    /// The provider redirected back with an `error` parameter
    #[error("Authorization denied by provider: {error}")]
    AuthorizationDenied {
        /// OAuth error code (e.g. `access_denied`)
        error: String,
        /// Optional human-readable description from the provider
        description: Option<String>,
    },

    /// The code-for-token exchange failed
    ///
    /// `body` holds the provider's response body for diagnostics.  It must
    /// never be reflected to the end user.
    #[error("Token exchange failed: {message}")]
    TokenExchange {
        /// Short description of the failure
        message: String,
        /// HTTP status returned by the token endpoint, if any
        status: Option<u16>,
        /// Raw response body returned by the token endpoint, if any
        body: Option<String>,
        /// Whether the failure was a transient network error
        transient: bool,
    },

    /// Provider metadata or signing keys could not be retrieved
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Signature, algorithm or key lookup failure on the ID token
    #[error("Invalid ID token signature: {0}")]
    InvalidSignature(String),

    /// The `iss` claim does not equal the configured issuer
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer found in the token
        actual: String,
    },

    /// The `aud` claim does not contain the configured client id
    #[error("Audience mismatch: token is not issued for client {client_id}")]
    AudienceMismatch {
        /// Configured client identifier
        client_id: String,
    },

    /// The `exp` claim is in the past (after clock skew)
    #[error("ID token expired at {expired_at} (now {now})")]
    ExpiredToken {
        /// Expiry from the token, seconds since the epoch
        expired_at: i64,
        /// Validation time, seconds since the epoch
        now: i64,
    },

    /// Session store failures reported by the host implementation
    #[error("Session error: {0}")]
    Session(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpError {
    /// Stable snake_case label for structured logs.
    ///
    /// # Examples
    ///
    /// ```
    /// use oidc_rp::error::RpError;
    ///
    /// assert_eq!(RpError::UnknownState.kind(), "unknown_state");
    /// ```
    pub fn kind(&self) -> &'static str {
        match self {
            RpError::Config(_) => "config",
            RpError::StateMismatch => "state_mismatch",
            RpError::UnknownState => "unknown_state",
            RpError::NonceMismatch => "nonce_mismatch",
            RpError::AuthorizationDenied { .. } => "authorization_denied",
            RpError::TokenExchange { .. } => "token_exchange",
            RpError::Discovery(_) => "discovery",
            RpError::InvalidSignature(_) => "invalid_signature",
            RpError::IssuerMismatch { .. } => "issuer_mismatch",
            RpError::AudienceMismatch { .. } => "audience_mismatch",
            RpError::ExpiredToken { .. } => "expired_token",
            RpError::Session(_) => "session",
            RpError::Serialization(_) => "serialization",
            RpError::Yaml(_) => "yaml",
            RpError::Io(_) => "io",
        }
    }

    /// Returns `true` for failures that indicate a possible CSRF or replay
    /// attempt.  These are always rejected and logged at warning level.
    pub fn is_replay_suspect(&self) -> bool {
        matches!(
            self,
            RpError::StateMismatch | RpError::UnknownState | RpError::NonceMismatch
        )
    }

    /// Returns `true` for failures that make the presented ID token unusable.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            RpError::InvalidSignature(_)
                | RpError::IssuerMismatch { .. }
                | RpError::AudienceMismatch { .. }
                | RpError::ExpiredToken { .. }
        )
    }

    /// Returns `true` only for transient network failures of the token
    /// exchange, the single case that is ever retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpError::TokenExchange {
                transient: true,
                ..
            }
        )
    }
}

/// Result type alias for relying-party operations
pub type Result<T, E = RpError> = std::result::Result<T, E>;
