//! The authenticated user identity stored in a session

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::oidc::client::TokenSet;

/// Well-known principal attributes reachable without knowing claim names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKey {
    Subject,
    Name,
    AccessToken,
    IdToken,
}

/// Tokens persisted alongside the principal.
///
/// Empty unless token saving is enabled or an API audience was requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredTokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredTokens {
    /// Copies every token of `tokens`.
    pub fn from_token_set(tokens: &TokenSet) -> Self {
        Self {
            id_token: Some(tokens.id_token.clone()),
            access_token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone(),
            token_type: Some(tokens.token_type.clone()),
            expires_at: tokens.expires_at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// An authenticated identity derived from a validated ID token.
///
/// `subject` and `name` are lifted out of the claims; every claim of the ID
/// token, provider-specific ones included, stays available in `claims`.
///
/// # Examples
///
/// ```
/// use oidc_rp::session::principal::{ClaimKey, Principal};
/// use serde_json::json;
///
/// let claims = json!({"sub": "auth0|42", "name": "Ada", "org": "acme"});
/// let principal = Principal::from_claims(claims.as_object().unwrap().clone(), "name").unwrap();
///
/// assert_eq!(principal.get(ClaimKey::Subject), Some("auth0|42"));
/// assert_eq!(principal.get(ClaimKey::Name), Some("Ada"));
/// assert_eq!(principal.claim("org").and_then(|v| v.as_str()), Some("acme"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    /// The `sub` claim
    pub subject: String,
    /// Display name taken from the configured name claim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// All claims of the ID token
    pub claims: Map<String, Value>,
    #[serde(default, skip_serializing_if = "StoredTokens::is_empty")]
    pub tokens: StoredTokens,
    /// When the session credential lapses; `None` leaves it to the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub authenticated_at: DateTime<Utc>,
}

impl Principal {
    /// Builds a principal from verified ID token claims.
    ///
    /// Returns `None` when the claims carry no string `sub`.
    pub fn from_claims(claims: Map<String, Value>, name_claim: &str) -> Option<Self> {
        let subject = claims.get("sub")?.as_str()?.to_string();
        let name = claims
            .get(name_claim)
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(Self {
            subject,
            name,
            claims,
            tokens: StoredTokens::default(),
            expires_at: None,
            authenticated_at: Utc::now(),
        })
    }

    /// Attaches tokens and takes the session expiry from the access token.
    pub fn with_tokens(mut self, tokens: StoredTokens) -> Self {
        self.expires_at = tokens.expires_at;
        self.tokens = tokens;
        self
    }

    /// Typed access to the well-known attributes.
    pub fn get(&self, key: ClaimKey) -> Option<&str> {
        match key {
            ClaimKey::Subject => Some(self.subject.as_str()),
            ClaimKey::Name => self.name.as_deref(),
            ClaimKey::AccessToken => self.tokens.access_token.as_deref(),
            ClaimKey::IdToken => self.tokens.id_token.as_deref(),
        }
    }

    /// Raw claim lookup.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
