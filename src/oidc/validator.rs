//! ID token validation
//!
//! Checks, in order: header algorithm, signature (key located by `kid`),
//! issuer, audience, expiry and nonce. Each failure maps to its own error
//! variant so the cause can be logged precisely.

use std::str::FromStr;
use std::sync::Arc;

use base64::Engine as _;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ClientConfig;
use crate::error::{Result, RpError};
use crate::oidc::client::constant_time_eq;
use crate::oidc::jwks::JwksCache;
use crate::session::principal::Principal;

/// `aud` may be a single string or an array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl Audience {
    pub fn contains(&self, aud: &str) -> bool {
        match self {
            Audience::None => false,
            Audience::Single(s) => s == aud,
            Audience::Multiple(v) => v.iter().any(|a| a == aud),
        }
    }

    fn len(&self) -> usize {
        match self {
            Audience::None => 0,
            Audience::Single(_) => 1,
            Audience::Multiple(v) => v.len(),
        }
    }
}

/// Validates ID tokens against the configured issuer and client.
pub struct TokenValidator {
    config: Arc<ClientConfig>,
    jwks: Arc<JwksCache>,
    algorithms: Vec<Algorithm>,
}

impl TokenValidator {
    /// Creates a validator.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] if `allowed_algorithms` names an unknown
    /// or symmetric algorithm.
    pub fn new(config: Arc<ClientConfig>, jwks: Arc<JwksCache>) -> Result<Self> {
        let mut algorithms = Vec::with_capacity(config.allowed_algorithms.len());
        for name in &config.allowed_algorithms {
            let alg = Algorithm::from_str(name)
                .map_err(|_| RpError::Config(format!("unknown signing algorithm {name}")))?;
            if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                return Err(RpError::Config(format!(
                    "algorithm {name} is not allowed for ID tokens"
                )));
            }
            algorithms.push(alg);
        }

        Ok(Self {
            config,
            jwks,
            algorithms,
        })
    }

    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    /// Validates `id_token` and maps its claims into a [`Principal`].
    ///
    /// # Errors
    ///
    /// One of [`RpError::InvalidSignature`], [`RpError::IssuerMismatch`],
    /// [`RpError::AudienceMismatch`], [`RpError::ExpiredToken`] or
    /// [`RpError::NonceMismatch`]; [`RpError::Discovery`] if signing keys
    /// could not be fetched.
    pub async fn validate(&self, id_token: &str, expected_nonce: &str) -> Result<Principal> {
        self.validate_at(id_token, expected_nonce, chrono::Utc::now().timestamp())
            .await
    }

    /// [`Self::validate`] with an explicit validation time (seconds since
    /// the epoch).
    pub async fn validate_at(
        &self,
        id_token: &str,
        expected_nonce: &str,
        now: i64,
    ) -> Result<Principal> {
        let claims = self.verify(id_token, now).await?;

        let nonce = claims.get("nonce").and_then(Value::as_str).unwrap_or("");
        if !constant_time_eq(nonce.as_bytes(), expected_nonce.as_bytes()) {
            return Err(RpError::NonceMismatch);
        }

        self.principal(claims)
    }

    /// Validates an ID token obtained by refreshing an existing session.
    ///
    /// No nonce is expected, but the subject must match the session's.
    pub async fn validate_refreshed(&self, id_token: &str, subject: &str) -> Result<Principal> {
        let claims = self
            .verify(id_token, chrono::Utc::now().timestamp())
            .await?;

        let sub = claims.get("sub").and_then(Value::as_str).unwrap_or("");
        if sub != subject {
            return Err(RpError::InvalidSignature(
                "refreshed ID token is for a different subject".to_string(),
            ));
        }

        self.principal(claims)
    }

    /// Signature, issuer, audience and expiry checks.
    async fn verify(&self, id_token: &str, now: i64) -> Result<Map<String, Value>> {
        let header = decode_header(id_token)
            .map_err(|e| RpError::InvalidSignature(format!("malformed token: {e}")))?;

        if !self.algorithms.contains(&header.alg) {
            return Err(RpError::InvalidSignature(format!(
                "algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let key = self.jwks.get(header.kid.as_deref()).await?;
        if let Some(pinned) = key.algorithm {
            if pinned != header.alg {
                return Err(RpError::InvalidSignature(format!(
                    "key {} is for {:?}, token uses {:?}",
                    key.kid, pinned, header.alg
                )));
            }
        }

        let issuer = self.config.normalized_issuer();
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_audience(&[self.config.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        let data = decode::<Map<String, Value>>(id_token, &key.key, &validation)
            .map_err(|e| self.map_decode_error(e, id_token, now))?;
        let claims = data.claims;

        let exp = claims
            .get("exp")
            .and_then(Value::as_f64)
            .map(|v| v as i64)
            .ok_or_else(|| RpError::ExpiredToken { expired_at: 0, now })?;
        let skew = i64::try_from(self.config.clock_skew_seconds).unwrap_or(0);
        if now >= exp.saturating_add(skew) {
            return Err(RpError::ExpiredToken {
                expired_at: exp,
                now,
            });
        }

        let aud: Audience = claims
            .get("aud")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if aud.len() > 1 {
            if let Some(azp) = claims.get("azp").and_then(Value::as_str) {
                if azp != self.config.client_id {
                    return Err(RpError::AudienceMismatch {
                        client_id: self.config.client_id.clone(),
                    });
                }
            }
        }

        Ok(claims)
    }

    fn principal(&self, claims: Map<String, Value>) -> Result<Principal> {
        Principal::from_claims(claims, &self.config.name_claim)
            .ok_or_else(|| RpError::InvalidSignature("ID token has no subject".to_string()))
    }

    fn map_decode_error(
        &self,
        err: jsonwebtoken::errors::Error,
        id_token: &str,
        now: i64,
    ) -> RpError {
        match err.kind() {
            ErrorKind::InvalidIssuer => RpError::IssuerMismatch {
                expected: self.config.normalized_issuer(),
                actual: peek_claims(id_token)
                    .and_then(|c| c.get("iss").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_default(),
            },
            ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => RpError::IssuerMismatch {
                expected: self.config.normalized_issuer(),
                actual: String::new(),
            },
            ErrorKind::InvalidAudience => RpError::AudienceMismatch {
                client_id: self.config.client_id.clone(),
            },
            ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => RpError::AudienceMismatch {
                client_id: self.config.client_id.clone(),
            },
            ErrorKind::MissingRequiredClaim(claim) if claim == "exp" => RpError::ExpiredToken {
                expired_at: 0,
                now,
            },
            ErrorKind::MissingRequiredClaim(claim) => {
                RpError::InvalidSignature(format!("ID token is missing {claim}"))
            }
            _ => RpError::InvalidSignature(err.to_string()),
        }
    }
}

/// Decodes the payload without verifying it. Only for error reporting.
fn peek_claims(token: &str) -> Option<Map<String, Value>> {
    let payload = token.split('.').nth(1)?;
    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}
