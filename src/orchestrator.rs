//! Authentication orchestrator
//!
//! Drives one login attempt through its states:
//!
//! ```text
//! Unauthenticated -> ChallengeIssued -> CodeReceived -> Validated -> SessionEstablished
//!                          \________________\______________\
//!                                                           -> Rejected
//! ```
//!
//! [`Authenticator::challenge`] issues the provider redirect and records a
//! pending login; [`Authenticator::complete_callback`] consumes it, redeems
//! the code, validates the ID token and stores the principal in the session
//! it is handed. Any failure rejects the attempt and leaves the session
//! untouched; the browser starts over from `Unauthenticated`.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Result, RpError};
use crate::oidc::client::{state_prefix, AuthorizationRequest, OidcClient, RequestOrigin, TokenSet};
use crate::oidc::jwks::JwksCache;
use crate::oidc::transport;
use crate::oidc::validator::TokenValidator;
use crate::session::pending::{MemoryPendingStore, PendingLogin, PendingStore};
use crate::session::principal::{Principal, StoredTokens};
use crate::session::store::SessionStore;

// ---------------------------------------------------------------------------
// Login state machine
// ---------------------------------------------------------------------------

/// Lifecycle of a single login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Unauthenticated,
    ChallengeIssued,
    CodeReceived,
    Validated,
    SessionEstablished,
    Rejected,
}

impl LoginState {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: LoginState) -> bool {
        use LoginState::*;
        matches!(
            (self, next),
            (Unauthenticated, ChallengeIssued)
                | (ChallengeIssued, CodeReceived)
                | (CodeReceived, Validated)
                | (Validated, SessionEstablished)
                | (ChallengeIssued, Rejected)
                | (CodeReceived, Rejected)
                | (Validated, Rejected)
                | (Rejected, Unauthenticated)
                | (SessionEstablished, Unauthenticated)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoginState::SessionEstablished | LoginState::Rejected)
    }
}

/// Tracks one callback through the state machine for logging.
struct LoginAttempt<'a> {
    state: LoginState,
    correlation: &'a str,
}

impl<'a> LoginAttempt<'a> {
    fn resume(correlation: &'a str) -> Self {
        Self {
            state: LoginState::ChallengeIssued,
            correlation,
        }
    }

    fn advance(&mut self, next: LoginState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal login transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::debug!(
            state = %self.correlation,
            from = ?self.state,
            to = ?next,
            "Login attempt advanced"
        );
        self.state = next;
    }

    fn reject(&mut self, err: &RpError) {
        if !self.state.is_terminal() {
            self.advance(LoginState::Rejected);
        }
        let kind = err.kind();
        if err.is_replay_suspect() {
            tracing::warn!(state = %self.correlation, kind, error = %err, "Rejected login callback");
        } else if err.is_token_rejection() {
            tracing::warn!(state = %self.correlation, kind, error = %err, "ID token rejected");
        } else if err.is_transient() {
            tracing::warn!(state = %self.correlation, kind, error = %err, "Provider unreachable during token exchange");
        } else if matches!(err, RpError::AuthorizationDenied { .. }) {
            tracing::info!(state = %self.correlation, kind, error = %err, "Provider denied authorization");
        } else {
            tracing::error!(state = %self.correlation, kind, error = %err, "Login attempt failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// Query parameters of the provider's redirect back to the application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn success(code: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            state: Some(state.into()),
            ..Self::default()
        }
    }

    pub fn denied(state: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Outcome of a successful callback.
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub principal: Principal,
    /// Local path recorded at challenge time
    pub return_url: String,
}

/// Replaces anything that is not a local absolute path with `/`.
///
/// # Examples
///
/// ```
/// use oidc_rp::orchestrator::sanitize_return_url;
///
/// assert_eq!(sanitize_return_url(Some("/dashboard?tab=1")), "/dashboard?tab=1");
/// assert_eq!(sanitize_return_url(Some("https://evil.example.com")), "/");
/// assert_eq!(sanitize_return_url(Some("//evil.example.com")), "/");
/// assert_eq!(sanitize_return_url(None), "/");
/// ```
pub fn sanitize_return_url(return_url: Option<&str>) -> String {
    match return_url.map(str::trim) {
        Some(url)
            if url.starts_with('/')
                && !url.starts_with("//")
                && !url.starts_with("/\\")
                && !url.chars().any(char::is_control) =>
        {
            url.to_string()
        }
        _ => "/".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Authenticator
// ---------------------------------------------------------------------------

/// Orchestrates challenge, callback and logout.
///
/// Long-lived collaborators are injected at construction; the session of
/// the exchange being served is passed to each call.
pub struct Authenticator {
    config: Arc<ClientConfig>,
    client: OidcClient,
    validator: TokenValidator,
    pending: Arc<dyn PendingStore>,
}

impl Authenticator {
    pub fn new(
        config: Arc<ClientConfig>,
        client: OidcClient,
        validator: TokenValidator,
        pending: Arc<dyn PendingStore>,
    ) -> Self {
        Self {
            config,
            client,
            validator,
            pending,
        }
    }

    /// Wires the default collaborators: one shared HTTP client, a JWKS cache
    /// and an in-memory pending store.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Config`] if the configuration is invalid.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let http = transport::build_http_client(&config)?;

        let client = OidcClient::with_http_client(Arc::clone(&config), http.clone());
        let jwks = Arc::new(JwksCache::new(http, Arc::clone(&config)));
        let validator = TokenValidator::new(Arc::clone(&config), jwks)?;
        let pending = Arc::new(MemoryPendingStore::new(Duration::from_secs(
            config.pending_ttl_seconds,
        )));

        Ok(Self::new(config, client, validator, pending))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client(&self) -> &OidcClient {
        &self.client
    }

    pub fn pending(&self) -> &Arc<dyn PendingStore> {
        &self.pending
    }

    /// Starts a login attempt.
    ///
    /// Records the pending login and returns the request whose `url` the
    /// browser must be redirected to. A `return_url` that is not a local
    /// path is replaced with `/`.
    ///
    /// # Errors
    ///
    /// [`RpError::Config`] if the request cannot be built.
    pub async fn challenge(&self, return_url: Option<&str>) -> Result<AuthorizationRequest> {
        let request = self.client.build_authorization_request(None)?;
        let return_url = sanitize_return_url(return_url);

        self.pending
            .put(PendingLogin {
                state: request.state.clone(),
                nonce: request.nonce.clone(),
                return_url: return_url.clone(),
                code_verifier: request.code_verifier.clone(),
                audience: request.audience.clone(),
            })
            .await?;

        tracing::info!(
            state = %state_prefix(&request.state),
            return_url = %return_url,
            "Login challenge issued"
        );

        Ok(request)
    }

    /// Finishes a login attempt from the provider's callback.
    ///
    /// The pending login for `state` is consumed in every case, including a
    /// provider error, so a `state` can never be redeemed twice.
    ///
    /// # Errors
    ///
    /// - [`RpError::AuthorizationDenied`] if the provider returned an error
    /// - [`RpError::UnknownState`] if no live pending login matches
    /// - any token exchange or validation error
    /// - [`RpError::Session`] if the session store fails
    pub async fn complete_callback(
        &self,
        session: &dyn SessionStore,
        callback: &CallbackParams,
    ) -> Result<CompletedLogin> {
        let state = callback.state.as_deref().unwrap_or("");
        let mut attempt = LoginAttempt::resume(state_prefix(state));

        let result = self.run_callback(&mut attempt, session, callback, state).await;
        match &result {
            Ok(done) => tracing::info!(
                state = %attempt.correlation,
                subject = %done.principal.subject,
                "Login completed"
            ),
            Err(e) => attempt.reject(e),
        }
        result
    }

    async fn run_callback(
        &self,
        attempt: &mut LoginAttempt<'_>,
        session: &dyn SessionStore,
        callback: &CallbackParams,
        state: &str,
    ) -> Result<CompletedLogin> {
        if let Some(error) = callback.error.as_deref() {
            if !state.is_empty() {
                self.pending.consume(state).await?;
            }
            return Err(RpError::AuthorizationDenied {
                error: error.to_string(),
                description: callback.error_description.clone(),
            });
        }

        if state.is_empty() {
            return Err(RpError::UnknownState);
        }
        let pending = self
            .pending
            .consume(state)
            .await?
            .ok_or(RpError::UnknownState)?;

        attempt.advance(LoginState::CodeReceived);
        let code = callback
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| RpError::AuthorizationDenied {
                error: "invalid_request".to_string(),
                description: Some("callback carried no authorization code".to_string()),
            })?;

        let tokens = self
            .client
            .exchange_code(
                code,
                &pending.state,
                state,
                pending.code_verifier.as_deref(),
            )
            .await?;

        let mut principal = self.validator.validate(&tokens.id_token, &pending.nonce).await?;
        attempt.advance(LoginState::Validated);

        if self.config.save_tokens || pending.audience.is_some() {
            principal = principal.with_tokens(StoredTokens::from_token_set(&tokens));
        }

        session.set(principal.clone()).await?;
        attempt.advance(LoginState::SessionEstablished);

        Ok(CompletedLogin {
            principal,
            return_url: pending.return_url,
        })
    }

    /// Signs the user out locally and returns the provider logout URL.
    ///
    /// The session is cleared before the URL is built; a failing clear is
    /// logged and does not prevent the redirect.
    ///
    /// # Errors
    ///
    /// [`RpError::Config`] if the logout URL cannot be built.
    pub async fn logout(
        &self,
        session: &dyn SessionStore,
        post_logout_redirect_uri: Option<&str>,
        origin: &RequestOrigin,
    ) -> Result<Url> {
        if let Err(e) = session.clear().await {
            tracing::warn!(error = %e, "Failed to clear session during logout");
        }

        let url = self
            .client
            .build_logout_url(post_logout_redirect_uri, origin)?;
        tracing::info!("User signed out");
        Ok(url)
    }

    /// Returns the session's principal, dropping it if it has expired.
    pub async fn current_principal(&self, session: &dyn SessionStore) -> Result<Option<Principal>> {
        match session.get().await? {
            Some(principal) if principal.is_expired() => {
                tracing::debug!(subject = %principal.subject, "Session principal expired");
                session.clear().await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Renews the session's tokens with its refresh token.
    ///
    /// A new ID token, if returned, must validate and belong to the same
    /// subject. Returns `Ok(None)` when the session is empty.
    ///
    /// # Errors
    ///
    /// [`RpError::TokenExchange`] if the session holds no refresh token or
    /// the provider rejects it; validation errors for a bad new ID token.
    pub async fn refresh_session(&self, session: &dyn SessionStore) -> Result<Option<Principal>> {
        let Some(principal) = session.get().await? else {
            return Ok(None);
        };

        let stored = &principal.tokens;
        let current = TokenSet {
            id_token: stored.id_token.clone().unwrap_or_default(),
            access_token: stored.access_token.clone().unwrap_or_default(),
            refresh_token: stored.refresh_token.clone(),
            token_type: stored
                .token_type
                .clone()
                .unwrap_or_else(|| "Bearer".to_string()),
            expires_at: stored.expires_at,
            scope: None,
        };

        let renewed = self.client.refresh(&current).await?;

        let base = if Some(&renewed.id_token) != stored.id_token.as_ref() {
            let mut fresh = self
                .validator
                .validate_refreshed(&renewed.id_token, &principal.subject)
                .await?;
            fresh.authenticated_at = principal.authenticated_at;
            fresh
        } else {
            principal.clone()
        };

        let refreshed = base.with_tokens(StoredTokens::from_token_set(&renewed));
        session.set(refreshed.clone()).await?;
        tracing::info!(subject = %refreshed.subject, "Session tokens refreshed");
        Ok(Some(refreshed))
    }

    /// Drops expired pending logins.
    pub async fn purge_expired(&self) -> usize {
        self.pending.purge_expired().await
    }
}
