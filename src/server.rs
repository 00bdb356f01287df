//! Reference HTTP host
//!
//! A thin `axum` router that maps browser requests onto the
//! [`Authenticator`]. Sessions are kept server-side in a
//! [`MemorySessionStore`]; the browser only holds an opaque session id
//! cookie.
//!
//! | Route | Behaviour |
//! |---|---|
//! | `GET /login?returnUrl=` | 302 to the provider |
//! | `GET /callback` | 302 to the stored return URL, or to the error page |
//! | `GET/POST /logout` | session cleared, 302 to the provider logout URL |
//! | `GET /me` | principal JSON, or 401 |
//! | `GET {error_path}` | generic failure page |

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};

use crate::config::{Config, ServerConfig};
use crate::error::Result;
use crate::oidc::client::RequestOrigin;
use crate::orchestrator::{sanitize_return_url, Authenticator, CallbackParams};
use crate::session::principal::Principal;
use crate::session::store::{MemorySessionStore, SessionHandle, SessionStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub sessions: Arc<MemorySessionStore>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    /// Builds the state from a validated configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let authenticator = Authenticator::from_config(config.client)?;
        let sessions = MemorySessionStore::new(Duration::from_secs(
            config.server.session_ttl_seconds,
        ));
        Ok(Self {
            authenticator: Arc::new(authenticator),
            sessions: Arc::new(sessions),
            server: Arc::new(config.server),
        })
    }

    /// Prefixes a local path with the configured path base.
    fn local_url(&self, path: &str) -> String {
        format!("{}{}", self.server.path_base.trim_end_matches('/'), path)
    }

    /// Session named by the request cookie, if any.
    fn existing_session(&self, jar: &CookieJar) -> Option<SessionHandle> {
        jar.get(&self.server.cookie_name)
            .map(|c| c.value())
            .filter(|id| !id.is_empty())
            .map(|id| self.sessions.handle(id))
    }

    fn error_redirect(&self) -> Response {
        redirect(&self.local_url(&self.server.error_path))
    }
}

fn cookie_path(server: &ServerConfig) -> String {
    if server.path_base.is_empty() {
        "/".to_string()
    } else {
        server.path_base.clone()
    }
}

/// Session id cookie scoped to the path base.
pub fn session_cookie(server: &ServerConfig, session_id: &str) -> Cookie<'static> {
    let max_age = i64::try_from(server.session_ttl_seconds).unwrap_or(i64::MAX);
    Cookie::build((server.cookie_name.clone(), session_id.to_string()))
        .http_only(true)
        .secure(server.secure_cookies)
        .same_site(SameSite::Lax)
        .path(cookie_path(server))
        .max_age(time::Duration::seconds(max_age))
        .build()
}

/// Expired session cookie that makes the browser drop its copy.
pub fn clear_session_cookie(server: &ServerConfig) -> Cookie<'static> {
    Cookie::build((server.cookie_name.clone(), String::new()))
        .http_only(true)
        .secure(server.secure_cookies)
        .same_site(SameSite::Lax)
        .path(cookie_path(server))
        .max_age(time::Duration::seconds(0))
        .build()
}

/// Builds the router.
pub fn router(state: AppState) -> Router {
    let error_path = state.server.error_path.clone();
    Router::new()
        .route("/login", get(login))
        .route("/callback", get(callback))
        .route("/logout", get(logout).post(logout))
        .route("/me", get(me))
        .route(&error_path, get(error_page))
        .with_state(state)
}

/// Periodically drops expired pending logins and sessions.
pub fn spawn_purge_task(state: AppState) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(state.server.purge_interval_seconds.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let pending = state.authenticator.purge_expired().await;
            let sessions = state.sessions.purge_expired();
            if pending + sessions > 0 {
                tracing::debug!(pending, sessions, "Purged expired state");
            }
        }
    })
}

/// Binds the listener and serves until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the address cannot
/// be bound.
pub async fn serve(config: Config) -> Result<()> {
    config.validate()?;
    let bind = config.server.bind.clone();
    let state = AppState::from_config(config)?;
    let purge = spawn_purge_task(state.clone());

    let listener = tokio::net::TcpListener::bind(bind.as_str()).await?;
    tracing::info!(bind = %bind, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    purge.abort();
    Ok(())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LoginQuery {
    #[serde(default, rename = "returnUrl", alias = "return_url")]
    return_url: Option<String>,
}

async fn login(State(state): State<AppState>, Query(query): Query<LoginQuery>) -> Response {
    match state.authenticator.challenge(query.return_url.as_deref()).await {
        Ok(request) => redirect(request.url.as_str()),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "Failed to start login");
            state.error_redirect()
        }
    }
}

async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    // Always a fresh id, so a pre-login session id is never promoted.
    let session = state.sessions.new_session();

    match state.authenticator.complete_callback(&session, &params).await {
        Ok(done) => {
            if let Some(previous) = state.existing_session(&jar) {
                if let Err(e) = previous.clear().await {
                    tracing::warn!(error = %e, "Failed to drop previous session");
                }
            }
            let jar = jar.add(session_cookie(&state.server, session.id()));
            (jar, redirect(&state.local_url(&done.return_url))).into_response()
        }
        Err(_) => state.error_redirect(),
    }
}

#[derive(Debug, Deserialize)]
struct LogoutQuery {
    #[serde(default, rename = "returnTo", alias = "return_to")]
    return_to: Option<String>,
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let session = state
        .existing_session(&jar)
        .unwrap_or_else(|| state.sessions.new_session());
    let origin = request_origin(&headers, &state.server);
    let return_to = query
        .return_to
        .as_deref()
        .map(|r| sanitize_return_url(Some(r)));

    let location = match state
        .authenticator
        .logout(&session, return_to.as_deref(), &origin)
        .await
    {
        Ok(url) => url.to_string(),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "Failed to build logout URL");
            state.local_url("/")
        }
    };
    let jar = jar.add(clear_session_cookie(&state.server));
    (jar, redirect(&location)).into_response()
}

/// Public view of a principal; tokens are never exposed.
#[derive(Debug, Serialize)]
struct PrincipalView<'a> {
    subject: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    claims: &'a serde_json::Map<String, serde_json::Value>,
}

impl<'a> From<&'a Principal> for PrincipalView<'a> {
    fn from(p: &'a Principal) -> Self {
        Self {
            subject: &p.subject,
            name: p.name.as_deref(),
            claims: &p.claims,
        }
    }
}

async fn me(State(state): State<AppState>, jar: CookieJar) -> Response {
    let Some(session) = state.existing_session(&jar) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    match state.authenticator.current_principal(&session).await {
        Ok(Some(principal)) => Json(PrincipalView::from(&principal)).into_response(),
        Ok(None) => StatusCode::UNAUTHORIZED.into_response(),
        Err(e) => {
            tracing::error!(kind = e.kind(), error = %e, "Failed to read session");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn error_page(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><title>Sign-in failed</title></head>\
         <body><h1>Authentication failed</h1>\
         <p>Please try again.</p><p><a href=\"{}\">Sign in</a></p></body></html>",
        state.local_url("/login")
    ))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn redirect(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Scheme, host and path base of the current request.
///
/// Forwarded headers are honoured only when the host is configured to
/// trust them.
pub fn request_origin(headers: &HeaderMap, server: &ServerConfig) -> RequestOrigin {
    let header_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    let forwarded = |name: &str| {
        if server.trust_forwarded_headers {
            header_value(name)
        } else {
            None
        }
    };

    let scheme = forwarded("x-forwarded-proto").unwrap_or_else(|| server.default_scheme.clone());
    let host = forwarded("x-forwarded-host")
        .or_else(|| header_value(header::HOST.as_str()))
        .unwrap_or_else(|| server.bind.clone());

    RequestOrigin::new(scheme, host, server.path_base.clone())
}
