//! oidc-rp - OpenID Connect relying-party library
//!
//! This library implements the client side of the OpenID Connect
//! Authorization Code flow: starting a login, redeeming the authorization
//! code, validating the ID token and managing the local session.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `oidc`: provider protocol (authorization request, token exchange,
//!   logout URL, discovery, JWKS cache, ID token validation)
//! - `session`: principal, session capability, pending login records
//! - `orchestrator`: the per-attempt login state machine
//! - `server`: reference `axum` host
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use oidc_rp::{Authenticator, ClientConfig, MemorySessionStore};
//!
//! # async fn example() -> oidc_rp::Result<()> {
//! let auth = Authenticator::from_config(ClientConfig::new(
//!     "tenant.example.com",
//!     "my-client",
//!     "https://app.example.com/callback",
//! ))?;
//!
//! let request = auth.challenge(Some("/dashboard")).await?;
//! println!("redirect to {}", request.url);
//!
//! let sessions = Arc::new(MemorySessionStore::new(Duration::from_secs(3600)));
//! let session = sessions.new_session();
//! assert!(auth.current_principal(&session).await?.is_none());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod oidc;
pub mod orchestrator;
pub mod server;
pub mod session;

// Re-export commonly used types
pub use config::{ClientConfig, Config, ServerConfig};
pub use error::{Result, RpError};
pub use oidc::{AuthorizationRequest, OidcClient, RequestOrigin, TokenSet, TokenValidator};
pub use orchestrator::{Authenticator, CallbackParams, CompletedLogin, LoginState};
pub use session::{MemorySessionStore, Principal, SessionStore};
