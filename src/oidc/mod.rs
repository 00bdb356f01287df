//! OpenID Connect protocol support
//!
//! - [`client`]: authorization request, code exchange, refresh, logout URL
//! - [`validator`]: ID token validation
//! - [`jwks`]: signing key cache
//! - [`discovery`]: provider metadata and JWKS location
//! - [`pkce`]: PKCE S256 challenge pairs
//! - [`transport`]: shared HTTP client with timeout and single retry

pub mod client;
pub mod discovery;
pub mod jwks;
pub mod pkce;
pub mod transport;
pub mod validator;

pub use client::{AuthorizationRequest, OidcClient, RequestOrigin, TokenSet};
pub use jwks::JwksCache;
pub use validator::TokenValidator;
