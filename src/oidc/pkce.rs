//! PKCE S256 verifier/challenge pairs (RFC 7636)
//!
//! A fresh pair is created for every login attempt. The challenge travels on
//! the authorization request; the verifier stays in the pending login record
//! and is presented to the token endpoint when the code is redeemed.

use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::oidc::discovery::ProviderMetadata;

/// Challenge method sent with every authorization request.
pub const S256: &str = "S256";

/// A PKCE S256 challenge pair.
///
/// # Examples
///
/// ```
/// use oidc_rp::oidc::pkce::PkceChallenge;
///
/// let pkce = PkceChallenge::generate();
/// assert_eq!(pkce.method, "S256");
/// assert_eq!(pkce.verifier.len(), 43);
/// assert_eq!(PkceChallenge::challenge_for(&pkce.verifier), pkce.challenge);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    /// 32 random bytes, base64url without padding (43 characters)
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`
    pub challenge: String,
    /// Always `S256`
    pub method: String,
}

impl PkceChallenge {
    /// Generates a fresh verifier and derives its challenge.
    pub fn generate() -> Self {
        use rand::RngCore as _;

        let mut random_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut random_bytes);
        let verifier = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(random_bytes);
        let challenge = Self::challenge_for(&verifier);

        Self {
            verifier,
            challenge,
            method: S256.to_string(),
        }
    }

    /// Derives the S256 challenge for an existing verifier.
    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest.as_slice())
    }
}

/// Whether the provider advertises S256.
///
/// Providers that omit `code_challenge_methods_supported` are given the
/// benefit of the doubt, since many accept PKCE without advertising it.
pub fn provider_supports_s256(metadata: &ProviderMetadata) -> bool {
    match metadata.code_challenge_methods_supported.as_deref() {
        None => true,
        Some(methods) => methods.iter().any(|m| m == S256),
    }
}
