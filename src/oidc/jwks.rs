//! Signing key cache
//!
//! Keys are fetched from the provider's JWKS endpoint and indexed by `kid`.
//! A lookup for an unknown `kid` triggers at most one refresh. Refreshes are
//! single flight: while one task fetches, concurrent callers wait on the
//! refresh gate and reuse its result instead of issuing their own request.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell, RwLock};

use crate::config::ClientConfig;
use crate::error::{Result, RpError};
use crate::oidc::discovery;
use crate::oidc::transport;

/// JWKS document.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// A single JSON Web Key; only the members needed for verification.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (`RSA`, `EC`)
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    /// `sig` or `enc`
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    // RSA
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,

    // EC
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// A verification key ready for use.
#[derive(Clone)]
pub struct CachedKey {
    pub kid: String,
    /// Algorithm pinned by the JWK, if it names one
    pub algorithm: Option<Algorithm>,
    pub key: DecodingKey,
}

impl std::fmt::Debug for CachedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl Jwk {
    /// Converts this JWK into a verification key.
    ///
    /// # Errors
    ///
    /// Returns [`RpError::Discovery`] for unsupported key types or curves and
    /// for malformed key material.
    pub fn to_cached_key(&self) -> Result<CachedKey> {
        let key = match self.kty.as_str() {
            "RSA" => {
                let n = self.member(&self.n, "n")?;
                let e = self.member(&self.e, "e")?;
                DecodingKey::from_rsa_components(n, e)
                    .map_err(|err| RpError::Discovery(format!("invalid RSA key: {err}")))?
            }
            "EC" => {
                let crv = self.member(&self.crv, "crv")?;
                if !matches!(crv, "P-256" | "P-384") {
                    return Err(RpError::Discovery(format!("unsupported EC curve {crv}")));
                }
                let x = self.member(&self.x, "x")?;
                let y = self.member(&self.y, "y")?;
                DecodingKey::from_ec_components(x, y)
                    .map_err(|err| RpError::Discovery(format!("invalid EC key: {err}")))?
            }
            other => {
                return Err(RpError::Discovery(format!("unsupported key type {other}")));
            }
        };

        let algorithm = match self.alg.as_deref() {
            Some(alg) => Some(
                Algorithm::from_str(alg)
                    .map_err(|_| RpError::Discovery(format!("unsupported key algorithm {alg}")))?,
            ),
            None => None,
        };

        Ok(CachedKey {
            kid: self.kid.clone().unwrap_or_default(),
            algorithm,
            key,
        })
    }

    fn member<'a>(&self, value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| RpError::Discovery(format!("{} key missing '{name}'", self.kty)))
    }
}

#[derive(Default)]
struct KeySet {
    keys: HashMap<String, Arc<CachedKey>>,
    fetched_at: Option<Instant>,
}

/// Cache of the provider's signing keys.
///
/// Readers share an async `RwLock`; refreshes are serialized by a separate
/// gate and tagged with a generation counter so a waiter can tell whether
/// the fetch it queued behind already produced fresh keys.
pub struct JwksCache {
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    jwks_uri: OnceCell<String>,
    keys: RwLock<KeySet>,
    refresh_gate: Mutex<()>,
    generation: AtomicU64,
    max_age: Duration,
}

impl JwksCache {
    pub fn new(http: reqwest::Client, config: Arc<ClientConfig>) -> Self {
        let max_age = Duration::from_secs(config.jwks_refresh_seconds);
        Self {
            http,
            config,
            jwks_uri: OnceCell::new(),
            keys: RwLock::new(KeySet::default()),
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            max_age,
        }
    }

    /// Number of completed refreshes.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Number of cached keys.
    pub async fn len(&self) -> usize {
        self.keys.read().await.keys.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the key for `kid`, refreshing at most once if it is unknown
    /// or the cached set has aged out.
    ///
    /// With no `kid`, the sole cached key is used; a token without `kid`
    /// against a multi-key set is rejected.
    ///
    /// # Errors
    ///
    /// - [`RpError::InvalidSignature`] if no matching key exists after the
    ///   refresh
    /// - [`RpError::Discovery`] if the refresh itself fails
    pub async fn get(&self, kid: Option<&str>) -> Result<Arc<CachedKey>> {
        let observed = self.generation();

        if let Some(key) = self.lookup(kid).await {
            return Ok(key);
        }

        tracing::debug!(kid = kid.unwrap_or(""), "Signing key not cached, refreshing JWKS");
        self.refresh_after(observed).await?;

        self.lookup(kid).await.ok_or_else(|| {
            RpError::InvalidSignature(match kid {
                Some(kid) => format!("no signing key with kid {kid}"),
                None => "token has no kid and the key set is ambiguous".to_string(),
            })
        })
    }

    async fn lookup(&self, kid: Option<&str>) -> Option<Arc<CachedKey>> {
        let set = self.keys.read().await;
        let fresh = set
            .fetched_at
            .map(|at| at.elapsed() < self.max_age)
            .unwrap_or(false);
        if !fresh {
            return None;
        }

        match kid {
            Some(kid) => set.keys.get(kid).cloned(),
            None if set.keys.len() == 1 => set.keys.values().next().cloned(),
            None => None,
        }
    }

    /// Refreshes unless another task completed a refresh since `observed`.
    pub async fn refresh_after(&self, observed: u64) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;

        if self.generation() != observed {
            tracing::debug!("JWKS refreshed by a concurrent request");
            return Ok(());
        }

        let result = match self.fetch().await {
            Ok(keys) => {
                let count = keys.len();
                let mut set = self.keys.write().await;
                set.keys = keys;
                set.fetched_at = Some(Instant::now());
                tracing::info!(key_count = count, "JWKS cache refreshed");
                Ok(())
            }
            Err(e) => Err(e),
        };

        // Bumped after the keys are visible, and on failure too, so queued
        // waiters neither miss the new keys nor repeat a failing fetch.
        self.generation.fetch_add(1, Ordering::AcqRel);
        result
    }

    async fn fetch(&self) -> Result<HashMap<String, Arc<CachedKey>>> {
        let uri = match self
            .jwks_uri
            .get_or_try_init(|| discovery::resolve_jwks_uri(&self.http, &self.config))
            .await
        {
            Ok(uri) => uri.clone(),
            Err(e) => {
                let uri = discovery::fallback_jwks_uri(&self.config);
                tracing::warn!(error = %e, jwks_uri = %uri, "Discovery failed, using default JWKS location");
                uri
            }
        };

        tracing::debug!(url = %uri, "Fetching JWKS");
        let resp = transport::send_with_retry(|| self.http.get(&uri))
            .await
            .map_err(|e| {
                tracing::error!(url = %uri, error = %e, "JWKS request failed");
                RpError::Discovery(format!("failed to fetch JWKS: {e}"))
            })?;

        if !resp.status().is_success() {
            tracing::error!(url = %uri, status = resp.status().as_u16(), "JWKS endpoint error");
            return Err(RpError::Discovery(format!(
                "JWKS endpoint returned {}",
                resp.status()
            )));
        }

        let jwks: Jwks = resp
            .json()
            .await
            .map_err(|e| RpError::Discovery(format!("invalid JWKS document: {e}")))?;

        let mut keys = HashMap::new();
        for jwk in &jwks.keys {
            if jwk.key_use.as_deref() == Some("enc") {
                continue;
            }
            match jwk.to_cached_key() {
                Ok(key) => {
                    tracing::debug!(kid = %key.kid, kty = %jwk.kty, "Loaded JWK");
                    keys.insert(key.kid.clone(), Arc::new(key));
                }
                Err(e) => {
                    tracing::warn!(kid = ?jwk.kid, kty = %jwk.kty, error = %e, "Skipping JWK");
                }
            }
        }

        if keys.is_empty() {
            return Err(RpError::Discovery(
                "JWKS contains no usable signing keys".to_string(),
            ));
        }

        Ok(keys)
    }
}
