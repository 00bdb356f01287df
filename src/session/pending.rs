//! Pending login records
//!
//! A pending record carries everything the callback needs to finish a login
//! attempt: the expected `state` and `nonce`, the PKCE verifier and the local
//! URL to return to. Records are keyed by `state`, signed with HMAC-SHA256,
//! expire after a fixed TTL and can be consumed exactly once.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Result, RpError};

type HmacSha256 = Hmac<Sha256>;

/// Correlation data for one outstanding login attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingLogin {
    pub state: String,
    pub nonce: String,
    /// Local path the browser returns to after login
    pub return_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_verifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

/// Storage for pending login records.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Stores a record under its `state`.
    async fn put(&self, login: PendingLogin) -> Result<()>;

    /// Atomically removes and returns the live record for `state`.
    ///
    /// Returns `Ok(None)` when no record exists, it has expired, or its
    /// integrity check fails. Of several concurrent callers with the same
    /// `state`, at most one receives the record.
    async fn consume(&self, state: &str) -> Result<Option<PendingLogin>>;

    /// Drops expired records and returns how many were removed.
    async fn purge_expired(&self) -> usize;
}

struct SignedRecord {
    payload: String,
    signature: String,
    expires_at: Instant,
}

/// In-process [`PendingStore`] backed by a concurrent map.
pub struct MemoryPendingStore {
    records: DashMap<String, SignedRecord>,
    key: Vec<u8>,
    ttl: Duration,
}

impl MemoryPendingStore {
    /// Creates a store with a random signing key.
    pub fn new(ttl: Duration) -> Self {
        use rand::RngCore as _;

        let mut key = vec![0u8; 32];
        rand::rng().fill_bytes(&mut key);
        Self::with_key(key, ttl)
    }

    /// Creates a store with an explicit signing key.
    pub fn with_key(key: Vec<u8>, ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            key,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| RpError::Config(format!("invalid pending-login signing key: {e}")))
    }

    fn sign(&self, payload: &str) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn verify(&self, record: &SignedRecord) -> bool {
        let Ok(signature) =
            base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(&record.signature)
        else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(record.payload.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn put(&self, login: PendingLogin) -> Result<()> {
        let payload = serde_json::to_string(&login)?;
        let signature = self.sign(&payload)?;
        self.records.insert(
            login.state,
            SignedRecord {
                payload,
                signature,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn consume(&self, state: &str) -> Result<Option<PendingLogin>> {
        let Some((_, record)) = self.records.remove(state) else {
            return Ok(None);
        };

        if Instant::now() >= record.expires_at {
            tracing::debug!("Pending login expired");
            return Ok(None);
        }

        if !self.verify(&record) {
            tracing::warn!("Pending login failed integrity check");
            return Ok(None);
        }

        let login: PendingLogin = serde_json::from_str(&record.payload)?;
        if login.state != state {
            tracing::warn!("Pending login bound to a different state");
            return Ok(None);
        }

        Ok(Some(login))
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at > now);
        let purged = before.saturating_sub(self.records.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired pending logins");
        }
        purged
    }
}
