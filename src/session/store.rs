//! Session capability and the in-memory reference store
//!
//! The orchestrator never sees how a session is transported; it is handed a
//! [`SessionStore`] for the browser exchange it is serving and only ever
//! calls `set`, `get` and `clear` on it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::session::principal::Principal;

/// Per-exchange session capability supplied by the host.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores `principal`, replacing any previous one.
    async fn set(&self, principal: Principal) -> Result<()>;

    /// Returns the stored principal, if any.
    async fn get(&self) -> Result<Option<Principal>>;

    /// Removes the principal. Clearing an empty session is not an error.
    async fn clear(&self) -> Result<()>;
}

struct SessionEntry {
    principal: Principal,
    expires_at: Instant,
}

/// Server-side session registry keyed by an opaque session id.
///
/// Entries live for a fixed TTL from their last `set`. Expired entries are
/// invisible to readers and are dropped by [`MemorySessionStore::purge_expired`].
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionEntry>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Opens a handle on an existing session id (e.g. from a cookie).
    pub fn handle(self: &Arc<Self>, session_id: impl Into<String>) -> SessionHandle {
        SessionHandle {
            store: Arc::clone(self),
            id: session_id.into(),
        }
    }

    /// Opens a handle on a freshly generated session id.
    pub fn new_session(self: &Arc<Self>) -> SessionHandle {
        self.handle(uuid::Uuid::new_v4().to_string())
    }

    /// Removes expired sessions and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn put(&self, id: &str, principal: Principal) {
        self.sessions.insert(
            id.to_string(),
            SessionEntry {
                principal,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn read(&self, id: &str) -> Option<Principal> {
        let now = Instant::now();
        // Drop the read guard before removing an expired entry.
        let live = {
            let entry = self.sessions.get(id)?;
            (entry.expires_at > now).then(|| entry.principal.clone())
        };
        if live.is_none() {
            self.sessions.remove_if(id, |_, entry| entry.expires_at <= now);
        }
        live
    }

    fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }
}

/// A [`SessionStore`] bound to one session id of a [`MemorySessionStore`].
#[derive(Clone)]
pub struct SessionHandle {
    store: Arc<MemorySessionStore>,
    id: String,
}

impl SessionHandle {
    /// The opaque session id to hand back to the browser.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle").finish_non_exhaustive()
    }
}

#[async_trait]
impl SessionStore for SessionHandle {
    async fn set(&self, principal: Principal) -> Result<()> {
        self.store.put(&self.id, principal);
        Ok(())
    }

    async fn get(&self) -> Result<Option<Principal>> {
        Ok(self.store.read(&self.id))
    }

    async fn clear(&self) -> Result<()> {
        self.store.remove(&self.id);
        Ok(())
    }
}
