//! Session-side state: the authenticated principal, the per-exchange session
//! capability and the pending login records that bridge challenge and
//! callback.

pub mod pending;
pub mod principal;
pub mod store;

pub use pending::{MemoryPendingStore, PendingLogin, PendingStore};
pub use principal::{ClaimKey, Principal, StoredTokens};
pub use store::{MemorySessionStore, SessionHandle, SessionStore};
