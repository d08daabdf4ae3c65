//! Lease-based per-project mutual exclusion.
//!
//! A [`LockStore`] is the only synchronization primitive shared between
//! independent CI processes. `acquire` is a single conditional write: it
//! succeeds only when the key has no live lease or the lease already belongs
//! to the caller. Contention returns `Ok(false)`, never an error.
//!
//! [`ProjectLock`] layers pull-request semantics on top: the holder is a PR
//! number, locks left behind by closed PRs are reclaimed, and lock state is
//! reported back to the PR.

pub mod memory;
pub mod noop;
pub mod project_lock;
pub mod sqlite;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::errors::LockError;
use crate::settings::{LockProvider, Settings};

pub use memory::InMemoryLockStore;
pub use noop::NoOpLockStore;
pub use project_lock::{LockOutcome, ProjectLock};
pub use sqlite::SqliteLockStore;

/// Lease applied to every acquisition. Explicit unlock and hanging-lock
/// reclamation release locks; expiry only cleans up entries nobody released.
pub const LOCK_LEASE: Duration = Duration::from_secs(90 * 24 * 60 * 60);

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Take the lease on `key` for `holder`. `Ok(false)` when another holder
    /// owns a live lease. Re-acquiring an owned key returns `Ok(true)`.
    async fn acquire(&self, holder: u64, key: &str) -> Result<bool, LockError>;

    /// Drop the lease on `key` regardless of holder.
    async fn release(&self, key: &str) -> Result<bool, LockError>;

    /// Current live holder of `key`, if any.
    async fn read(&self, key: &str) -> Result<Option<u64>, LockError>;

    /// Drop the lease on `key` only when `holder` owns it.
    async fn release_if_held(&self, holder: u64, key: &str) -> Result<bool, LockError> {
        match self.read(key).await? {
            Some(current) if current == holder => self.release(key).await,
            _ => Ok(false),
        }
    }

    /// Stores that never hold anything skip lock-state reporting.
    fn is_noop(&self) -> bool {
        false
    }
}

/// Build the lock store selected by `settings`.
pub fn from_settings(settings: &Settings) -> anyhow::Result<Arc<dyn LockStore>> {
    let store: Arc<dyn LockStore> = match settings.lock_provider() {
        LockProvider::None => {
            info!("Using no-op lock provider");
            Arc::new(NoOpLockStore)
        }
        LockProvider::Memory => {
            info!("Using in-memory lock provider");
            Arc::new(InMemoryLockStore::new())
        }
        LockProvider::Sqlite => {
            info!(path = %settings.lock_db.display(), "Using SQLite lock provider");
            Arc::new(SqliteLockStore::open(&settings.lock_db)?)
        }
    };
    Ok(store)
}
