use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{LOCK_LEASE, LockStore};
use crate::errors::LockError;

#[derive(Debug, Clone, Copy)]
struct LeaseRecord {
    holder: u64,
    expires_at: Instant,
}

impl LeaseRecord {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Process-local lock store. Every operation runs under one mutex, so the
/// check and the write of `acquire` are atomic.
#[derive(Debug)]
pub struct InMemoryLockStore {
    leases: Mutex<HashMap<String, LeaseRecord>>,
    lease: Duration,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::with_lease(LOCK_LEASE)
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self {
            leases: Mutex::new(HashMap::new()),
            lease,
        }
    }

    fn leases(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, LeaseRecord>>, LockError> {
        self.leases.lock().map_err(|_| LockError::Poisoned)
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, holder: u64, key: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases()?;
        if let Some(existing) = leases.get(key)
            && existing.is_live(now)
            && existing.holder != holder
        {
            return Ok(false);
        }
        leases.insert(
            key.to_string(),
            LeaseRecord {
                holder,
                expires_at: now + self.lease,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str) -> Result<bool, LockError> {
        Ok(self.leases()?.remove(key).is_some())
    }

    async fn read(&self, key: &str) -> Result<Option<u64>, LockError> {
        let now = Instant::now();
        Ok(self
            .leases()?
            .get(key)
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.holder))
    }

    async fn release_if_held(&self, holder: u64, key: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut leases = self.leases()?;
        match leases.get(key) {
            Some(lease) if lease.is_live(now) && lease.holder == holder => {
                leases.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
