use async_trait::async_trait;

use super::LockStore;
use crate::errors::LockError;

/// Lock store used when locking is disabled. Every acquisition succeeds and
/// nothing is ever held.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpLockStore;

#[async_trait]
impl LockStore for NoOpLockStore {
    async fn acquire(&self, _holder: u64, _key: &str) -> Result<bool, LockError> {
        Ok(true)
    }

    async fn release(&self, _key: &str) -> Result<bool, LockError> {
        Ok(true)
    }

    async fn read(&self, _key: &str) -> Result<Option<u64>, LockError> {
        Ok(None)
    }

    fn is_noop(&self) -> bool {
        true
    }
}
