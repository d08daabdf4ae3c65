use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::executor::{ApplyResult, Executor, PlanResult};
use crate::errors::{ExecutionError, LockError};
use crate::locking::{LockOutcome, ProjectLock};

/// Takes the project lock before every plan, apply and destroy. When the lock
/// is held by another PR the call returns a not-performed result and the
/// inner executor is never invoked.
pub struct LockingExecutor {
    lock: ProjectLock,
    inner: Arc<dyn Executor>,
}

impl LockingExecutor {
    pub fn new(lock: ProjectLock, inner: Arc<dyn Executor>) -> Self {
        Self { lock, inner }
    }

    pub fn project_lock(&self) -> &ProjectLock {
        &self.lock
    }

    pub async fn lock(&self) -> Result<LockOutcome, LockError> {
        self.lock.lock().await
    }

    /// Administrative unlock: releases the lock whoever holds it.
    pub async fn unlock(&self) -> Result<bool, LockError> {
        self.lock.force_unlock().await
    }
}

#[async_trait]
impl Executor for LockingExecutor {
    async fn plan(&self) -> Result<PlanResult, ExecutionError> {
        match self.lock.lock().await? {
            LockOutcome::LockedByOther { holder } => {
                info!(lock_id = %self.lock.lock_id(), ?holder, "Plan skipped, project locked");
                Ok(PlanResult::not_performed(holder))
            }
            _ => self.inner.plan().await,
        }
    }

    async fn apply(&self) -> Result<ApplyResult, ExecutionError> {
        match self.lock.lock().await? {
            LockOutcome::LockedByOther { holder } => {
                info!(lock_id = %self.lock.lock_id(), ?holder, "Apply skipped, project locked");
                Ok(ApplyResult::not_performed(holder))
            }
            _ => self.inner.apply().await,
        }
    }

    async fn destroy(&self) -> Result<bool, ExecutionError> {
        match self.lock.lock().await? {
            LockOutcome::LockedByOther { .. } => Ok(false),
            _ => self.inner.destroy().await,
        }
    }
}
