use std::sync::Arc;

use tracing::{info, warn};

use super::LockStore;
use crate::errors::LockError;
use crate::job::lock_id;
use crate::reporting::{Reporter, titled_format};
use crate::vcs::PullRequestService;

/// Result of a lock attempt. Contention is an outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    /// This PR already held the lock.
    AlreadyHeld,
    /// Another open PR holds the lock. `holder` is `None` when the store
    /// refused the write but the winner was gone by the time it was re-read.
    LockedByOther { holder: Option<u64> },
}

impl LockOutcome {
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Acquired | Self::AlreadyHeld)
    }
}

/// Lock on one project owned by one pull request.
#[derive(Clone)]
pub struct ProjectLock {
    store: Arc<dyn LockStore>,
    prs: Arc<dyn PullRequestService>,
    reporter: Arc<dyn Reporter>,
    project_name: String,
    namespace: String,
    pr_number: u64,
}

impl ProjectLock {
    pub fn new(
        store: Arc<dyn LockStore>,
        prs: Arc<dyn PullRequestService>,
        reporter: Arc<dyn Reporter>,
        project_name: impl Into<String>,
        namespace: impl Into<String>,
        pr_number: u64,
    ) -> Self {
        Self {
            store,
            prs,
            reporter,
            project_name: project_name.into(),
            namespace: namespace.into(),
            pr_number,
        }
    }

    pub fn lock_id(&self) -> String {
        lock_id(&self.namespace, &self.project_name)
    }

    pub fn pr_number(&self) -> u64 {
        self.pr_number
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Take the project lock for this PR.
    ///
    /// A lock held by a closed PR is released first. A lock already held by
    /// this PR is reported as [`LockOutcome::AlreadyHeld`].
    pub async fn lock(&self) -> Result<LockOutcome, LockError> {
        let lock_id = self.lock_id();
        info!(lock_id = %lock_id, pr = self.pr_number, "Locking project");

        if let Some(holder) = self.verify_no_hanging_locks().await? {
            self.report_contention(holder).await;
            return Ok(LockOutcome::LockedByOther {
                holder: Some(holder),
            });
        }

        match self.store.read(&lock_id).await? {
            Some(holder) if holder == self.pr_number => return Ok(LockOutcome::AlreadyHeld),
            Some(holder) => {
                self.report_contention(holder).await;
                return Ok(LockOutcome::LockedByOther {
                    holder: Some(holder),
                });
            }
            None => {}
        }

        if !self.store.acquire(self.pr_number, &lock_id).await? {
            // Lost the race between the read and the conditional write.
            let holder = self.store.read(&lock_id).await?;
            if let Some(holder) = holder {
                self.report_contention(holder).await;
            }
            return Ok(LockOutcome::LockedByOther { holder });
        }

        if !self.store.is_noop() {
            self.report(
                &format!(
                    "Project {} has been locked by PR #{}",
                    lock_id, self.pr_number
                ),
                "Locking successful",
            )
            .await;
            info!(lock_id = %lock_id, pr = self.pr_number, "Project locked");
        }
        Ok(LockOutcome::Acquired)
    }

    /// Reclaim a lock left behind by a closed PR. Returns the holder if the
    /// lock belongs to another PR that is still open.
    pub async fn verify_no_hanging_locks(&self) -> Result<Option<u64>, LockError> {
        let lock_id = self.lock_id();
        let Some(holder) = self.store.read(&lock_id).await? else {
            return Ok(None);
        };
        if holder == self.pr_number {
            return Ok(None);
        }

        let closed = self
            .prs
            .is_closed(holder)
            .await
            .map_err(|source| LockError::HolderCheck {
                lock_id: lock_id.clone(),
                holder,
                source,
            })?;
        if !closed {
            return Ok(Some(holder));
        }

        // Only drop the lease if the closed PR still owns it.
        self.store
            .release_if_held(holder, &lock_id)
            .await
            .map_err(|source| LockError::Reclaim {
                lock_id: lock_id.clone(),
                holder,
                source: Box::new(source),
            })?;
        info!(lock_id = %lock_id, holder, "Released lock held by closed PR");
        Ok(None)
    }

    /// Release the lock if and only if this PR holds it.
    pub async fn unlock(&self) -> Result<bool, LockError> {
        let lock_id = self.lock_id();
        info!(lock_id = %lock_id, pr = self.pr_number, "Unlocking project");
        let released = self.store.release_if_held(self.pr_number, &lock_id).await?;
        if released {
            self.report(
                &format!("Project unlocked ({}).", lock_id),
                "Unlocking successful",
            )
            .await;
        }
        Ok(released)
    }

    /// Release the lock whoever holds it.
    pub async fn force_unlock(&self) -> Result<bool, LockError> {
        let lock_id = self.lock_id();
        info!(lock_id = %lock_id, pr = self.pr_number, "Force unlocking project");
        if self.store.read(&lock_id).await?.is_none() {
            return Ok(false);
        }
        let released = self.store.release(&lock_id).await?;
        if released {
            self.report(
                &format!("Project unlocked ({}).", lock_id),
                "Unlocking successful",
            )
            .await;
        }
        Ok(released)
    }

    async fn report_contention(&self, holder: u64) {
        let lock_id = self.lock_id();
        warn!(lock_id = %lock_id, holder, pr = self.pr_number, "Project locked by another PR");
        self.report(
            &format!(
                "Project {} locked by another PR #{} (failed to acquire lock {}). \
                 The locking plan must be applied or discarded before future plans can execute",
                lock_id, holder, lock_id
            ),
            "Locking failed",
        )
        .await;
    }

    /// Reporting failures never change the lock outcome.
    async fn report(&self, text: &str, title: &str) {
        let format = titled_format(self.reporter.as_ref(), title);
        if let Err(e) = self.reporter.report(text, format).await {
            warn!(error = %e, "Failed to publish lock report");
        }
    }
}
