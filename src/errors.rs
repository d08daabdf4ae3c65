//! Typed error hierarchy for plangate.
//!
//! One enum per subsystem:
//! - `LockError`: lock store and project lock failures (never contention)
//! - `IacError`: IaC tool invocation failures
//! - `ExecutionError`: failures of a locked plan/apply/destroy
//! - `DispatchError`: per-command outcomes surfaced to the pull request
//! - `ConfigError`: configuration problems that abort the whole invocation
//! - `RunQueueError`: run lifecycle persistence failures

use thiserror::Error;

/// Errors from the lock store or the PR-aware project lock.
///
/// Contention is not an error: a lock held by another PR is reported as
/// [`crate::locking::LockOutcome::LockedByOther`].
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Lock store error: {0}")]
    Store(#[source] anyhow::Error),

    #[error("Failed to check if PR #{holder} holding lock {lock_id} is closed: {source}")]
    HolderCheck {
        lock_id: String,
        holder: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to release lock {lock_id} held by closed PR #{holder}: {source}")]
    Reclaim {
        lock_id: String,
        holder: u64,
        #[source]
        source: Box<LockError>,
    },

    #[error("Lock store mutex poisoned")]
    Poisoned,
}

/// Errors from invoking an IaC tool or a custom `run` step.
#[derive(Debug, Error)]
pub enum IacError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} {command} exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        program: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },
}

/// Errors from a plan/apply/destroy routed through the locking executor.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Error locking project: {0}")]
    Lock(#[from] LockError),

    #[error(transparent)]
    Iac(#[from] IacError),

    #[error("Plan artifact error: {0}")]
    PlanStorage(#[source] anyhow::Error),

    #[error("Failed to parse IaC output: {0}")]
    Summary(String),
}

/// Outcome of a single dispatched command that did not succeed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Project {project} is locked by another PR{}", holder.map(|h| format!(" #{h}")).unwrap_or_default())]
    Contention { project: String, holder: Option<u64> },

    #[error("Policy denied {command} on {project}: {reason}")]
    PolicyDenied {
        project: String,
        command: String,
        reason: String,
    },

    #[error("Cannot apply {project}: PR #{pr_number} is neither merged nor mergeable")]
    Mergeability { project: String, pr_number: u64 },

    #[error("{command} failed for {project}: {source}")]
    ExecutionFailure {
        project: String,
        command: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Cannot determine lock state for {project}: {source}")]
    Lock {
        project: String,
        #[source]
        source: LockError,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DispatchError {
    /// Whether this failure compromises the mutual-exclusion guarantee and
    /// must abort the remaining batch.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Self::Lock { .. })
    }
}

/// Fatal configuration errors. Ordering or locking cannot be established
/// safely, so the invocation stops.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Dependency cycle between projects: {}", projects.join(", "))]
    DependencyCycle { projects: Vec<String> },

    #[error("Project '{project}' depends on unknown project '{dependency}'")]
    UnknownDependency { project: String, dependency: String },

    #[error("Project '{project}' references unknown workflow '{workflow}'")]
    UnknownWorkflow { project: String, workflow: String },

    #[error("Duplicate project name: {0}")]
    DuplicateProject(String),

    #[error("Project '{project}' enables more than one tool: {}", tools.join(", "))]
    ConflictingTools { project: String, tools: Vec<String> },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the persisted run queue.
#[derive(Debug, Error)]
pub enum RunQueueError {
    #[error("Run {id} not found")]
    RunNotFound { id: i64 },

    /// A stored status outside the known set. Logged and skipped by the poller.
    #[error("Run {run_id} has unexpected status '{status}'")]
    UnknownRunStatus { run_id: i64, status: String },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for RunQueueError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contention_message_names_holder() {
        let err = DispatchError::Contention {
            project: "network".to_string(),
            holder: Some(42),
        };
        assert_eq!(
            err.to_string(),
            "Project network is locked by another PR #42"
        );
        assert!(!err.aborts_batch());
    }

    #[test]
    fn contention_without_known_holder() {
        let err = DispatchError::Contention {
            project: "network".to_string(),
            holder: None,
        };
        assert_eq!(err.to_string(), "Project network is locked by another PR");
    }

    #[test]
    fn lock_failures_abort_the_batch() {
        let err = DispatchError::Lock {
            project: "db".to_string(),
            source: LockError::Poisoned,
        };
        assert!(err.aborts_batch());

        let err = DispatchError::Mergeability {
            project: "db".to_string(),
            pr_number: 7,
        };
        assert!(!err.aborts_batch());
        assert!(err.to_string().contains("#7"));
    }

    #[test]
    fn reclaim_error_carries_holder() {
        let err = LockError::Reclaim {
            lock_id: "acme/infra#db".to_string(),
            holder: 12,
            source: Box::new(LockError::Poisoned),
        };
        match &err {
            LockError::Reclaim { holder, lock_id, .. } => {
                assert_eq!(*holder, 12);
                assert_eq!(lock_id, "acme/infra#db");
            }
            _ => panic!("Expected Reclaim"),
        }
    }

    #[test]
    fn cycle_error_lists_projects() {
        let err = ConfigError::DependencyCycle {
            projects: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("cycle"));
        assert!(err.to_string().contains("a, b"));
    }

    #[test]
    fn iac_error_includes_exit_code() {
        let err = IacError::NonZeroExit {
            program: "terraform".to_string(),
            command: "apply".to_string(),
            exit_code: 1,
            stderr: "boom".to_string(),
        };
        assert!(err.to_string().contains("code 1"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn run_queue_error_from_sqlite() {
        let err: RunQueueError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, RunQueueError::Database(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&LockError::Poisoned);
        assert_std_error(&IacError::Step {
            step: "run".into(),
            message: "x".into(),
        });
        assert_std_error(&ExecutionError::Summary("x".into()));
        assert_std_error(&ConfigError::DuplicateProject("x".into()));
        assert_std_error(&RunQueueError::LockPoisoned);
    }
}
