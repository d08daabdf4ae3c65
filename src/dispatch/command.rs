//! Execution of a single command against a single job.

use std::sync::Arc;

use tracing::{info, warn};

use super::Collaborators;
use crate::credentials::JobEnv;
use crate::errors::{DispatchError, ExecutionError};
use crate::execution::{Executor, LockingExecutor, PlanPathProvider, ProjectExecutor};
use crate::job::{Command, Job};
use crate::locking::{LockOutcome, ProjectLock};
use crate::policy::{AccessRequest, plan_violation_message};
use crate::reporting::{CommentFormat, titled_format};
use crate::summary::{ExecutorResult, OperationType};
use crate::vcs::{CheckState, apply_context, plan_context};

/// Report for a command the requester may not run.
pub(super) async fn report_access_denied(collab: &Collaborators, job: &Job, command: Command) {
    let text = format!(
        "User {} is not allowed to perform action: {}. Check your policies :x:",
        job.requested_by, command
    );
    let title = format!("Policy violation for {} - {}", job.project_name, command);
    let format = titled_format(collab.reporter.as_ref(), &title);
    if let Err(e) = collab.reporter.report(&text, format).await {
        warn!(error = %e, "Failed to publish report");
    }
}

pub(super) fn access_request(job: &Job, command: Command, violations: Vec<String>) -> AccessRequest {
    AccessRequest {
        namespace: job.namespace.clone(),
        project: job.project_name.clone(),
        command,
        pr_number: job.pr_number,
        requested_by: job.requested_by.clone(),
        plan_policy_violations: violations,
    }
}

/// One command of one job, with its executor stack built.
pub(super) struct CommandRun<'a> {
    job: &'a Job,
    collab: &'a Collaborators,
    executor: Arc<ProjectExecutor>,
    locking: LockingExecutor,
}

impl<'a> CommandRun<'a> {
    pub(super) fn new(job: &'a Job, collab: &'a Collaborators, env: JobEnv) -> Self {
        let paths = PlanPathProvider::new(
            job.project_dir.clone(),
            job.namespace.clone(),
            job.project_name.clone(),
            Some(job.pr_number),
        );
        let executor = Arc::new(ProjectExecutor::new(
            job.lock_id(),
            job.project_dir.clone(),
            env,
            job.plan_stage_or_default(),
            job.apply_stage_or_default(),
            collab.executors.build(job),
            collab.reporter.clone(),
            collab.plan_storage.clone(),
            paths,
        ));
        let lock = ProjectLock::new(
            collab.locks.clone(),
            collab.prs.clone(),
            collab.reporter.clone(),
            job.project_name.clone(),
            job.namespace.clone(),
            job.pr_number,
        );
        let locking = LockingExecutor::new(lock, executor.clone());
        Self {
            job,
            collab,
            executor,
            locking,
        }
    }

    pub(super) async fn run(&self, command: Command) -> Result<Option<ExecutorResult>, DispatchError> {
        match command {
            Command::Plan => self.plan().await.map(Some),
            Command::Apply => self.apply().await.map(Some),
            Command::Destroy => self.destroy().await.map(|()| None),
            Command::Lock => self.lock().await.map(|()| None),
            Command::Unlock => self.unlock().await.map(|()| None),
        }
    }

    async fn plan(&self) -> Result<ExecutorResult, DispatchError> {
        let job = self.job;
        let context = plan_context(&job.project_name);
        self.set_status(CheckState::Pending, &context).await;

        let plan = match self.locking.plan().await {
            Ok(plan) => plan,
            Err(e) => return Err(self.fail(&context, self.execution_error(Command::Plan, e)).await),
        };
        if !plan.performed {
            return Err(DispatchError::Contention {
                project: job.project_name.clone(),
                holder: plan.lock_holder,
            });
        }

        let lock_id = job.lock_id();
        if plan.non_empty && plan.plan_json.trim().is_empty() {
            self.report_titled(&plan.output, &format!("Plan for {}", lock_id))
                .await;
            warn!(project = %job.project_name, "Plan could not be rendered; skipping plan policy checks");
            self.report_plain(&format!(
                "Skipping plan policy checks for {}: the plan could not be rendered as JSON",
                lock_id
            ))
            .await;
        } else if plan.non_empty {
            self.report_titled(&plan.output, &format!("Plan for {}", lock_id))
                .await;
            let verdict = match self
                .collab
                .policy
                .check_plan_policy(&job.namespace, &job.project_name, &plan.plan_json)
                .await
            {
                Ok(verdict) => verdict,
                Err(e) => {
                    let err = self.failure(Command::Plan, e.context("Failed to check plan policy"));
                    return Err(self.fail(&context, err).await);
                }
            };
            if !verdict.allowed {
                self.report_titled(
                    &plan_violation_message(&verdict.violations),
                    &format!("Terraform plan validation check ({})", job.project_name),
                )
                .await;
                let err = DispatchError::PolicyDenied {
                    project: job.project_name.clone(),
                    command: Command::Plan.to_string(),
                    reason: verdict.violations.join("; "),
                };
                return Err(self.fail(&context, err).await);
            }
            self.report_plain("Terraform plan validation checks succeeded :white_check_mark:")
                .await;
            if let Some(summary) = &plan.summary {
                self.report_plain(&summary.to_plan_line()).await;
            }
        } else {
            self.report_plain(&format!("→ No changes in terraform output for {}", lock_id))
                .await;
        }

        self.set_status(CheckState::Success, &context).await;
        Ok(ExecutorResult {
            operation: OperationType::Plan,
            raw_output: plan.output,
            summary: plan.summary.unwrap_or_default(),
        })
    }

    async fn apply(&self) -> Result<ExecutorResult, DispatchError> {
        let job = self.job;
        let context = apply_context(&job.project_name);
        self.set_status(CheckState::Pending, &context).await;

        if !job.skip_merge_check {
            let mergeable = match self.merged_or_mergeable().await {
                Ok(mergeable) => mergeable,
                Err(e) => return Err(self.fail(&context, self.failure(Command::Apply, e)).await),
            };
            if !mergeable {
                self.report_titled(
                    "cannot perform Apply since the PR is not currently mergeable",
                    "Apply error",
                )
                .await;
                let err = DispatchError::Mergeability {
                    project: job.project_name.clone(),
                    pr_number: job.pr_number,
                };
                return Err(self.fail(&context, err).await);
            }
        }

        // Policies may have changed since the plan.
        let violations = match self.stored_plan_violations().await {
            Ok(violations) => violations,
            Err(e) => return Err(self.fail(&context, e).await),
        };
        let request = access_request(job, Command::Apply, violations);
        match self.collab.policy.check_access_policy(&request).await {
            Ok(true) => {}
            Ok(false) => {
                report_access_denied(self.collab, job, Command::Apply).await;
                let err = DispatchError::PolicyDenied {
                    project: job.project_name.clone(),
                    command: Command::Apply.to_string(),
                    reason: format!("{} may not apply", job.requested_by),
                };
                return Err(self.fail(&context, err).await);
            }
            Err(e) => {
                let err = self.failure(
                    Command::Apply,
                    e.context("Failed to run access policy check before apply"),
                );
                return Err(self.fail(&context, err).await);
            }
        }

        let applied = match self.locking.apply().await {
            Ok(applied) => applied,
            Err(e) => return Err(self.fail(&context, self.execution_error(Command::Apply, e)).await),
        };
        if !applied.performed {
            return Err(DispatchError::Contention {
                project: job.project_name.clone(),
                holder: applied.lock_holder,
            });
        }

        self.set_status(CheckState::Success, &context).await;
        Ok(ExecutorResult {
            operation: OperationType::Apply,
            raw_output: applied.output,
            summary: applied.summary.unwrap_or_default(),
        })
    }

    async fn destroy(&self) -> Result<(), DispatchError> {
        match self.locking.destroy().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(DispatchError::Contention {
                project: self.job.project_name.clone(),
                holder: None,
            }),
            Err(e) => Err(self.execution_error(Command::Destroy, e)),
        }
    }

    async fn lock(&self) -> Result<(), DispatchError> {
        match self.locking.lock().await {
            Ok(LockOutcome::LockedByOther { holder }) => Err(DispatchError::Contention {
                project: self.job.project_name.clone(),
                holder,
            }),
            Ok(_) => Ok(()),
            Err(source) => Err(DispatchError::Lock {
                project: self.job.project_name.clone(),
                source,
            }),
        }
    }

    async fn unlock(&self) -> Result<(), DispatchError> {
        let released = self
            .locking
            .unlock()
            .await
            .map_err(|source| DispatchError::Lock {
                project: self.job.project_name.clone(),
                source,
            })?;
        info!(lock_id = %self.job.lock_id(), released, "Project unlocked");

        // A plan must not outlive the lock that protected it.
        if let Some(storage) = &self.collab.plan_storage {
            let paths = self.executor.paths();
            if let Err(e) = storage
                .delete(paths.artifact_name(), &paths.stored_plan_file_name())
                .await
            {
                warn!(project = %self.job.project_name, error = %e, "Failed to delete stored plan");
            }
        }
        Ok(())
    }

    async fn merged_or_mergeable(&self) -> anyhow::Result<bool> {
        let pr = self.job.pr_number;
        let merged = self
            .collab
            .prs
            .is_merged(pr)
            .await
            .map_err(|e| e.context("Failed to check if PR is merged"))?;
        if merged {
            return Ok(true);
        }
        self.collab
            .prs
            .is_mergeable(pr)
            .await
            .map_err(|e| e.context("Failed to check if PR is mergeable"))
    }

    /// Plan-policy violations of the stored plan. Empty when no plan storage
    /// is configured.
    async fn stored_plan_violations(&self) -> Result<Vec<String>, DispatchError> {
        if self.collab.plan_storage.is_none() {
            info!(project = %self.job.project_name, "Skipping plan policy checks because plan storage is not configured");
            return Ok(Vec::new());
        }
        let plan_json = self
            .executor
            .retrieve_plan_json()
            .await
            .map_err(|e| self.failure(Command::Apply, anyhow::Error::new(e).context("Failed to retrieve stored plan")))?;
        let verdict = self
            .collab
            .policy
            .check_plan_policy(&self.job.namespace, &self.job.project_name, &plan_json)
            .await
            .map_err(|e| self.failure(Command::Apply, e.context("Failed to check plan policy")))?;
        Ok(verdict.violations)
    }

    fn execution_error(&self, command: Command, err: ExecutionError) -> DispatchError {
        match err {
            ExecutionError::Lock(source) => DispatchError::Lock {
                project: self.job.project_name.clone(),
                source,
            },
            other => self.failure(command, other.into()),
        }
    }

    fn failure(&self, command: Command, source: anyhow::Error) -> DispatchError {
        DispatchError::ExecutionFailure {
            project: self.job.project_name.clone(),
            command: command.to_string(),
            source,
        }
    }

    /// Mark `context` failed and pass `err` through.
    async fn fail(&self, context: &str, err: DispatchError) -> DispatchError {
        self.set_status(CheckState::Failure, context).await;
        err
    }

    async fn set_status(&self, state: CheckState, context: &str) {
        if let Err(e) = self
            .collab
            .prs
            .set_status(self.job.pr_number, state, context)
            .await
        {
            warn!(pr = self.job.pr_number, context, state = state.as_str(), error = %e, "Failed to set PR status");
        }
    }

    async fn report_titled(&self, text: &str, title: &str) {
        let format = titled_format(self.collab.reporter.as_ref(), title);
        self.report(text, format).await;
    }

    async fn report_plain(&self, text: &str) {
        self.report(text, CommentFormat::Plain).await;
    }

    async fn report(&self, text: &str, format: CommentFormat) {
        if let Err(e) = self.collab.reporter.report(text, format).await {
            warn!(error = %e, "Failed to publish report");
        }
    }
}
