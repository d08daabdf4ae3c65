//! Batch dispatch of jobs.
//!
//! Each job's commands run in order behind the access policy and the project
//! lock. A failed command ends its job but not the batch; only a failure to
//! establish lock state aborts the remaining jobs. Once every job has run the
//! batch outcome is reported to the backend and mirrored into the aggregate
//! PR status checks, and the PR is merged when auto-merge applies.

mod command;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::backend::{
    BackendStatusApi, BatchStatus, BatchType, JobStatus, JobStatusReport, ProjectRunReport,
    RunOutcome, SerializedBatch, backend_repo_name,
};
use crate::credentials::CredentialProvider;
use crate::errors::DispatchError;
use crate::iac::ExecutorFactory;
use crate::job::{Command, Job};
use crate::locking::LockStore;
use crate::policy::PolicyChecker;
use crate::reporting::Reporter;
use crate::storage::PlanStorage;
use crate::summary::{ExecutorResult, IacSummary, OperationType};
use crate::vcs::{AGGREGATE_APPLY_CONTEXT, AGGREGATE_PLAN_CONTEXT, CheckState, PullRequestService};

use command::{CommandRun, access_request, report_access_denied};

/// Capabilities the dispatcher drives.
#[derive(Clone)]
pub struct Collaborators {
    pub locks: Arc<dyn LockStore>,
    pub prs: Arc<dyn PullRequestService>,
    pub reporter: Arc<dyn Reporter>,
    pub policy: Arc<dyn PolicyChecker>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub executors: Arc<dyn ExecutorFactory>,
    pub plan_storage: Option<Arc<dyn PlanStorage>>,
    pub backend: Arc<dyn BackendStatusApi>,
}

#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Backend batch the jobs belong to. The batch outcome is reported only
    /// when this is set.
    pub batch_id: Option<String>,
    pub auto_merge: bool,
    /// Projects the PR touches. Auto-merge requires all of them in the batch.
    pub impacted_projects: Vec<String>,
}

#[derive(Debug)]
pub struct CommandOutcome {
    pub project: String,
    pub command: Command,
    pub result: Result<Option<ExecutorResult>, DispatchError>,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<CommandOutcome>,
    /// Apply outcome per project, for projects where an apply was attempted
    /// or refused.
    pub applies: BTreeMap<String, bool>,
    pub merged: bool,
}

impl BatchReport {
    pub fn all_applies_succeeded(&self) -> bool {
        self.applies.values().all(|ok| *ok)
    }

    pub fn at_least_one_apply(&self) -> bool {
        !self.applies.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none() && self.all_applies_succeeded()
    }

    fn first_plan_summary(&self) -> Option<IacSummary> {
        self.outcomes.iter().find_map(|o| match &o.result {
            Ok(Some(r)) if r.operation == OperationType::Plan => Some(r.summary),
            _ => None,
        })
    }
}

pub struct JobDispatcher {
    collab: Collaborators,
    options: DispatchOptions,
}

impl JobDispatcher {
    pub fn new(collab: Collaborators, options: DispatchOptions) -> Self {
        Self { collab, options }
    }

    /// Run `jobs` in the given order.
    ///
    /// Returns `Err` only for failures that compromise mutual exclusion; every
    /// other failure is recorded in the report.
    pub async fn run_jobs(&self, jobs: &[Job]) -> Result<BatchReport, DispatchError> {
        let mut report = BatchReport::default();

        for job in jobs {
            for &command in &job.commands {
                info!(project = %job.project_name, pr = job.pr_number, command = %command, "Running command");
                let started_at = Utc::now();

                let result = match self.gate(job, command).await {
                    Ok(true) => self.execute(job, command).await,
                    Ok(false) => {
                        report_access_denied(&self.collab, job, command).await;
                        report.applies.insert(job.project_name.clone(), false);
                        report.outcomes.push(CommandOutcome {
                            project: job.project_name.clone(),
                            command,
                            result: Err(DispatchError::PolicyDenied {
                                project: job.project_name.clone(),
                                command: command.to_string(),
                                reason: format!("{} may not {}", job.requested_by, command),
                            }),
                        });
                        warn!(project = %job.project_name, command = %command, "Skipping command denied by access policy");
                        continue;
                    }
                    Err(e) => Err(e),
                };

                if command == Command::Apply {
                    report
                        .applies
                        .insert(job.project_name.clone(), result.is_ok());
                }
                self.report_run(job, command, started_at, &result).await;

                let result = match result {
                    Err(e) if e.aborts_batch() => {
                        error!(project = %job.project_name, error = %e, "Aborting batch");
                        self.flush_reporter().await;
                        return Err(e);
                    }
                    other => other,
                };
                let failed = result.is_err();
                if let Err(e) = &result {
                    warn!(project = %job.project_name, command = %command, error = %e, "Command failed");
                }
                report.outcomes.push(CommandOutcome {
                    project: job.project_name.clone(),
                    command,
                    result,
                });
                if failed {
                    break;
                }
            }
        }

        self.finalize(jobs, &mut report).await;
        Ok(report)
    }

    async fn gate(&self, job: &Job, command: Command) -> Result<bool, DispatchError> {
        let request = access_request(job, command, Vec::new());
        self.collab
            .policy
            .check_access_policy(&request)
            .await
            .map_err(|e| DispatchError::ExecutionFailure {
                project: job.project_name.clone(),
                command: command.to_string(),
                source: e.context("Failed to check access policy"),
            })
    }

    async fn execute(
        &self,
        job: &Job,
        command: Command,
    ) -> Result<Option<ExecutorResult>, DispatchError> {
        let env = self.collab.credentials.resolve(job).await.map_err(|e| {
            DispatchError::ExecutionFailure {
                project: job.project_name.clone(),
                command: command.to_string(),
                source: e.context("Failed to resolve credentials"),
            }
        })?;
        CommandRun::new(job, &self.collab, env).run(command).await
    }

    async fn report_run(
        &self,
        job: &Job,
        command: Command,
        started_at: DateTime<Utc>,
        result: &Result<Option<ExecutorResult>, DispatchError>,
    ) {
        let (outcome, output) = match result {
            Ok(Some(r)) => (RunOutcome::Success, r.raw_output.clone()),
            Ok(None) => (RunOutcome::Success, String::new()),
            Err(e) => (RunOutcome::Failed, e.to_string()),
        };
        let run = ProjectRunReport {
            repo: backend_repo_name(&job.namespace),
            project: job.project_name.clone(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            command: command.to_string(),
            output,
        };
        if let Err(e) = self.collab.backend.report_project_run(&run).await {
            warn!(project = %job.project_name, error = %e, "Failed to report project run");
        }
    }

    async fn finalize(&self, jobs: &[Job], report: &mut BatchReport) {
        self.flush_reporter().await;
        let Some(first) = jobs.first() else {
            return;
        };
        let succeeded = report.succeeded();

        let batch = match &self.options.batch_id {
            Some(batch_id) => self.report_job_status(first, batch_id, report, succeeded).await,
            None => None,
        };
        let aggregate = match batch {
            Some(batch) => Some((batch.batch_type, batch.status)),
            None => local_batch(jobs).map(|batch_type| {
                let status = if succeeded {
                    BatchStatus::Succeeded
                } else {
                    BatchStatus::Failed
                };
                (batch_type, status)
            }),
        };
        if let Some((batch_type, status)) = aggregate
            && let Err(e) =
                update_aggregate_status(self.collab.prs.as_ref(), first.pr_number, batch_type, status)
                    .await
        {
            warn!(pr = first.pr_number, error = %e, "Failed to update aggregate status");
        }

        if self.should_merge(jobs, report) {
            match self.merge_pull_request(first.pr_number).await {
                Ok(merged) => report.merged = merged,
                Err(e) => warn!(pr = first.pr_number, error = %e, "Failed to merge PR"),
            }
        }
    }

    /// Merge unless the PR was already merged, a status check is not green,
    /// or GitHub reports it unmergeable. `Ok(true)` when this call merged it.
    async fn merge_pull_request(&self, pr_number: u64) -> anyhow::Result<bool> {
        let prs = &self.collab.prs;
        if prs
            .is_merged(pr_number)
            .await
            .context("Failed to check if PR is merged")?
        {
            info!(pr = pr_number, "PR is already merged, skipping merge");
            return Ok(false);
        }
        let combined = prs
            .combined_status(pr_number)
            .await
            .context("Failed to get combined status")?;
        if combined != CheckState::Success {
            info!(pr = pr_number, status = ?combined, "Not merging: combined status is not success");
            return Ok(false);
        }
        if !prs
            .is_mergeable(pr_number)
            .await
            .context("Failed to check if PR is mergeable")?
        {
            info!(pr = pr_number, "Not merging: PR is not mergeable");
            return Ok(false);
        }
        prs.merge(pr_number).await.context("Failed to merge PR")?;
        info!(pr = pr_number, "Merged PR after successful apply");
        Ok(true)
    }

    async fn report_job_status(
        &self,
        job: &Job,
        batch_id: &str,
        report: &BatchReport,
        succeeded: bool,
    ) -> Option<SerializedBatch> {
        let status = JobStatusReport {
            repo: backend_repo_name(&job.namespace),
            project: job.project_name.clone(),
            batch_id: batch_id.to_string(),
            status: if succeeded {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            },
            timestamp: Utc::now(),
            summary: report.first_plan_summary(),
            plan_json: String::new(),
            output: String::new(),
        };
        match self.collab.backend.report_project_job_status(&status).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(batch_id, error = %e, "Failed to report job status");
                None
            }
        }
    }

    fn should_merge(&self, jobs: &[Job], report: &BatchReport) -> bool {
        if !self.options.auto_merge || !report.at_least_one_apply() || !report.all_applies_succeeded() {
            return false;
        }
        let covered = self
            .options
            .impacted_projects
            .iter()
            .all(|p| jobs.iter().any(|j| &j.project_name == p));
        if !covered {
            info!("Not merging: batch does not cover every impacted project");
        }
        covered
    }

    async fn flush_reporter(&self) {
        if let Err(e) = self.collab.reporter.flush().await {
            warn!(error = %e, "Failed to flush reports");
        }
    }
}

/// Batch type implied by the jobs' commands. `None` for lock-only batches.
fn local_batch(jobs: &[Job]) -> Option<BatchType> {
    let has = |command: Command| jobs.iter().any(|j| j.commands.contains(&command));
    if has(Command::Apply) {
        Some(BatchType::Apply)
    } else if has(Command::Plan) {
        Some(BatchType::Plan)
    } else {
        None
    }
}

/// Mirror a batch into the aggregate plan/apply status checks.
pub async fn update_aggregate_status(
    prs: &dyn PullRequestService,
    pr_number: u64,
    batch_type: BatchType,
    status: BatchStatus,
) -> anyhow::Result<()> {
    let check = status.status_check();
    let (plan, apply) = match batch_type {
        BatchType::Plan => (check, CheckState::Pending),
        BatchType::Apply => (CheckState::Success, check),
    };
    prs.set_status(pr_number, plan, AGGREGATE_PLAN_CONTEXT).await?;
    prs.set_status(pr_number, apply, AGGREGATE_APPLY_CONTEXT).await?;
    Ok(())
}
