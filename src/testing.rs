//! In-memory fakes for the collaborator traits, shared by unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use crate::backend::{BackendStatusApi, JobStatusReport, ProjectRunReport, SerializedBatch};
use crate::errors::{ExecutionError, IacError};
use crate::execution::{ApplyResult, Executor, PlanResult};
use crate::iac::{CommandOutput, EnvVars, ExecutorFactory, IacExecutor, PlanOutput};
use crate::job::{Command, Job, ToolVariant};
use crate::policy::{AccessRequest, PlanVerdict, PolicyChecker};
use crate::reporting::{CommentFormat, Reporter};
use crate::runs::{CiBackend, Run, StageKind};
use crate::summary::IacSummary;
use crate::vcs::{CheckState, CommentRef, PullRequestService};

/// A plan-only job for project `name` on PR #1 of `acme/infra`.
pub fn job(name: &str) -> Job {
    Job {
        project_name: name.to_string(),
        project_dir: PathBuf::from("projects").join(name),
        workspace: "default".to_string(),
        tool: ToolVariant::Terraform,
        commands: vec![Command::Plan],
        plan_stage: None,
        apply_stage: None,
        pr_number: 1,
        requested_by: "ana".to_string(),
        namespace: "acme/infra".to_string(),
        state_env_vars: Vec::new(),
        command_env_vars: Vec::new(),
        skip_merge_check: false,
    }
}

// ── pull requests ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePullRequestService {
    closed: HashSet<u64>,
    fail_is_closed: bool,
    not_mergeable: bool,
    merged: bool,
    changed_files: Vec<String>,
    statuses: Mutex<Vec<(u64, CheckState, String)>>,
    comments: Mutex<Vec<(u64, String)>>,
    merges: Mutex<Vec<u64>>,
    next_comment_id: AtomicU64,
}

impl FakePullRequestService {
    pub fn with_closed(mut self, pr_number: u64) -> Self {
        self.closed.insert(pr_number);
        self
    }

    pub fn failing_is_closed(mut self) -> Self {
        self.fail_is_closed = true;
        self
    }

    pub fn not_mergeable(mut self) -> Self {
        self.not_mergeable = true;
        self
    }

    pub fn merged(mut self) -> Self {
        self.merged = true;
        self
    }

    pub fn with_changed_files(mut self, files: &[&str]) -> Self {
        self.changed_files = files.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn statuses(&self) -> Vec<(u64, CheckState, String)> {
        self.statuses.lock().unwrap().clone()
    }

    /// Latest state set for `context`.
    pub fn last_status(&self, context: &str) -> Option<CheckState> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, _, c)| c == context)
            .map(|(_, state, _)| *state)
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.lock().unwrap().clone()
    }

    pub fn merges(&self) -> Vec<u64> {
        self.merges.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestService for FakePullRequestService {
    async fn is_closed(&self, pr_number: u64) -> anyhow::Result<bool> {
        if self.fail_is_closed {
            anyhow::bail!("GitHub unavailable");
        }
        Ok(self.closed.contains(&pr_number))
    }

    async fn is_merged(&self, _pr_number: u64) -> anyhow::Result<bool> {
        Ok(self.merged)
    }

    async fn is_mergeable(&self, _pr_number: u64) -> anyhow::Result<bool> {
        Ok(!self.not_mergeable)
    }

    async fn set_status(
        &self,
        pr_number: u64,
        state: CheckState,
        context: &str,
    ) -> anyhow::Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((pr_number, state, context.to_string()));
        Ok(())
    }

    async fn combined_status(&self, _pr_number: u64) -> anyhow::Result<CheckState> {
        let mut latest: HashMap<String, CheckState> = HashMap::new();
        for (_, state, context) in self.statuses.lock().unwrap().iter() {
            latest.insert(context.clone(), *state);
        }
        let states: Vec<CheckState> = latest.into_values().collect();
        Ok(if states.contains(&CheckState::Failure) {
            CheckState::Failure
        } else if states.contains(&CheckState::Pending) {
            CheckState::Pending
        } else {
            CheckState::Success
        })
    }

    async fn changed_files(&self, _pr_number: u64) -> anyhow::Result<Vec<String>> {
        Ok(self.changed_files.clone())
    }

    async fn approvals(&self, _pr_number: u64) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn publish_comment(&self, pr_number: u64, body: &str) -> anyhow::Result<CommentRef> {
        self.comments
            .lock()
            .unwrap()
            .push((pr_number, body.to_string()));
        let id = self.next_comment_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CommentRef {
            id,
            url: format!("https://github.test/comments/{id}"),
        })
    }

    async fn edit_comment(
        &self,
        pr_number: u64,
        _comment_id: u64,
        body: &str,
    ) -> anyhow::Result<()> {
        self.comments
            .lock()
            .unwrap()
            .push((pr_number, body.to_string()));
        Ok(())
    }

    async fn merge(&self, pr_number: u64) -> anyhow::Result<()> {
        self.merges.lock().unwrap().push(pr_number);
        Ok(())
    }
}

// ── reporting ──────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, CommentFormat)>>,
    fail: bool,
    flushes: AtomicUsize,
}

impl RecordingReporter {
    /// Records reports but returns an error for each.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(_, format)| match format {
                CommentFormat::Plain => None,
                CommentFormat::Comment { title } | CommentFormat::Collapsible { title, .. } => {
                    Some(title.clone())
                }
            })
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(&self, text: &str, format: CommentFormat) -> anyhow::Result<()> {
        self.reports
            .lock()
            .unwrap()
            .push((text.to_string(), format));
        if self.fail {
            anyhow::bail!("comment API unavailable");
        }
        Ok(())
    }

    async fn flush(&self) -> anyhow::Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("comment API unavailable");
        }
        Ok(())
    }

    fn suppress(&self) {}

    fn supports_markdown(&self) -> bool {
        true
    }
}

// ── IaC tools ──────────────────────────────────────────────────────────

/// Scripted IaC tool. Plans write a placeholder plan file and `show` returns
/// a plan with the configured resource changes.
#[derive(Default)]
pub struct FakeIacExecutor {
    changes: (u32, u32, u32),
    failing: Option<&'static str>,
    calls: Mutex<Vec<&'static str>>,
    applied: Mutex<Vec<Option<PathBuf>>>,
}

impl FakeIacExecutor {
    pub fn with_plan_changes(created: u32, updated: u32, deleted: u32) -> Self {
        Self {
            changes: (created, updated, deleted),
            ..Self::default()
        }
    }

    /// Make `command` exit non-zero.
    pub fn failing(mut self, command: &'static str) -> Self {
        self.failing = Some(command);
        self
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Plan file passed to each apply.
    pub fn applied_plan_files(&self) -> Vec<Option<PathBuf>> {
        self.applied.lock().unwrap().clone()
    }

    fn has_changes(&self) -> bool {
        let (c, u, d) = self.changes;
        c + u + d > 0
    }

    fn record(&self, command: &'static str) -> Result<(), IacError> {
        self.calls.lock().unwrap().push(command);
        if self.failing == Some(command) {
            return Err(IacError::NonZeroExit {
                program: "terraform".to_string(),
                command: command.to_string(),
                exit_code: 1,
                stderr: format!("{command} exploded"),
            });
        }
        Ok(())
    }

    fn plan_json(&self) -> String {
        let (c, u, d) = self.changes;
        let mut changes = Vec::new();
        for (count, action) in [(c, "create"), (u, "update"), (d, "delete")] {
            for i in 0..count {
                changes.push(json!({
                    "address": format!("null_resource.{action}_{i}"),
                    "change": {"actions": [action]},
                }));
            }
        }
        json!({ "resource_changes": changes }).to_string()
    }
}

#[async_trait]
impl IacExecutor for FakeIacExecutor {
    fn tool(&self) -> ToolVariant {
        ToolVariant::Terraform
    }

    async fn init(&self, _args: &[String], _env: &EnvVars) -> Result<CommandOutput, IacError> {
        self.record("init")?;
        Ok(CommandOutput::default())
    }

    async fn plan(
        &self,
        _args: &[String],
        plan_file: Option<&Path>,
        _env: &EnvVars,
    ) -> Result<PlanOutput, IacError> {
        self.record("plan")?;
        if self.has_changes()
            && let Some(path) = plan_file
        {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, b"fake-plan").unwrap();
        }
        Ok(PlanOutput {
            has_changes: self.has_changes(),
            stdout: "Plan finished".to_string(),
            stderr: String::new(),
            plan_json: None,
        })
    }

    async fn apply(
        &self,
        _args: &[String],
        plan_file: Option<&Path>,
        _env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        self.record("apply")?;
        self.applied
            .lock()
            .unwrap()
            .push(plan_file.map(Path::to_path_buf));
        let (c, u, d) = self.changes;
        Ok(CommandOutput {
            stdout: format!("Apply complete! Resources: {c} added, {u} changed, {d} destroyed."),
            stderr: String::new(),
        })
    }

    async fn destroy(&self, _args: &[String], _env: &EnvVars) -> Result<CommandOutput, IacError> {
        self.record("destroy")?;
        Ok(CommandOutput::default())
    }

    async fn show(
        &self,
        _args: &[String],
        _plan_file: &Path,
        _env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        self.record("show")?;
        Ok(CommandOutput {
            stdout: self.plan_json(),
            stderr: String::new(),
        })
    }
}

/// Hands out one [`FakeIacExecutor`] per project.
#[derive(Default)]
pub struct FakeExecutorFactory {
    executors: Mutex<HashMap<String, Arc<FakeIacExecutor>>>,
}

impl FakeExecutorFactory {
    pub fn with_executor(self, project: &str, executor: FakeIacExecutor) -> Self {
        self.insert(project, executor);
        self
    }

    pub fn insert(&self, project: &str, executor: FakeIacExecutor) {
        self.executors
            .lock()
            .unwrap()
            .insert(project.to_string(), Arc::new(executor));
    }

    pub fn executor(&self, project: &str) -> Arc<FakeIacExecutor> {
        self.executors
            .lock()
            .unwrap()
            .entry(project.to_string())
            .or_default()
            .clone()
    }
}

impl ExecutorFactory for FakeExecutorFactory {
    fn build(&self, job: &Job) -> Arc<dyn IacExecutor> {
        self.executor(&job.project_name)
    }
}

/// Executor that always performs and records which stage ran.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for RecordingExecutor {
    async fn plan(&self) -> Result<PlanResult, ExecutionError> {
        self.calls.lock().unwrap().push("plan");
        Ok(PlanResult {
            performed: true,
            ..PlanResult::default()
        })
    }

    async fn apply(&self) -> Result<ApplyResult, ExecutionError> {
        self.calls.lock().unwrap().push("apply");
        Ok(ApplyResult {
            performed: true,
            summary: Some(IacSummary::default()),
            ..ApplyResult::default()
        })
    }

    async fn destroy(&self) -> Result<bool, ExecutionError> {
        self.calls.lock().unwrap().push("destroy");
        Ok(true)
    }
}

// ── policy ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakePolicy {
    deny_all: bool,
    denied: Vec<Command>,
    plan_violations: Vec<String>,
    requests: Mutex<Vec<AccessRequest>>,
}

impl FakePolicy {
    pub fn deny_access() -> Self {
        Self {
            deny_all: true,
            ..Self::default()
        }
    }

    pub fn deny_command(mut self, command: Command) -> Self {
        self.denied.push(command);
        self
    }

    pub fn with_plan_violations(mut self, violations: &[&str]) -> Self {
        self.plan_violations = violations.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn requests(&self) -> Vec<AccessRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PolicyChecker for FakePolicy {
    async fn check_access_policy(&self, request: &AccessRequest) -> anyhow::Result<bool> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(!self.deny_all && !self.denied.contains(&request.command))
    }

    async fn check_plan_policy(
        &self,
        _namespace: &str,
        _project: &str,
        _plan_json: &str,
    ) -> anyhow::Result<PlanVerdict> {
        Ok(if self.plan_violations.is_empty() {
            PlanVerdict::allow()
        } else {
            PlanVerdict::deny(self.plan_violations.clone())
        })
    }
}

// ── backend ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingBackend {
    batch: Option<SerializedBatch>,
    job_reports: Mutex<Vec<JobStatusReport>>,
    runs: Mutex<Vec<ProjectRunReport>>,
}

impl RecordingBackend {
    /// Answer job status reports with `batch`.
    pub fn with_batch(batch: SerializedBatch) -> Self {
        Self {
            batch: Some(batch),
            ..Self::default()
        }
    }

    pub fn job_reports(&self) -> Vec<JobStatusReport> {
        self.job_reports.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<ProjectRunReport> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendStatusApi for RecordingBackend {
    async fn report_project_job_status(
        &self,
        report: &JobStatusReport,
    ) -> anyhow::Result<Option<SerializedBatch>> {
        self.job_reports.lock().unwrap().push(report.clone());
        Ok(self.batch.clone())
    }

    async fn report_project_run(&self, report: &ProjectRunReport) -> anyhow::Result<()> {
        self.runs.lock().unwrap().push(report.clone());
        Ok(())
    }
}

// ── CI ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeCi {
    fail: bool,
    triggers: Mutex<Vec<(i64, StageKind)>>,
}

impl FakeCi {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn triggers(&self) -> Vec<(i64, StageKind)> {
        self.triggers.lock().unwrap().clone()
    }
}

#[async_trait]
impl CiBackend for FakeCi {
    async fn trigger(&self, run: &Run, stage: StageKind) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("workflow dispatch rejected");
        }
        self.triggers.lock().unwrap().push((run.id, stage));
        Ok(())
    }
}
