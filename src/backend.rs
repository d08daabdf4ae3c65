//! Backend status recording for jobs and batches.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::summary::IacSummary;
use crate::vcs::CheckState;

/// Status of a batch as recorded by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum BatchStatus {
    Created,
    Started,
    Failed,
    Succeeded,
    Invalidated,
}

impl BatchStatus {
    /// Commit status reported for the batch as a whole.
    pub fn status_check(&self) -> CheckState {
        match self {
            BatchStatus::Created | BatchStatus::Started => CheckState::Pending,
            BatchStatus::Failed | BatchStatus::Invalidated => CheckState::Failure,
            BatchStatus::Succeeded => CheckState::Success,
        }
    }
}

impl From<BatchStatus> for i8 {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Created => 1,
            BatchStatus::Started => 2,
            BatchStatus::Failed => 3,
            BatchStatus::Succeeded => 4,
            BatchStatus::Invalidated => 5,
        }
    }
}

impl TryFrom<i8> for BatchStatus {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BatchStatus::Created),
            2 => Ok(BatchStatus::Started),
            3 => Ok(BatchStatus::Failed),
            4 => Ok(BatchStatus::Succeeded),
            5 => Ok(BatchStatus::Invalidated),
            _ => Err(format!("Invalid batch status: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Plan,
    Apply,
}

/// Status of a single job inside a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum JobStatus {
    Created,
    Triggered,
    Failed,
    Started,
    Succeeded,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Triggered | JobStatus::Started => "running",
            JobStatus::Failed => "failed",
            JobStatus::Succeeded => "succeeded",
        }
    }
}

impl From<JobStatus> for i8 {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Created => 1,
            JobStatus::Triggered => 2,
            JobStatus::Failed => 3,
            JobStatus::Started => 4,
            JobStatus::Succeeded => 5,
        }
    }
}

impl TryFrom<i8> for JobStatus {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(JobStatus::Created),
            2 => Ok(JobStatus::Triggered),
            3 => Ok(JobStatus::Failed),
            4 => Ok(JobStatus::Started),
            5 => Ok(JobStatus::Succeeded),
            _ => Err(format!("Invalid job status: {}", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedJob {
    pub job_id: String,
    pub status: JobStatus,
    pub project_name: String,
    #[serde(default)]
    pub workflow_run_url: Option<String>,
    #[serde(default)]
    pub resources_created: u32,
    #[serde(default)]
    pub resources_updated: u32,
    #[serde(default)]
    pub resources_deleted: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedBatch {
    pub id: String,
    pub pr_number: u64,
    pub status: BatchStatus,
    #[serde(default)]
    pub branch_name: String,
    #[serde(default)]
    pub repo_full_name: String,
    pub batch_type: BatchType,
    #[serde(default)]
    pub jobs: Vec<SerializedJob>,
}

/// Final status of one job, sent once the batch has run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusReport {
    /// `owner-repo`
    pub repo: String,
    pub project: String,
    pub batch_id: String,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    pub summary: Option<IacSummary>,
    pub plan_json: String,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunOutcome {
    Success,
    Failed,
}

/// One command run against one project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRunReport {
    pub repo: String,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub command: String,
    pub output: String,
}

/// `owner/repo` as the backend addresses it.
pub fn backend_repo_name(namespace: &str) -> String {
    namespace.replace('/', "-")
}

#[async_trait]
pub trait BackendStatusApi: Send + Sync {
    /// Record a job's final status. Returns the batch it belongs to, when the
    /// backend tracks batches.
    async fn report_project_job_status(
        &self,
        report: &JobStatusReport,
    ) -> anyhow::Result<Option<SerializedBatch>>;

    async fn report_project_run(&self, report: &ProjectRunReport) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBackend;

#[async_trait]
impl BackendStatusApi for NoopBackend {
    async fn report_project_job_status(
        &self,
        _report: &JobStatusReport,
    ) -> anyhow::Result<Option<SerializedBatch>> {
        Ok(None)
    }

    async fn report_project_run(&self, _report: &ProjectRunReport) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Reports to an HTTP backend with a bearer token.
#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    host: String,
    token: String,
}

impl HttpBackend {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn job_status_url(&self, report: &JobStatusReport) -> String {
        format!(
            "{}/repos/{}/projects/{}/jobs/{}/set-status",
            self.host, report.repo, report.project, report.batch_id
        )
    }

    fn project_run_url(&self, report: &ProjectRunReport) -> String {
        format!(
            "{}/repos/{}/projects/{}/runs",
            self.host, report.repo, report.project
        )
    }
}

#[async_trait]
impl BackendStatusApi for HttpBackend {
    async fn report_project_job_status(
        &self,
        report: &JobStatusReport,
    ) -> anyhow::Result<Option<SerializedBatch>> {
        let url = self.job_status_url(report);
        debug!(url = %url, status = report.status.as_str(), "Reporting job status");
        let body = json!({
            "status": report.status.as_str(),
            "timestamp": report.timestamp,
            "job_summary": report.summary,
            "plan_json": report.plan_json,
            "terraform_output": report.output,
        });
        let batch = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Failed to send job status to backend")?
            .error_for_status()
            .context("Backend returned error status for job status")?
            .json::<SerializedBatch>()
            .await
            .context("Failed to parse batch from backend response")?;
        Ok(Some(batch))
    }

    async fn report_project_run(&self, report: &ProjectRunReport) -> anyhow::Result<()> {
        let body = json!({
            "startedAt": report.started_at,
            "endedAt": report.finished_at,
            "status": report.outcome,
            "command": report.command,
            "output": report.output,
        });
        self.client
            .post(self.project_run_url(report))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("Failed to send project run to backend")?
            .error_for_status()
            .context("Backend returned error status for project run")?;
        Ok(())
    }
}
