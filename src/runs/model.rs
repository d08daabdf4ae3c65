use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::backend::BatchStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Planning,
    PendingApproval,
    Approved,
    Applying,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Planning => "planning",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Applying => "applying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "planning" => Ok(Self::Planning),
            "pending_approval" => Ok(Self::PendingApproval),
            "approved" => Ok(Self::Approved),
            "applying" => Ok(Self::Applying),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid run status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Plan,
    Apply,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
        }
    }
}

/// A stage of a run: the batch its jobs report into and the serialized jobs
/// the CI workflow executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStage {
    pub batch_id: String,
    pub job_spec: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub project_name: String,
    pub namespace: String,
    pub pr_number: u64,
    pub status: RunStatus,
    pub approval_required: bool,
    pub plan_stage: RunStage,
    pub apply_stage: RunStage,
    pub created_at: String,
    pub updated_at: String,
}

impl Run {
    pub fn stage(&self, kind: StageKind) -> &RunStage {
        match kind {
            StageKind::Plan => &self.plan_stage,
            StageKind::Apply => &self.apply_stage,
        }
    }
}

/// Input for enqueuing a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRun {
    pub project_name: String,
    pub namespace: String,
    pub pr_number: u64,
    pub approval_required: bool,
    pub plan_stage: RunStage,
    pub apply_stage: RunStage,
}

/// Per-project FIFO marker. Only the oldest item of a project is advanced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQueueItem {
    pub id: i64,
    pub run_id: i64,
    pub project_name: String,
    pub created_at: String,
}

/// Result of a stage's batch as seen by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    InProgress,
    Succeeded,
    Failed,
}

impl From<Option<BatchStatus>> for BatchOutcome {
    fn from(status: Option<BatchStatus>) -> Self {
        match status {
            Some(BatchStatus::Succeeded) => Self::Succeeded,
            Some(BatchStatus::Failed | BatchStatus::Invalidated) => Self::Failed,
            Some(BatchStatus::Created | BatchStatus::Started) | None => Self::InProgress,
        }
    }
}
