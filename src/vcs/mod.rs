//! Pull-request capability consumed by the locking and dispatch layers.

pub mod github;

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use github::GithubPullRequestService;

/// Commit status state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckState {
    Pending,
    Success,
    Failure,
    Error,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

impl FromStr for CheckState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid check state: {}", s)),
        }
    }
}

/// Handle to a published PR comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRef {
    pub id: u64,
    pub url: String,
}

/// Status-check context for a project's plan, e.g. `network/plan`.
pub fn plan_context(project: &str) -> String {
    format!("{}/plan", project)
}

pub fn apply_context(project: &str) -> String {
    format!("{}/apply", project)
}

pub const AGGREGATE_PLAN_CONTEXT: &str = "plangate/plan";
pub const AGGREGATE_APPLY_CONTEXT: &str = "plangate/apply";

#[async_trait]
pub trait PullRequestService: Send + Sync {
    async fn is_closed(&self, pr_number: u64) -> anyhow::Result<bool>;
    async fn is_merged(&self, pr_number: u64) -> anyhow::Result<bool>;
    async fn is_mergeable(&self, pr_number: u64) -> anyhow::Result<bool>;
    async fn set_status(
        &self,
        pr_number: u64,
        state: CheckState,
        context: &str,
    ) -> anyhow::Result<()>;
    async fn combined_status(&self, pr_number: u64) -> anyhow::Result<CheckState>;
    async fn changed_files(&self, pr_number: u64) -> anyhow::Result<Vec<String>>;
    /// Logins of reviewers whose latest review approves the PR.
    async fn approvals(&self, pr_number: u64) -> anyhow::Result<Vec<String>>;
    async fn publish_comment(&self, pr_number: u64, body: &str) -> anyhow::Result<CommentRef>;
    async fn edit_comment(&self, pr_number: u64, comment_id: u64, body: &str)
    -> anyhow::Result<()>;
    async fn merge(&self, pr_number: u64) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_state_roundtrip() {
        for state in [
            CheckState::Pending,
            CheckState::Success,
            CheckState::Failure,
            CheckState::Error,
        ] {
            assert_eq!(state.as_str().parse::<CheckState>().unwrap(), state);
        }
        assert!("skipped".parse::<CheckState>().is_err());
    }

    #[test]
    fn test_contexts() {
        assert_eq!(plan_context("network"), "network/plan");
        assert_eq!(apply_context("network"), "network/apply");
    }
}
