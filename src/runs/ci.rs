use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::model::{Run, StageKind};
use crate::vcs::github::parse_namespace;

/// Starts the CI workflow that executes one stage of a run.
#[async_trait]
pub trait CiBackend: Send + Sync {
    async fn trigger(&self, run: &Run, stage: StageKind) -> anyhow::Result<()>;
}

/// Triggers a GitHub Actions `workflow_dispatch` in the run's repository.
#[derive(Clone)]
pub struct GithubActionsCi {
    client: reqwest::Client,
    api_url: String,
    token: String,
    workflow: String,
    git_ref: String,
}

impl GithubActionsCi {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        workflow: impl Into<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            workflow: workflow.into(),
            git_ref: git_ref.into(),
        }
    }

    fn dispatch_url(&self, namespace: &str) -> anyhow::Result<String> {
        let (owner, repo) = parse_namespace(namespace)
            .with_context(|| format!("Invalid repository namespace '{}'", namespace))?;
        Ok(format!(
            "{}/repos/{}/{}/actions/workflows/{}/dispatches",
            self.api_url, owner, repo, self.workflow
        ))
    }

    fn dispatch_body(&self, run: &Run, stage: StageKind) -> serde_json::Value {
        let spec = run.stage(stage);
        json!({
            "ref": self.git_ref,
            "inputs": {
                "run_id": run.id.to_string(),
                "stage": stage.as_str(),
                "batch_id": spec.batch_id,
                "job_spec": spec.job_spec,
            }
        })
    }
}

#[async_trait]
impl CiBackend for GithubActionsCi {
    async fn trigger(&self, run: &Run, stage: StageKind) -> anyhow::Result<()> {
        let url = self.dispatch_url(&run.namespace)?;
        info!(run_id = run.id, stage = stage.as_str(), workflow = %self.workflow, "Dispatching workflow");
        self.client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "plangate")
            .json(&self.dispatch_body(run, stage))
            .send()
            .await
            .context("Failed to send workflow dispatch to GitHub")?
            .error_for_status()
            .with_context(|| format!("GitHub rejected workflow dispatch for run {}", run.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runs::model::{RunStage, RunStatus};

    fn run() -> Run {
        Run {
            id: 12,
            project_name: "db".into(),
            namespace: "acme/infra".into(),
            pr_number: 4,
            status: RunStatus::Queued,
            approval_required: false,
            plan_stage: RunStage {
                batch_id: "p-1".into(),
                job_spec: "[{\"project_name\":\"db\"}]".into(),
            },
            apply_stage: RunStage {
                batch_id: "a-1".into(),
                job_spec: "[]".into(),
            },
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_dispatch_url() {
        let ci = GithubActionsCi::new("https://api.github.com/", "t", "plangate.yml", "main");
        assert_eq!(
            ci.dispatch_url("acme/infra").unwrap(),
            "https://api.github.com/repos/acme/infra/actions/workflows/plangate.yml/dispatches"
        );
        assert!(ci.dispatch_url("acme").is_err());
    }

    #[test]
    fn test_dispatch_body_carries_stage() {
        let ci = GithubActionsCi::new("https://api.github.com", "t", "plangate.yml", "main");
        let body = ci.dispatch_body(&run(), StageKind::Apply);
        assert_eq!(body["ref"], "main");
        assert_eq!(body["inputs"]["run_id"], "12");
        assert_eq!(body["inputs"]["stage"], "apply");
        assert_eq!(body["inputs"]["batch_id"], "a-1");
    }
}
