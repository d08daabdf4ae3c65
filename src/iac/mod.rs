//! IaC tool capability, one implementation per [`ToolVariant`].

pub mod process;
pub mod pulumi;
pub mod terraform;
pub mod terragrunt;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{ExecutionError, IacError};
use crate::job::{Job, ToolVariant};
use crate::summary::IacSummary;

pub use pulumi::Pulumi;
pub use terraform::Terraform;
pub use terragrunt::Terragrunt;

pub type EnvVars = BTreeMap<String, String>;

/// Timeout the tool waits for its own state lock on state-changing commands.
pub const STATE_LOCK_TIMEOUT_ARG: &str = "-lock-timeout=3m";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutput {
    pub has_changes: bool,
    pub stdout: String,
    pub stderr: String,
    /// Machine-readable plan when the tool emits it directly instead of
    /// through `show`.
    pub plan_json: Option<String>,
}

#[async_trait]
pub trait IacExecutor: Send + Sync {
    fn tool(&self) -> ToolVariant;

    async fn init(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError>;

    async fn plan(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<PlanOutput, IacError>;

    async fn apply(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<CommandOutput, IacError>;

    async fn destroy(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError>;

    async fn show(
        &self,
        args: &[String],
        plan_file: &Path,
        env: &EnvVars,
    ) -> Result<CommandOutput, IacError>;

    /// Returns `(is_empty, summary)` for the tool's machine-readable plan.
    fn parse_plan_summary(&self, plan_json: &str) -> Result<(bool, IacSummary), ExecutionError> {
        IacSummary::from_plan_json(plan_json)
    }
}

/// Resolve a tool variant into its executor, bound to one working directory.
pub fn executor_for(tool: ToolVariant, dir: PathBuf, workspace: &str) -> Arc<dyn IacExecutor> {
    match tool {
        ToolVariant::Terraform => Arc::new(Terraform::terraform(dir, workspace)),
        ToolVariant::OpenTofu => Arc::new(Terraform::opentofu(dir, workspace)),
        ToolVariant::Terragrunt => Arc::new(Terragrunt::new(dir)),
        ToolVariant::Pulumi => Arc::new(Pulumi::new(dir, workspace)),
    }
}

pub trait ExecutorFactory: Send + Sync {
    fn build(&self, job: &Job) -> Arc<dyn IacExecutor>;
}

/// Spawns the real tool binaries.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutorFactory;

impl ExecutorFactory for ProcessExecutorFactory {
    fn build(&self, job: &Job) -> Arc<dyn IacExecutor> {
        executor_for(job.tool, job.project_dir.clone(), &job.workspace)
    }
}

/// Drop empty arguments and trim whitespace, as tools reject `""` arguments.
pub(crate) fn clean_args(args: impl IntoIterator<Item = String>) -> Vec<String> {
    args.into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_for_selects_variant() {
        let dir = PathBuf::from("/tmp/project");
        assert_eq!(
            executor_for(ToolVariant::Terraform, dir.clone(), "default").tool(),
            ToolVariant::Terraform
        );
        assert_eq!(
            executor_for(ToolVariant::OpenTofu, dir.clone(), "default").tool(),
            ToolVariant::OpenTofu
        );
        assert_eq!(
            executor_for(ToolVariant::Terragrunt, dir.clone(), "default").tool(),
            ToolVariant::Terragrunt
        );
        assert_eq!(
            executor_for(ToolVariant::Pulumi, dir, "dev").tool(),
            ToolVariant::Pulumi
        );
    }

    #[test]
    fn test_clean_args_drops_blanks() {
        let args = clean_args(vec![
            " -var=a=1 ".to_string(),
            "".to_string(),
            "   ".to_string(),
            "-refresh=false".to_string(),
        ]);
        assert_eq!(args, vec!["-var=a=1", "-refresh=false"]);
    }
}
