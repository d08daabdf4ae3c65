use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    CommandOutput, EnvVars, IacExecutor, PlanOutput, STATE_LOCK_TIMEOUT_ARG, clean_args, process,
};
use crate::errors::IacError;
use crate::job::ToolVariant;

/// Terraform or OpenTofu: same CLI surface, different binary.
#[derive(Debug, Clone)]
pub struct Terraform {
    variant: ToolVariant,
    working_dir: PathBuf,
    workspace: String,
}

impl Terraform {
    pub fn terraform(working_dir: PathBuf, workspace: &str) -> Self {
        Self {
            variant: ToolVariant::Terraform,
            working_dir,
            workspace: workspace.to_string(),
        }
    }

    pub fn opentofu(working_dir: PathBuf, workspace: &str) -> Self {
        Self {
            variant: ToolVariant::OpenTofu,
            working_dir,
            workspace: workspace.to_string(),
        }
    }

    fn program(&self) -> &'static str {
        self.variant.program()
    }

    async fn exec(
        &self,
        command: &str,
        args: Vec<String>,
        env: &EnvVars,
    ) -> Result<process::ProcessOutput, IacError> {
        let mut full = vec![command.to_string()];
        full.extend(args);
        process::run(self.program(), &clean_args(full), &self.working_dir, env).await
    }

    async fn switch_workspace(&self, env: &EnvVars) -> Result<(), IacError> {
        let list = self
            .exec("workspace", vec!["list".to_string()], env)
            .await?
            .require(self.program(), "workspace list", &[0])?;
        let sub = if workspace_exists(&list.stdout, &self.workspace) {
            "select"
        } else {
            "new"
        };
        debug!(workspace = %self.workspace, sub, "Switching workspace");
        self.exec("workspace", vec![sub.to_string(), self.workspace.clone()], env)
            .await?
            .require(self.program(), "workspace", &[0])?;
        Ok(())
    }
}

/// Whether `terraform workspace list` output contains `workspace`.
pub fn workspace_exists(list_output: &str, workspace: &str) -> bool {
    list_output
        .lines()
        .map(|line| line.trim().trim_start_matches('*').trim())
        .any(|name| name == workspace)
}

#[async_trait]
impl IacExecutor for Terraform {
    fn tool(&self) -> ToolVariant {
        self.variant
    }

    async fn init(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.extend(["-input=false".to_string(), "-no-color".to_string()]);
        let out = self
            .exec("init", params, env)
            .await?
            .require(self.program(), "init", &[0])?;

        if self.workspace != "default" {
            self.switch_workspace(env).await?;
        }
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn plan(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<PlanOutput, IacError> {
        let mut params = args.to_vec();
        params.extend([
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-detailed-exitcode".to_string(),
        ]);
        if let Some(path) = plan_file {
            params.extend(["-out".to_string(), path.display().to_string()]);
        }
        params.push(STATE_LOCK_TIMEOUT_ARG.to_string());

        // 0 = no changes, 2 = changes pending
        let out = self
            .exec("plan", params, env)
            .await?
            .require(self.program(), "plan", &[0, 2])?;
        info!(program = self.program(), has_changes = out.exit_code == 2, "Plan finished");
        Ok(PlanOutput {
            has_changes: out.exit_code == 2,
            stdout: out.stdout,
            stderr: out.stderr,
            plan_json: None,
        })
    }

    async fn apply(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.extend([
            STATE_LOCK_TIMEOUT_ARG.to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-auto-approve".to_string(),
        ]);
        if let Some(path) = plan_file {
            params.push(path.display().to_string());
        }
        let out = self
            .exec("apply", params, env)
            .await?
            .require(self.program(), "apply", &[0])?;
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn destroy(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.extend([
            STATE_LOCK_TIMEOUT_ARG.to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-auto-approve".to_string(),
        ]);
        let out = self
            .exec("destroy", params, env)
            .await?
            .require(self.program(), "destroy", &[0])?;
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn show(
        &self,
        args: &[String],
        plan_file: &Path,
        env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.extend([
            "-no-color".to_string(),
            "-json".to_string(),
            plan_file.display().to_string(),
        ]);
        let out = self
            .exec("show", params, env)
            .await?
            .require(self.program(), "show", &[0])?;
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}
