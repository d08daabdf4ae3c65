use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{
    CommandOutput, EnvVars, IacExecutor, PlanOutput, STATE_LOCK_TIMEOUT_ARG, clean_args, process,
};
use crate::errors::IacError;
use crate::job::ToolVariant;

const PROGRAM: &str = "terragrunt";
const NON_INTERACTIVE: &str = "--terragrunt-non-interactive";

#[derive(Debug, Clone)]
pub struct Terragrunt {
    working_dir: PathBuf,
}

impl Terragrunt {
    pub fn new(working_dir: PathBuf) -> Self {
        Self { working_dir }
    }

    async fn exec(
        &self,
        command: &str,
        args: Vec<String>,
        env: &EnvVars,
        allowed: &[i32],
    ) -> Result<CommandOutput, IacError> {
        let mut full = vec![command.to_string()];
        full.extend(args);
        let out = process::run(PROGRAM, &clean_args(full), &self.working_dir, env)
            .await?
            .require(PROGRAM, command, allowed)?;
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

#[async_trait]
impl IacExecutor for Terragrunt {
    fn tool(&self) -> ToolVariant {
        ToolVariant::Terragrunt
    }

    async fn init(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.push(NON_INTERACTIVE.to_string());
        self.exec("init", params, env, &[0]).await
    }

    /// Terragrunt does not pass through detailed exit codes reliably, so every
    /// successful plan is treated as having changes and the plan JSON decides.
    async fn plan(
        &self,
        args: &[String],
        plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<PlanOutput, IacError> {
        let mut params = args.to_vec();
        if let Some(path) = plan_file {
            params.extend(["-out".to_string(), path.display().to_string()]);
        }
        params.extend([STATE_LOCK_TIMEOUT_ARG.to_string(), NON_INTERACTIVE.to_string()]);
        let out = self.exec("plan", params, env, &[0]).await?;
        Ok(PlanOutput {
            has_changes: true,
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
            "--auto-approve".to_string(),
            NON_INTERACTIVE.to_string(),
        ]);
        if let Some(path) = plan_file {
            params.push(path.display().to_string());
        }
        self.exec("apply", params, env, &[0]).await
    }

    async fn destroy(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.extend([
            STATE_LOCK_TIMEOUT_ARG.to_string(),
            "--auto-approve".to_string(),
            NON_INTERACTIVE.to_string(),
        ]);
        self.exec("destroy", params, env, &[0]).await
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
        self.exec("show", params, env, &[0]).await
    }
}
