use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::warn;

use super::{CommandOutput, EnvVars, IacExecutor, PlanOutput, clean_args, process};
use crate::errors::{ExecutionError, IacError};
use crate::job::ToolVariant;
use crate::summary::IacSummary;

const PROGRAM: &str = "pulumi";

/// Pulumi stacks map onto the project workspace.
#[derive(Debug, Clone)]
pub struct Pulumi {
    working_dir: PathBuf,
    stack: String,
}

impl Pulumi {
    pub fn new(working_dir: PathBuf, stack: &str) -> Self {
        Self {
            working_dir,
            stack: stack.to_string(),
        }
    }

    fn with_ci_env(env: &EnvVars) -> EnvVars {
        let mut env = env.clone();
        env.insert("PULUMI_CI".to_string(), "true".to_string());
        env
    }

    async fn exec(
        &self,
        command: &str,
        args: Vec<String>,
        env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        let mut full = vec![command.to_string()];
        full.extend(args);
        full.extend(["--stack".to_string(), self.stack.clone()]);
        let out = process::run(
            PROGRAM,
            &clean_args(full),
            &self.working_dir,
            &Self::with_ci_env(env),
        )
        .await?
        .require(PROGRAM, command, &[0])?;
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }
}

#[async_trait]
impl IacExecutor for Pulumi {
    fn tool(&self) -> ToolVariant {
        ToolVariant::Pulumi
    }

    /// Pulumi has no `init`; installing dependencies is the closest step.
    async fn init(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError> {
        let mut full = vec!["install".to_string()];
        full.extend(args.iter().cloned());
        let out = process::run(
            PROGRAM,
            &clean_args(full),
            &self.working_dir,
            &Self::with_ci_env(env),
        )
        .await?
        .require(PROGRAM, "install", &[0])?;
        Ok(CommandOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn plan(
        &self,
        args: &[String],
        _plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<PlanOutput, IacError> {
        let mut params = args.to_vec();
        params.push("--json".to_string());
        let out = self.exec("preview", params, env).await?;
        let has_changes = match IacSummary::from_pulumi_preview(&out.stdout) {
            Ok((empty, _)) => !empty,
            Err(e) => {
                warn!(error = %e, "Could not parse pulumi preview; assuming changes");
                true
            }
        };
        Ok(PlanOutput {
            has_changes,
            plan_json: Some(out.stdout.clone()),
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn apply(
        &self,
        args: &[String],
        _plan_file: Option<&Path>,
        env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.push("--yes".to_string());
        self.exec("up", params, env).await
    }

    async fn destroy(&self, args: &[String], env: &EnvVars) -> Result<CommandOutput, IacError> {
        let mut params = args.to_vec();
        params.push("--yes".to_string());
        self.exec("destroy", params, env).await
    }

    /// Pulumi has no saved plan to show; the preview JSON from `plan` is used instead.
    async fn show(
        &self,
        _args: &[String],
        _plan_file: &Path,
        _env: &EnvVars,
    ) -> Result<CommandOutput, IacError> {
        Ok(CommandOutput {
            stdout: "{}".to_string(),
            stderr: String::new(),
        })
    }

    fn parse_plan_summary(&self, plan_json: &str) -> Result<(bool, IacSummary), ExecutionError> {
        IacSummary::from_pulumi_preview(plan_json)
    }
}
