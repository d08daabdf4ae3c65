//! Runs a job's plan, apply and destroy stages against one project.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::plan_path::PlanPathProvider;
use crate::credentials::JobEnv;
use crate::errors::{ExecutionError, IacError};
use crate::iac::{IacExecutor, process};
use crate::job::{Stage, Step, StepAction};
use crate::reporting::{Reporter, titled_format};
use crate::storage::PlanStorage;
use crate::summary::IacSummary;

const DEFAULT_SHELL: &str = "bash";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanResult {
    pub performed: bool,
    pub non_empty: bool,
    pub summary: Option<IacSummary>,
    pub output: String,
    pub plan_json: String,
    /// Holder of the project lock when the plan was not performed.
    pub lock_holder: Option<u64>,
}

impl PlanResult {
    pub fn not_performed(lock_holder: Option<u64>) -> Self {
        Self {
            lock_holder,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    pub performed: bool,
    pub summary: Option<IacSummary>,
    pub output: String,
    pub lock_holder: Option<u64>,
}

impl ApplyResult {
    pub fn not_performed(lock_holder: Option<u64>) -> Self {
        Self {
            performed: false,
            summary: None,
            output: "couldn't lock ".to_string(),
            lock_holder,
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn plan(&self) -> Result<PlanResult, ExecutionError>;
    async fn apply(&self) -> Result<ApplyResult, ExecutionError>;
    /// `Ok(false)` when the destroy was not performed.
    async fn destroy(&self) -> Result<bool, ExecutionError>;
}

/// Executes stages through an [`IacExecutor`], storing plans between jobs.
pub struct ProjectExecutor {
    project_id: String,
    project_dir: PathBuf,
    env: JobEnv,
    plan_stage: Stage,
    apply_stage: Stage,
    iac: Arc<dyn IacExecutor>,
    reporter: Arc<dyn Reporter>,
    plan_storage: Option<Arc<dyn PlanStorage>>,
    paths: PlanPathProvider,
}

impl ProjectExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: String,
        project_dir: PathBuf,
        env: JobEnv,
        plan_stage: Stage,
        apply_stage: Stage,
        iac: Arc<dyn IacExecutor>,
        reporter: Arc<dyn Reporter>,
        plan_storage: Option<Arc<dyn PlanStorage>>,
        paths: PlanPathProvider,
    ) -> Self {
        Self {
            project_id,
            project_dir,
            env,
            plan_stage,
            apply_stage,
            iac,
            reporter,
            plan_storage,
            paths,
        }
    }

    pub fn paths(&self) -> &PlanPathProvider {
        &self.paths
    }

    /// Machine-readable form of the stored plan, for policy checks before apply.
    pub async fn retrieve_plan_json(&self) -> Result<String, ExecutionError> {
        let storage = self.plan_storage.as_ref().ok_or_else(|| {
            ExecutionError::PlanStorage(anyhow::anyhow!("Plan storage is not configured"))
        })?;
        let artifact = self.paths.artifact_name();
        let file_name = self.paths.stored_plan_file_name();
        if !storage
            .exists(artifact, &file_name)
            .await
            .map_err(ExecutionError::PlanStorage)?
        {
            return Err(ExecutionError::PlanStorage(anyhow::anyhow!(
                "stored plan does not exist"
            )));
        }
        let local = storage
            .retrieve(&self.paths.local_plan_path(), artifact, &file_name)
            .await
            .map_err(ExecutionError::PlanStorage)?
            .ok_or_else(|| ExecutionError::PlanStorage(anyhow::anyhow!("stored plan vanished")))?;

        // Providers must be installed before the plan can be shown.
        if let Some(init) = self
            .plan_stage
            .steps
            .iter()
            .find(|s| s.action == StepAction::Init)
        {
            self.iac.init(&init.extra_args, &self.env.state).await?;
        }
        let shown = self.iac.show(&[], &local, &self.env.commands).await?;
        Ok(shown.stdout)
    }

    async fn run_step(&self, step: &Step) -> Result<(), ExecutionError> {
        let script = step.value.as_deref().unwrap_or_default();
        let shell = step.shell.as_deref().unwrap_or(DEFAULT_SHELL);
        info!(project = %self.project_id, command = script, "Running custom step");
        let out = process::run_shell(shell, script, &self.project_dir, &self.env.run).await?;
        if !out.success() {
            return Err(IacError::Step {
                step: script.to_string(),
                message: format!("exit code {}: {}", out.exit_code, out.stderr.trim()),
            }
            .into());
        }
        Ok(())
    }

    async fn init(&self, step: &Step) -> Result<(), ExecutionError> {
        if let Err(e) = self.iac.init(&step.extra_args, &self.env.state).await {
            self.report(&e.to_string(), "Error during init.").await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn store_plan(&self) -> Result<(), ExecutionError> {
        let Some(storage) = &self.plan_storage else {
            return Ok(());
        };
        let local = self.paths.local_plan_path();
        let bytes = match tokio::fs::read(&local).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %local.display(), "No plan file written; nothing to store");
                return Ok(());
            }
            Err(e) => return Err(ExecutionError::PlanStorage(e.into())),
        };
        storage
            .store(
                &bytes,
                self.paths.artifact_name(),
                &self.paths.stored_plan_file_name(),
            )
            .await
            .map_err(ExecutionError::PlanStorage)
    }

    async fn report(&self, text: &str, title: &str) {
        let format = titled_format(self.reporter.as_ref(), title);
        if let Err(e) = self.reporter.report(text, format).await {
            warn!(error = %e, "Failed to publish report");
        }
    }
}

#[async_trait]
impl Executor for ProjectExecutor {
    async fn plan(&self) -> Result<PlanResult, ExecutionError> {
        let mut result = PlanResult {
            performed: true,
            ..PlanResult::default()
        };

        for step in &self.plan_stage.steps {
            debug!(project = %self.project_id, action = step.action.as_str(), "Plan step");
            match step.action {
                StepAction::Init => self.init(step).await?,
                StepAction::Plan => {
                    let local = self.paths.local_plan_path();
                    let out = self
                        .iac
                        .plan(&step.extra_args, Some(&local), &self.env.commands)
                        .await?;

                    let plan_json = match out.plan_json {
                        Some(json) => json,
                        None => match self.iac.show(&[], &local, &self.env.commands).await {
                            Ok(shown) => shown.stdout,
                            Err(e) => {
                                warn!(project = %self.project_id, error = %e, "Could not show plan");
                                String::new()
                            }
                        },
                    };

                    if plan_json.trim().is_empty() {
                        result.non_empty = out.has_changes;
                    } else {
                        let (empty, summary) = self.iac.parse_plan_summary(&plan_json)?;
                        result.non_empty = !empty;
                        result.summary = Some(summary);
                    }
                    self.store_plan().await?;
                    result.output = out.stdout;
                    result.plan_json = plan_json;
                }
                StepAction::Run => self.run_step(step).await?,
                StepAction::Apply | StepAction::Destroy => {
                    warn!(project = %self.project_id, action = step.action.as_str(), "Ignoring step in plan stage");
                }
            }
        }
        Ok(result)
    }

    async fn apply(&self) -> Result<ApplyResult, ExecutionError> {
        let plan_file = match &self.plan_storage {
            Some(storage) => storage
                .retrieve(
                    &self.paths.local_plan_path(),
                    self.paths.artifact_name(),
                    &self.paths.stored_plan_file_name(),
                )
                .await
                .map_err(ExecutionError::PlanStorage)?,
            None => None,
        };

        let mut result = ApplyResult {
            performed: true,
            summary: Some(IacSummary::default()),
            ..ApplyResult::default()
        };

        for step in &self.apply_stage.steps {
            debug!(project = %self.project_id, action = step.action.as_str(), "Apply step");
            match step.action {
                StepAction::Init => self.init(step).await?,
                StepAction::Apply => {
                    let out = match self
                        .iac
                        .apply(&step.extra_args, plan_file.as_deref(), &self.env.commands)
                        .await
                    {
                        Ok(out) => out,
                        Err(e) => {
                            self.report(&e.to_string(), "Error during applying.").await;
                            return Err(e.into());
                        }
                    };
                    self.report(&out.stdout, "Apply output").await;
                    match IacSummary::from_apply_output(&out.stdout) {
                        Ok(summary) => result.summary = Some(summary),
                        Err(e) => {
                            warn!(project = %self.project_id, error = %e, "Could not summarize apply output")
                        }
                    }
                    result.output = out.stdout;
                }
                StepAction::Run => self.run_step(step).await?,
                StepAction::Plan | StepAction::Destroy => {
                    warn!(project = %self.project_id, action = step.action.as_str(), "Ignoring step in apply stage");
                }
            }
        }
        Ok(result)
    }

    async fn destroy(&self) -> Result<bool, ExecutionError> {
        for step in &Stage::default_destroy().steps {
            match step.action {
                StepAction::Init => self.init(step).await?,
                StepAction::Destroy => {
                    self.iac.destroy(&step.extra_args, &self.env.commands).await?;
                }
                _ => {}
            }
        }
        Ok(true)
    }
}
