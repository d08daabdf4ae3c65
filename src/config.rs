//! Project configuration loaded from `plangate.yml`.
//!
//! ```yaml
//! auto_merge: false
//! approval_required: true
//! projects:
//!   - name: network
//!     dir: infra/network
//!   - name: app
//!     dir: infra/app
//!     workspace: prod
//!     opentofu: true
//!     workflow: custom
//!     depends_on: [network]
//! workflows:
//!   custom:
//!     plan:
//!       steps:
//!         - init
//!         - run: "echo planning"
//!         - plan:
//!             extra_args: ["-var-file=prod.tfvars"]
//!     env_vars:
//!       state:
//!         - name: TF_TOKEN
//!           value_from: CI_STATE_TOKEN
//!     workflow_configuration:
//!       on_pull_request_pushed: ["plangate plan"]
//!       on_pull_request_closed: ["plangate unlock"]
//!       on_commit_to_default: ["plangate unlock"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::job::{Command, EnvVar, Job, Stage, Step, StepAction, ToolVariant, TriggerEvent};
use crate::scheduler::{DependencyGraph, GraphBuilder};

pub const CONFIG_FILE: &str = "plangate.yml";
pub const DEFAULT_WORKFLOW: &str = "default";

fn default_dir() -> String {
    ".".to_string()
}

fn default_workspace() -> String {
    "default".to_string()
}

fn default_workflow() -> String {
    DEFAULT_WORKFLOW.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default = "default_dir")]
    pub dir: String,
    #[serde(default = "default_workspace")]
    pub workspace: String,
    #[serde(default = "default_workflow")]
    pub workflow: String,
    #[serde(default)]
    pub terragrunt: bool,
    #[serde(default)]
    pub opentofu: bool,
    #[serde(default)]
    pub pulumi: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ProjectConfig {
    /// Resolve the tool flags into a single variant.
    pub fn tool(&self) -> Result<ToolVariant, ConfigError> {
        let enabled: Vec<ToolVariant> = [
            (self.terragrunt, ToolVariant::Terragrunt),
            (self.opentofu, ToolVariant::OpenTofu),
            (self.pulumi, ToolVariant::Pulumi),
        ]
        .into_iter()
        .filter_map(|(on, tool)| on.then_some(tool))
        .collect();

        match enabled.as_slice() {
            [] => Ok(ToolVariant::Terraform),
            [tool] => Ok(*tool),
            _ => Err(ConfigError::ConflictingTools {
                project: self.name.clone(),
                tools: enabled.iter().map(|t| t.as_str().to_string()).collect(),
            }),
        }
    }

    /// Whether a repository-relative changed file lies under this project.
    pub fn is_impacted_by(&self, changed_file: &str) -> bool {
        let dir = self.dir.trim_start_matches("./").trim_end_matches('/');
        if dir.is_empty() || dir == "." {
            return true;
        }
        let file = changed_file.trim_start_matches("./");
        file.strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgsSpec {
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// One step as written in YAML: `init`, `{plan: {extra_args: [..]}}` or
/// `{run: "..", shell: zsh}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepSpec {
    Action(StepAction),
    Run {
        run: String,
        #[serde(default)]
        shell: Option<String>,
    },
    WithArgs(BTreeMap<String, ArgsSpec>),
}

impl StepSpec {
    fn to_step(&self) -> Result<Step, ConfigError> {
        match self {
            StepSpec::Action(action) => Ok(Step::new(*action)),
            StepSpec::Run { run, shell } => {
                let mut step = Step::run(run.clone());
                step.shell = shell.clone();
                Ok(step)
            }
            StepSpec::WithArgs(map) => {
                let mut entries = map.iter();
                match (entries.next(), entries.next()) {
                    (Some((name, args)), None) => {
                        let action: StepAction = name.parse().map_err(ConfigError::Invalid)?;
                        Ok(Step::new(action).with_args(args.extra_args.clone()))
                    }
                    _ => Err(ConfigError::Invalid(format!(
                        "step must name exactly one action, got {:?}",
                        map.keys().collect::<Vec<_>>()
                    ))),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl StageSpec {
    pub fn to_stage(&self) -> Result<Stage, ConfigError> {
        let steps = self
            .steps
            .iter()
            .map(StepSpec::to_step)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Stage::new(steps))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVarsConfig {
    #[serde(default)]
    pub state: Vec<EnvVar>,
    #[serde(default)]
    pub commands: Vec<EnvVar>,
}

/// PR comment form of commands: `["plangate plan"]`. The bare form is
/// accepted too.
mod pr_commands {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::job::Command;

    pub fn serialize<S: Serializer>(commands: &[Command], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(commands.iter().map(|c| format!("plangate {}", c)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Command>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}

fn default_on_pushed() -> Vec<Command> {
    vec![Command::Plan]
}

fn default_on_unlock_events() -> Vec<Command> {
    vec![Command::Unlock]
}

/// Commands run in response to repository events. Pushing to a PR plans it;
/// closing it or landing on the default branch releases its locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    #[serde(with = "pr_commands", default = "default_on_pushed")]
    pub on_pull_request_pushed: Vec<Command>,
    #[serde(with = "pr_commands", default = "default_on_unlock_events")]
    pub on_pull_request_closed: Vec<Command>,
    #[serde(with = "pr_commands", default)]
    pub on_pull_request_to_draft: Vec<Command>,
    #[serde(with = "pr_commands", default = "default_on_unlock_events")]
    pub on_commit_to_default: Vec<Command>,
}

impl Default for WorkflowConfiguration {
    fn default() -> Self {
        Self {
            on_pull_request_pushed: default_on_pushed(),
            on_pull_request_closed: default_on_unlock_events(),
            on_pull_request_to_draft: Vec::new(),
            on_commit_to_default: default_on_unlock_events(),
        }
    }
}

impl WorkflowConfiguration {
    pub fn commands_for(&self, event: TriggerEvent) -> &[Command] {
        match event {
            TriggerEvent::PullRequestPushed => &self.on_pull_request_pushed,
            TriggerEvent::PullRequestClosed => &self.on_pull_request_closed,
            TriggerEvent::PullRequestConvertedToDraft => &self.on_pull_request_to_draft,
            TriggerEvent::CommitToDefault => &self.on_commit_to_default,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default)]
    pub plan: Option<StageSpec>,
    #[serde(default)]
    pub apply: Option<StageSpec>,
    #[serde(default)]
    pub env_vars: EnvVarsConfig,
    #[serde(default)]
    pub workflow_configuration: WorkflowConfiguration,
}

/// Where a job's commands come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Commands named explicitly, e.g. in a PR comment.
    Commands(Vec<Command>),
    /// Commands the project's workflow configures for the event.
    Event(TriggerEvent),
}

/// What triggered the jobs being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub trigger: Trigger,
    pub pr_number: u64,
    pub requested_by: String,
    pub namespace: String,
    /// Checkout root; project dirs are resolved against it.
    pub repo_root: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlangateConfig {
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowConfig>,
    #[serde(default)]
    pub auto_merge: bool,
    #[serde(default)]
    pub approval_required: bool,
    #[serde(default)]
    pub skip_merge_check: bool,
}

impl PlangateConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse plangate.yml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for project in &self.projects {
            project.tool()?;
            if project.workflow != DEFAULT_WORKFLOW
                && !self.workflows.contains_key(&project.workflow)
            {
                return Err(ConfigError::UnknownWorkflow {
                    project: project.name.clone(),
                    workflow: project.workflow.clone(),
                });
            }
        }
        for workflow in self.workflows.values() {
            for stage in [&workflow.plan, &workflow.apply].into_iter().flatten() {
                stage.to_stage()?;
            }
        }
        self.graph().map(|_| ())
    }

    /// Dependency graph over all configured projects.
    pub fn graph(&self) -> Result<DependencyGraph, ConfigError> {
        self.projects
            .iter()
            .fold(GraphBuilder::new(), |builder, p| {
                builder.project(p.name.clone(), p.depends_on.clone())
            })
            .build()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// The project's workflow. `default` falls back to the built-in stages
    /// when not declared.
    pub fn workflow_for(&self, project: &ProjectConfig) -> Result<WorkflowConfig, ConfigError> {
        match self.workflows.get(&project.workflow) {
            Some(workflow) => Ok(workflow.clone()),
            None if project.workflow == DEFAULT_WORKFLOW => Ok(WorkflowConfig::default()),
            None => Err(ConfigError::UnknownWorkflow {
                project: project.name.clone(),
                workflow: project.workflow.clone(),
            }),
        }
    }

    /// Projects whose directory contains any of `changed_files`.
    pub fn impacted_projects(&self, changed_files: &[String]) -> Vec<&ProjectConfig> {
        self.projects
            .iter()
            .filter(|p| changed_files.iter().any(|f| p.is_impacted_by(f)))
            .collect()
    }

    pub fn job_for(&self, project: &ProjectConfig, request: &JobRequest) -> Result<Job, ConfigError> {
        let workflow = self.workflow_for(project)?;
        let plan_stage = workflow.plan.as_ref().map(StageSpec::to_stage).transpose()?;
        let apply_stage = workflow.apply.as_ref().map(StageSpec::to_stage).transpose()?;
        let commands = match &request.trigger {
            Trigger::Commands(commands) => commands.clone(),
            Trigger::Event(event) => workflow.workflow_configuration.commands_for(*event).to_vec(),
        };
        Ok(Job {
            project_name: project.name.clone(),
            project_dir: request.repo_root.join(&project.dir),
            workspace: project.workspace.clone(),
            tool: project.tool()?,
            commands,
            plan_stage,
            apply_stage,
            pr_number: request.pr_number,
            requested_by: request.requested_by.clone(),
            namespace: request.namespace.clone(),
            state_env_vars: workflow.env_vars.state.clone(),
            command_env_vars: workflow.env_vars.commands.clone(),
            skip_merge_check: self.skip_merge_check,
        })
    }

    /// Jobs for the named projects, or for every project when `names` is empty.
    pub fn jobs_for(&self, names: &[String], request: &JobRequest) -> Result<Vec<Job>, ConfigError> {
        if names.is_empty() {
            return self
                .projects
                .iter()
                .map(|p| self.job_for(p, request))
                .collect();
        }
        names
            .iter()
            .map(|name| {
                let project = self
                    .project(name)
                    .ok_or_else(|| ConfigError::Invalid(format!("unknown project '{}'", name)))?;
                self.job_for(project, request)
            })
            .collect()
    }
}
