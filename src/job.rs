//! Job data model: one project, one PR, an ordered list of commands.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which IaC tool drives a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolVariant {
    #[default]
    Terraform,
    #[serde(rename = "opentofu")]
    OpenTofu,
    Terragrunt,
    Pulumi,
}

impl ToolVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::OpenTofu => "opentofu",
            Self::Terragrunt => "terragrunt",
            Self::Pulumi => "pulumi",
        }
    }

    /// Binary invoked for this tool.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Terraform => "terraform",
            Self::OpenTofu => "tofu",
            Self::Terragrunt => "terragrunt",
            Self::Pulumi => "pulumi",
        }
    }
}

impl FromStr for ToolVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "terraform" => Ok(Self::Terraform),
            "opentofu" | "tofu" => Ok(Self::OpenTofu),
            "terragrunt" => Ok(Self::Terragrunt),
            "pulumi" => Ok(Self::Pulumi),
            _ => Err(format!("Invalid tool: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Init,
    Plan,
    Apply,
    Destroy,
    Run,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Run => "run",
        }
    }
}

impl FromStr for StepAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Self::Init),
            "plan" => Ok(Self::Plan),
            "apply" => Ok(Self::Apply),
            "destroy" => Ok(Self::Destroy),
            "run" => Ok(Self::Run),
            _ => Err(format!("Invalid step action: {}", s)),
        }
    }
}

/// A single step of a stage. `value` holds the shell command for `run` steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Step {
    pub action: StepAction,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            extra_args: Vec::new(),
            value: None,
            shell: None,
        }
    }

    pub fn run(command: impl Into<String>) -> Self {
        Self {
            action: StepAction::Run,
            extra_args: Vec::new(),
            value: Some(command.into()),
            shell: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

/// Ordered steps performed for one phase of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Stage {
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn default_plan() -> Self {
        Self::new(vec![Step::new(StepAction::Init), Step::new(StepAction::Plan)])
    }

    pub fn default_apply() -> Self {
        Self::new(vec![Step::new(StepAction::Init), Step::new(StepAction::Apply)])
    }

    pub fn default_destroy() -> Self {
        Self::new(vec![
            Step::new(StepAction::Init),
            Step::new(StepAction::Destroy),
        ])
    }
}

/// A command requested against a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Plan,
    Apply,
    Destroy,
    Lock,
    Unlock,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Destroy => "destroy",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = String;

    /// Accepts both the bare form (`plan`) and the PR comment form (`plangate plan`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bare = trimmed.strip_prefix("plangate ").unwrap_or(trimmed).trim();
        match bare {
            "plan" => Ok(Self::Plan),
            "apply" => Ok(Self::Apply),
            "destroy" => Ok(Self::Destroy),
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            _ => Err(format!("Invalid command: {}", s)),
        }
    }
}

/// Repository event that runs the commands a workflow configures for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    PullRequestPushed,
    PullRequestClosed,
    PullRequestConvertedToDraft,
    CommitToDefault,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequestPushed => "pr-pushed",
            Self::PullRequestClosed => "pr-closed",
            Self::PullRequestConvertedToDraft => "pr-converted-to-draft",
            Self::CommitToDefault => "commit-to-default",
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pr-pushed" => Ok(Self::PullRequestPushed),
            "pr-closed" => Ok(Self::PullRequestClosed),
            "pr-converted-to-draft" => Ok(Self::PullRequestConvertedToDraft),
            "commit-to-default" => Ok(Self::CommitToDefault),
            _ => Err(format!("Invalid event: {}", s)),
        }
    }
}

/// An environment variable declared by a workflow. Either a literal `value`
/// or the name of a process variable to copy it from (`value_from`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub value_from: Option<String>,
}

/// Everything needed to run a set of commands against one project for one PR.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub project_name: String,
    pub project_dir: PathBuf,
    pub workspace: String,
    #[serde(default)]
    pub tool: ToolVariant,
    pub commands: Vec<Command>,
    #[serde(default)]
    pub plan_stage: Option<Stage>,
    #[serde(default)]
    pub apply_stage: Option<Stage>,
    pub pr_number: u64,
    pub requested_by: String,
    pub namespace: String,
    #[serde(default)]
    pub state_env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub command_env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub skip_merge_check: bool,
}

impl Job {
    /// Lock key for this job's project: `namespace#project`.
    pub fn lock_id(&self) -> String {
        lock_id(&self.namespace, &self.project_name)
    }

    pub fn plan_stage_or_default(&self) -> Stage {
        self.plan_stage.clone().unwrap_or_else(Stage::default_plan)
    }

    pub fn apply_stage_or_default(&self) -> Stage {
        self.apply_stage.clone().unwrap_or_else(Stage::default_apply)
    }
}

pub fn lock_id(namespace: &str, project_name: &str) -> String {
    format!("{}#{}", namespace, project_name)
}
