use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use plangate::config::Trigger;
use plangate::job::{Command, TriggerEvent};

mod cmd;

#[derive(Parser)]
#[command(name = "plangate")]
#[command(version, about = "Pull-request driven infrastructure-as-code orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Repository checkout containing plangate.yml (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command against the projects of a pull request
    Run {
        /// plan, apply, destroy, lock or unlock
        #[arg(long, conflicts_with = "event", required_unless_present = "event")]
        command: Option<Command>,

        /// Run the commands the workflow configures for an event: pr-pushed,
        /// pr-closed, pr-converted-to-draft or commit-to-default
        #[arg(long)]
        event: Option<TriggerEvent>,

        /// Pull request number
        #[arg(long)]
        pr: u64,

        /// Repository as owner/repo
        #[arg(long)]
        namespace: String,

        /// User who requested the command
        #[arg(long)]
        actor: String,

        /// Restrict to these projects (defaults to projects impacted by the PR)
        #[arg(long = "project")]
        projects: Vec<String>,

        /// Backend batch the jobs report into
        #[arg(long)]
        batch_id: Option<String>,

        /// Log reports instead of commenting on the pull request
        #[arg(long)]
        no_comments: bool,
    },
    /// Print the dependency order of configured projects
    Order,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Inspect or release project locks
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Manage the queue of plan/approve/apply runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective runtime settings
    Show,
    /// Validate plangate.yml and settings
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum LockCommands {
    /// Show which PR holds a project's lock
    Status {
        #[arg(long)]
        project: String,
        #[arg(long)]
        namespace: String,
    },
    /// Release a project's lock whoever holds it
    ForceUnlock {
        #[arg(long)]
        project: String,
        #[arg(long)]
        namespace: String,
    },
}

#[derive(Subcommand, Clone)]
pub enum RunsCommands {
    /// Queue a plan-then-apply run for a project
    Enqueue {
        #[arg(long)]
        project: String,
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        pr: u64,
        #[arg(long, default_value = "plangate")]
        actor: String,
        /// Require approval between plan and apply (defaults to plangate.yml)
        #[arg(long)]
        approval_required: Option<bool>,
    },
    /// Approve a run waiting for approval
    Approve { run_id: i64 },
    /// List runs
    List,
    /// Advance queued runs
    Poll {
        /// Advance once and exit instead of polling until Ctrl-C
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    plangate::logging::init(cli.verbose, cli.json_logs)?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            command,
            event,
            pr,
            namespace,
            actor,
            projects,
            batch_id,
            no_comments,
        } => {
            let trigger = match (command, event) {
                (Some(command), _) => Trigger::Commands(vec![*command]),
                (None, Some(event)) => Trigger::Event(*event),
                (None, None) => anyhow::bail!("Either --command or --event is required"),
            };
            let args = cmd::RunArgs {
                trigger,
                pr_number: *pr,
                namespace: namespace.clone(),
                actor: actor.clone(),
                projects: projects.clone(),
                batch_id: batch_id.clone(),
                no_comments: *no_comments,
            };
            cmd::cmd_run(&project_dir, args).await?;
        }
        Commands::Order => cmd::cmd_order(&project_dir)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
        Commands::Lock { command } => cmd::cmd_lock(&project_dir, command.clone()).await?,
        Commands::Runs { command } => cmd::cmd_runs(&project_dir, command.clone()).await?,
    }

    Ok(())
}
