//! Run queue commands (`plangate runs`).

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use plangate::config::{JobRequest, Trigger};
use plangate::job::Command;
use plangate::runs::{
    GithubActionsCi, NewRun, RunQueue, RunQueuePoller, RunStage, RunStore, SqliteRunStore,
};
use plangate::settings::Settings;

use super::super::RunsCommands;

pub async fn cmd_runs(project_dir: &Path, command: RunsCommands) -> Result<()> {
    let settings = Settings::resolve(project_dir)?;
    let store = Arc::new(SqliteRunStore::open(&settings.run_db)?);

    match command {
        RunsCommands::Enqueue {
            project,
            namespace,
            pr,
            actor,
            approval_required,
        } => {
            let config = super::load_config(project_dir)?;
            let project_config = config
                .project(&project)
                .with_context(|| format!("Unknown project '{}'", project))?;

            let stage = |command: Command| -> Result<RunStage> {
                let request = JobRequest {
                    trigger: Trigger::Commands(vec![command]),
                    pr_number: pr,
                    requested_by: actor.clone(),
                    namespace: namespace.clone(),
                    repo_root: project_dir.to_path_buf(),
                };
                let job = config.job_for(project_config, &request)?;
                Ok(RunStage {
                    batch_id: Uuid::new_v4().to_string(),
                    job_spec: serde_json::to_string(&job).context("Failed to serialize job")?,
                })
            };

            let run = store
                .enqueue(NewRun {
                    project_name: project.clone(),
                    namespace: namespace.clone(),
                    pr_number: pr,
                    approval_required: approval_required.unwrap_or(config.approval_required),
                    plan_stage: stage(Command::Plan)?,
                    apply_stage: stage(Command::Apply)?,
                })
                .await?;
            println!(
                "Queued run {} for {} (PR #{}, plan batch {})",
                run.id, run.project_name, run.pr_number, run.plan_stage.batch_id
            );
        }
        RunsCommands::Approve { run_id } => {
            if !store.approve(run_id).await? {
                let run = store.get_run(run_id).await?;
                anyhow::bail!("Run {} is {}, not pending approval", run_id, run.status);
            }
            println!("Approved run {}", run_id);
        }
        RunsCommands::List => {
            let runs = store.list_runs().await?;
            if runs.is_empty() {
                println!("No runs.");
                return Ok(());
            }
            println!(
                "{:<6} {:<20} {:<24} {:<6} {:<18} Updated",
                "Run", "Project", "Namespace", "PR", "Status"
            );
            for run in runs {
                println!(
                    "{:<6} {:<20} {:<24} {:<6} {:<18} {}",
                    run.id,
                    run.project_name,
                    run.namespace,
                    run.pr_number,
                    run.status,
                    run.updated_at
                );
            }
        }
        RunsCommands::Poll { once } => {
            let token = settings
                .github_token
                .clone()
                .context("GITHUB_TOKEN is required to trigger CI workflows")?;
            let ci = Arc::new(GithubActionsCi::new(
                &settings.github_api_url,
                token,
                &settings.ci.workflow,
                &settings.ci.git_ref,
            ));
            let queue = RunQueue::new(store, ci);

            if once {
                let advanced = queue.advance_run_queue().await?;
                println!("Advanced {} run(s)", advanced);
                return Ok(());
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, stopping poller");
                }
                on_signal.cancel();
            });
            RunQueuePoller::new(queue, settings.poll_interval())
                .run(cancel)
                .await;
        }
    }
    Ok(())
}
