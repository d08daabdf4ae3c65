//! Dispatching a PR command to its projects (`plangate run`).

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use plangate::backend::{BackendStatusApi, HttpBackend, NoopBackend};
use plangate::config::{JobRequest, PlangateConfig, Trigger};
use plangate::credentials::EnvCredentialProvider;
use plangate::dispatch::{BatchReport, Collaborators, DispatchOptions, JobDispatcher};
use plangate::iac::ProcessExecutorFactory;
use plangate::locking;
use plangate::policy::AllowAllPolicy;
use plangate::reporting::{CiReporter, Reporter, StdOutReporter};
use plangate::runs::SqliteRunStore;
use plangate::scheduler::DependencyScheduler;
use plangate::settings::Settings;
use plangate::storage::LocalPlanStorage;
use plangate::vcs::PullRequestService;
use plangate::vcs::github::GithubPullRequestService;

pub struct RunArgs {
    pub trigger: Trigger,
    pub pr_number: u64,
    pub namespace: String,
    pub actor: String,
    pub projects: Vec<String>,
    pub batch_id: Option<String>,
    pub no_comments: bool,
}

pub async fn cmd_run(project_dir: &Path, args: RunArgs) -> Result<()> {
    let settings = Settings::resolve(project_dir)?;
    let config = super::load_config(project_dir)?;

    let token = settings
        .github_token
        .clone()
        .context("GITHUB_TOKEN is required for plangate run")?;
    let prs: Arc<dyn PullRequestService> = Arc::new(GithubPullRequestService::new(
        &settings.github_api_url,
        token,
        &args.namespace,
    )?);

    let impacted = impacted_projects(&config, prs.as_ref(), args.pr_number).await?;
    let selected = if args.projects.is_empty() {
        impacted.clone()
    } else {
        args.projects.clone()
    };
    if selected.is_empty() {
        println!("No projects impacted by PR #{}", args.pr_number);
        return Ok(());
    }

    let request = JobRequest {
        trigger: args.trigger.clone(),
        pr_number: args.pr_number,
        requested_by: args.actor.clone(),
        namespace: args.namespace.clone(),
        repo_root: project_dir.to_path_buf(),
    };
    let graph = config.graph()?;
    let jobs: Vec<_> = DependencyScheduler::new(&graph)
        .order(config.jobs_for(&selected, &request)?)?
        .into_iter()
        .filter(|job| !job.commands.is_empty())
        .collect();
    if jobs.is_empty() {
        println!("No commands to run for PR #{}", args.pr_number);
        return Ok(());
    }
    info!(
        trigger = ?args.trigger,
        pr = args.pr_number,
        projects = ?jobs.iter().map(|j| j.project_name.as_str()).collect::<Vec<_>>(),
        "Dispatching jobs"
    );

    let reporter: Arc<dyn Reporter> = if args.no_comments {
        Arc::new(StdOutReporter::default())
    } else {
        Arc::new(CiReporter::new(prs.clone(), args.pr_number))
    };
    let collab = Collaborators {
        locks: locking::from_settings(&settings)?,
        prs,
        reporter,
        policy: Arc::new(AllowAllPolicy),
        credentials: Arc::new(EnvCredentialProvider::new()),
        executors: Arc::new(ProcessExecutorFactory),
        plan_storage: Some(Arc::new(LocalPlanStorage::new(&settings.plan_storage_dir))),
        backend: backend(&settings, args.batch_id.is_some())?,
    };
    let options = DispatchOptions {
        batch_id: args.batch_id,
        auto_merge: config.auto_merge,
        impacted_projects: impacted,
    };

    let report = JobDispatcher::new(collab, options).run_jobs(&jobs).await?;
    print_report(&report);

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{} command(s) did not succeed", failed);
    }
    Ok(())
}

async fn impacted_projects(
    config: &PlangateConfig,
    prs: &dyn PullRequestService,
    pr_number: u64,
) -> Result<Vec<String>> {
    let changed = prs
        .changed_files(pr_number)
        .await
        .with_context(|| format!("Failed to list changed files of PR #{}", pr_number))?;
    Ok(config
        .impacted_projects(&changed)
        .into_iter()
        .map(|p| p.name.clone())
        .collect())
}

/// HTTP backend when configured; otherwise batches are recorded in the local
/// run database so the run poller can observe them.
fn backend(settings: &Settings, has_batch: bool) -> Result<Arc<dyn BackendStatusApi>> {
    if let Some(url) = &settings.backend_url {
        let token = settings.backend_token.clone().unwrap_or_default();
        return Ok(Arc::new(HttpBackend::new(url, token)));
    }
    if has_batch {
        return Ok(Arc::new(SqliteRunStore::open(&settings.run_db)?));
    }
    Ok(Arc::new(NoopBackend))
}

fn print_report(report: &BatchReport) {
    println!();
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(_) => println!("  ✓ {} {}", outcome.command, outcome.project),
            Err(e) => println!("  ✗ {} {}: {}", outcome.command, outcome.project, e),
        }
    }
    if report.merged {
        println!();
        println!("Pull request merged.");
    }
    println!();
}
