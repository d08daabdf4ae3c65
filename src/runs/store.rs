//! Persistence for runs, their per-project queue, and stage batch status.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::model::{NewRun, Run, RunQueueItem, RunStage, RunStatus};
use crate::backend::{
    BackendStatusApi, BatchStatus, BatchType, JobStatus, JobStatusReport, ProjectRunReport,
    SerializedBatch,
};
use crate::errors::RunQueueError;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const RUN_COLUMNS: &str = "id, project_name, namespace, pr_number, status, approval_required,
    plan_batch_id, plan_job_spec, apply_batch_id, apply_job_spec, created_at, updated_at";

/// Oldest queue item per project.
const FRONT_OF_QUEUES_SQL: &str = "
    SELECT q.id, q.run_id, r.project_name, q.created_at
    FROM run_queue_items q
    JOIN runs r ON r.id = q.run_id
    WHERE q.id = (
        SELECT MIN(q2.id)
        FROM run_queue_items q2
        JOIN runs r2 ON r2.id = q2.run_id
        WHERE r2.project_name = r.project_name AND r2.namespace = r.namespace
    )
    ORDER BY q.id
";

/// The head of one project's queue. `run` is an error when the stored run
/// cannot be interpreted, e.g. an unknown status.
#[derive(Debug)]
pub struct QueueHead {
    pub item: RunQueueItem,
    pub run: Result<Run, RunQueueError>,
}

/// One line of the run listing. `status` is the stored text, so runs whose
/// status cannot be interpreted still list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunListing {
    pub id: i64,
    pub project_name: String,
    pub namespace: String,
    pub pr_number: u64,
    pub status: String,
    pub updated_at: String,
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a `Queued` run and append it to its project's queue.
    async fn enqueue(&self, run: NewRun) -> Result<Run, RunQueueError>;
    async fn front_of_queues(&self) -> Result<Vec<QueueHead>, RunQueueError>;
    async fn update_status(&self, run_id: i64, status: RunStatus) -> Result<(), RunQueueError>;
    /// Remove a queue item. `Ok(false)` if it was already gone.
    async fn dequeue(&self, item_id: i64) -> Result<bool, RunQueueError>;
    /// Move a run from `PendingApproval` to `Approved`. `Ok(false)` when the
    /// run is in any other state.
    async fn approve(&self, run_id: i64) -> Result<bool, RunQueueError>;
    async fn set_batch_status(&self, batch_id: &str, status: BatchStatus)
    -> Result<(), RunQueueError>;
    async fn batch_status(&self, batch_id: &str) -> Result<Option<BatchStatus>, RunQueueError>;
    async fn get_run(&self, run_id: i64) -> Result<Run, RunQueueError>;
    async fn list_runs(&self) -> Result<Vec<RunListing>, RunQueueError>;
}

struct RunRow {
    id: i64,
    project_name: String,
    namespace: String,
    pr_number: i64,
    status: String,
    approval_required: bool,
    plan_batch_id: String,
    plan_job_spec: String,
    apply_batch_id: String,
    apply_job_spec: String,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_name: row.get(1)?,
            namespace: row.get(2)?,
            pr_number: row.get(3)?,
            status: row.get(4)?,
            approval_required: row.get(5)?,
            plan_batch_id: row.get(6)?,
            plan_job_spec: row.get(7)?,
            apply_batch_id: row.get(8)?,
            apply_job_spec: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_listing(self) -> RunListing {
        RunListing {
            id: self.id,
            project_name: self.project_name,
            namespace: self.namespace,
            pr_number: self.pr_number as u64,
            status: self.status,
            updated_at: self.updated_at,
        }
    }

    fn into_run(self) -> Result<Run, RunQueueError> {
        let status =
            RunStatus::from_str(&self.status).map_err(|_| RunQueueError::UnknownRunStatus {
                run_id: self.id,
                status: self.status.clone(),
            })?;
        Ok(Run {
            id: self.id,
            project_name: self.project_name,
            namespace: self.namespace,
            pr_number: self.pr_number as u64,
            status,
            approval_required: self.approval_required,
            plan_stage: RunStage {
                batch_id: self.plan_batch_id,
                job_spec: self.plan_job_spec,
            },
            apply_stage: RunStage {
                batch_id: self.apply_batch_id,
                job_spec: self.apply_job_spec,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn load_run(conn: &Connection, run_id: i64) -> Result<Run, RunQueueError> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
            params![run_id],
            RunRow::from_row,
        )
        .optional()?
        .ok_or(RunQueueError::RunNotFound { id: run_id })?;
    row.into_run()
}

/// SQLite run store. Every process polling the same file sees the same queue.
#[derive(Clone)]
pub struct SqliteRunStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRunStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open run database {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// In-memory database (for testing).
    pub fn new_in_memory() -> anyhow::Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory run database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_name TEXT NOT NULL,
                namespace TEXT NOT NULL,
                pr_number INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                approval_required INTEGER NOT NULL DEFAULT 0,
                plan_batch_id TEXT NOT NULL,
                plan_job_spec TEXT NOT NULL,
                apply_batch_id TEXT NOT NULL,
                apply_job_spec TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS run_queue_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL REFERENCES runs(id),
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                status INTEGER NOT NULL
            );
            ",
        )
        .context("Failed to create run tables")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on a blocking thread.
    async fn call<F, R>(&self, f: F) -> Result<R, RunQueueError>
    where
        F: FnOnce(&Connection) -> Result<R, RunQueueError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| RunQueueError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("Run store task panicked")?
    }
}

#[cfg(test)]
impl SqliteRunStore {
    /// Write a status without validating it.
    pub(crate) async fn set_raw_status(&self, run_id: i64, status: &'static str) {
        self.call(move |conn| {
            conn.execute(
                "UPDATE runs SET status = ?1 WHERE id = ?2",
                params![status, run_id],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }
}

#[async_trait]
impl RunStore for SqliteRunStore {
    async fn enqueue(&self, run: NewRun) -> Result<Run, RunQueueError> {
        self.call(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO runs (project_name, namespace, pr_number, approval_required,
                    plan_batch_id, plan_job_spec, apply_batch_id, apply_job_spec)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    run.project_name,
                    run.namespace,
                    run.pr_number as i64,
                    run.approval_required,
                    run.plan_stage.batch_id,
                    run.plan_stage.job_spec,
                    run.apply_stage.batch_id,
                    run.apply_stage.job_spec,
                ],
            )?;
            let run_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO run_queue_items (run_id) VALUES (?1)",
                params![run_id],
            )?;
            for batch_id in [&run.plan_stage.batch_id, &run.apply_stage.batch_id] {
                tx.execute(
                    "INSERT OR IGNORE INTO batches (id, status) VALUES (?1, ?2)",
                    params![batch_id, i8::from(BatchStatus::Created)],
                )?;
            }
            tx.commit()?;
            load_run(conn, run_id)
        })
        .await
    }

    async fn front_of_queues(&self) -> Result<Vec<QueueHead>, RunQueueError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(FRONT_OF_QUEUES_SQL)?;
            let items = stmt
                .query_map([], |row| {
                    Ok(RunQueueItem {
                        id: row.get(0)?,
                        run_id: row.get(1)?,
                        project_name: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items
                .into_iter()
                .map(|item| {
                    let run = load_run(conn, item.run_id);
                    QueueHead { item, run }
                })
                .collect())
        })
        .await
    }

    async fn update_status(&self, run_id: i64, status: RunStatus) -> Result<(), RunQueueError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, updated_at = datetime('now') WHERE id = ?2",
                params![status.as_str(), run_id],
            )?;
            if changed == 0 {
                return Err(RunQueueError::RunNotFound { id: run_id });
            }
            Ok(())
        })
        .await
    }

    async fn dequeue(&self, item_id: i64) -> Result<bool, RunQueueError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM run_queue_items WHERE id = ?1",
                params![item_id],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn approve(&self, run_id: i64) -> Result<bool, RunQueueError> {
        self.call(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, updated_at = datetime('now')
                 WHERE id = ?2 AND status = ?3",
                params![
                    RunStatus::Approved.as_str(),
                    run_id,
                    RunStatus::PendingApproval.as_str()
                ],
            )?;
            if changed == 0 {
                // Distinguish a missing run from one in another state.
                load_run(conn, run_id)?;
            }
            Ok(changed == 1)
        })
        .await
    }

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
    ) -> Result<(), RunQueueError> {
        let batch_id = batch_id.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO batches (id, status) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET status = excluded.status",
                params![batch_id, i8::from(status)],
            )?;
            Ok(())
        })
        .await
    }

    async fn batch_status(&self, batch_id: &str) -> Result<Option<BatchStatus>, RunQueueError> {
        let batch_id = batch_id.to_string();
        self.call(move |conn| {
            let raw: Option<i8> = conn
                .query_row(
                    "SELECT status FROM batches WHERE id = ?1",
                    params![batch_id],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(BatchStatus::try_from)
                .transpose()
                .map_err(|e| RunQueueError::Database(anyhow::anyhow!(e)))
        })
        .await
    }

    async fn get_run(&self, run_id: i64) -> Result<Run, RunQueueError> {
        self.call(move |conn| load_run(conn, run_id)).await
    }

    async fn list_runs(&self) -> Result<Vec<RunListing>, RunQueueError> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM runs ORDER BY id", RUN_COLUMNS))?;
            let rows = stmt
                .query_map([], RunRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows.into_iter().map(RunRow::into_listing).collect())
        })
        .await
    }
}

/// Records batch results locally so the run poller can observe them without
/// an HTTP backend.
#[async_trait]
impl BackendStatusApi for SqliteRunStore {
    async fn report_project_job_status(
        &self,
        report: &JobStatusReport,
    ) -> anyhow::Result<Option<SerializedBatch>> {
        let status = match report.status {
            JobStatus::Succeeded => BatchStatus::Succeeded,
            JobStatus::Failed => BatchStatus::Failed,
            JobStatus::Created | JobStatus::Triggered | JobStatus::Started => BatchStatus::Started,
        };
        self.set_batch_status(&report.batch_id, status).await?;

        let batch_id = report.batch_id.clone();
        let owner = self
            .call(move |conn| {
                conn.query_row(
                    "SELECT pr_number, plan_batch_id = ?1, namespace FROM runs
                     WHERE plan_batch_id = ?1 OR apply_batch_id = ?1
                     ORDER BY id DESC LIMIT 1",
                    params![batch_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()
                .map_err(RunQueueError::from)
            })
            .await?;

        let Some((pr_number, is_plan, namespace)) = owner else {
            debug!(batch_id = %report.batch_id, "Batch is not attached to a run");
            return Ok(None);
        };
        Ok(Some(SerializedBatch {
            id: report.batch_id.clone(),
            pr_number: pr_number as u64,
            status,
            branch_name: String::new(),
            repo_full_name: namespace,
            batch_type: if is_plan {
                BatchType::Plan
            } else {
                BatchType::Apply
            },
            jobs: Vec::new(),
        }))
    }

    async fn report_project_run(&self, report: &ProjectRunReport) -> anyhow::Result<()> {
        debug!(project = %report.project, command = %report.command, outcome = ?report.outcome, "Project run finished");
        Ok(())
    }
}
