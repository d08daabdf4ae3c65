use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ci::CiBackend;
use super::machine::{Effect, awaited_stage, transition};
use super::model::{BatchOutcome, Run, RunQueueItem};
use super::store::RunStore;
use crate::errors::RunQueueError;

/// Advances queued runs, one transition per project per call.
#[derive(Clone)]
pub struct RunQueue {
    store: Arc<dyn RunStore>,
    ci: Arc<dyn CiBackend>,
}

impl RunQueue {
    pub fn new(store: Arc<dyn RunStore>, ci: Arc<dyn CiBackend>) -> Self {
        Self { store, ci }
    }

    /// Apply one transition to the oldest run of every project queue.
    /// Returns how many runs changed status.
    ///
    /// A failure on one run is logged and does not stop the others.
    pub async fn advance_run_queue(&self) -> Result<usize, RunQueueError> {
        let heads = self.store.front_of_queues().await?;
        let mut advanced = 0;
        for head in heads {
            let run = match head.run {
                Ok(run) => run,
                Err(e) => {
                    warn!(item_id = head.item.id, run_id = head.item.run_id, error = %e, "Skipping run in unexpected state");
                    continue;
                }
            };
            match self.advance(&head.item, &run).await {
                Ok(true) => advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(run_id = run.id, project = %run.project_name, error = %e, "Failed to advance run");
                }
            }
        }
        Ok(advanced)
    }

    async fn advance(&self, item: &RunQueueItem, run: &Run) -> Result<bool, RunQueueError> {
        let batch = match awaited_stage(run.status) {
            Some(stage) => self
                .store
                .batch_status(&run.stage(stage).batch_id)
                .await?
                .into(),
            None => BatchOutcome::InProgress,
        };
        let step = transition(run.status, batch, run.approval_required);

        if let Effect::Trigger(stage) = step.effect {
            self.ci.trigger(run, stage).await?;
        }
        if let Some(next) = step.next {
            self.store.update_status(run.id, next).await?;
            info!(run_id = run.id, project = %run.project_name, from = %run.status, to = %next, "Run advanced");
        }
        if step.effect == Effect::Dequeue && self.store.dequeue(item.id).await? {
            debug!(run_id = run.id, item_id = item.id, "Run dequeued");
        }
        Ok(step.next.is_some())
    }
}

/// Calls [`RunQueue::advance_run_queue`] on a fixed interval until cancelled.
pub struct RunQueuePoller {
    queue: RunQueue,
    interval: Duration,
}

impl RunQueuePoller {
    pub fn new(queue: RunQueue, interval: Duration) -> Self {
        Self { queue, interval }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Run queue poller started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Run queue poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.queue.advance_run_queue().await {
                        Ok(advanced) => debug!(advanced, "Run queue tick"),
                        Err(e) => error!(error = %e, "Run queue tick failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::backend::BatchStatus;
    use crate::runs::model::{NewRun, RunStage, RunStatus, StageKind};
    use crate::runs::store::{QueueHead, RunListing, SqliteRunStore};
    use crate::testing::FakeCi;

    /// Counts dequeues that actually removed an item.
    struct CountingStore {
        inner: SqliteRunStore,
        dequeued: AtomicUsize,
    }

    #[async_trait]
    impl RunStore for CountingStore {
        async fn enqueue(&self, run: NewRun) -> Result<Run, RunQueueError> {
            self.inner.enqueue(run).await
        }
        async fn front_of_queues(&self) -> Result<Vec<QueueHead>, RunQueueError> {
            self.inner.front_of_queues().await
        }
        async fn update_status(&self, run_id: i64, status: RunStatus) -> Result<(), RunQueueError> {
            self.inner.update_status(run_id, status).await
        }
        async fn dequeue(&self, item_id: i64) -> Result<bool, RunQueueError> {
            let removed = self.inner.dequeue(item_id).await?;
            if removed {
                self.dequeued.fetch_add(1, Ordering::SeqCst);
            }
            Ok(removed)
        }
        async fn approve(&self, run_id: i64) -> Result<bool, RunQueueError> {
            self.inner.approve(run_id).await
        }
        async fn set_batch_status(
            &self,
            batch_id: &str,
            status: BatchStatus,
        ) -> Result<(), RunQueueError> {
            self.inner.set_batch_status(batch_id, status).await
        }
        async fn batch_status(&self, batch_id: &str) -> Result<Option<BatchStatus>, RunQueueError> {
            self.inner.batch_status(batch_id).await
        }
        async fn get_run(&self, run_id: i64) -> Result<Run, RunQueueError> {
            self.inner.get_run(run_id).await
        }
        async fn list_runs(&self) -> Result<Vec<RunListing>, RunQueueError> {
            self.inner.list_runs().await
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        ci: Arc<FakeCi>,
        queue: RunQueue,
    }

    fn fixture(ci: FakeCi) -> Fixture {
        let store = Arc::new(CountingStore {
            inner: SqliteRunStore::new_in_memory().unwrap(),
            dequeued: AtomicUsize::new(0),
        });
        let ci = Arc::new(ci);
        let queue = RunQueue::new(store.clone(), ci.clone());
        Fixture { store, ci, queue }
    }

    fn new_run(project: &str, pr: u64, approval_required: bool) -> NewRun {
        NewRun {
            project_name: project.to_string(),
            namespace: "acme/infra".to_string(),
            pr_number: pr,
            approval_required,
            plan_stage: RunStage {
                batch_id: format!("plan-{pr}"),
                job_spec: "[]".to_string(),
            },
            apply_stage: RunStage {
                batch_id: format!("apply-{pr}"),
                job_spec: "[]".to_string(),
            },
        }
    }

    async fn status(fx: &Fixture, id: i64) -> RunStatus {
        fx.store.get_run(id).await.unwrap().status
    }

    // ── lifecycle sequences ────────────────────────────────────────────

    #[tokio::test]
    async fn test_plan_with_approval_stops_at_pending_approval() {
        let fx = fixture(FakeCi::default());
        let run = fx.store.enqueue(new_run("db", 1, true)).await.unwrap();
        let mut seen = vec![status(&fx, run.id).await];

        fx.queue.advance_run_queue().await.unwrap();
        seen.push(status(&fx, run.id).await);

        // Plan still running: no transition.
        fx.queue.advance_run_queue().await.unwrap();
        assert_eq!(status(&fx, run.id).await, RunStatus::Planning);

        fx.store
            .set_batch_status("plan-1", BatchStatus::Succeeded)
            .await
            .unwrap();
        fx.queue.advance_run_queue().await.unwrap();
        seen.push(status(&fx, run.id).await);

        fx.queue.advance_run_queue().await.unwrap();
        assert_eq!(status(&fx, run.id).await, RunStatus::PendingApproval);

        assert_eq!(
            seen,
            vec![
                RunStatus::Queued,
                RunStatus::Planning,
                RunStatus::PendingApproval
            ]
        );
        assert_eq!(fx.ci.triggers(), vec![(run.id, StageKind::Plan)]);
    }

    #[tokio::test]
    async fn test_approved_run_applies_and_dequeues_once() {
        let fx = fixture(FakeCi::default());
        let run = fx.store.enqueue(new_run("db", 2, true)).await.unwrap();
        fx.store
            .update_status(run.id, RunStatus::Approved)
            .await
            .unwrap();
        let mut seen = vec![status(&fx, run.id).await];

        fx.queue.advance_run_queue().await.unwrap();
        seen.push(status(&fx, run.id).await);
        fx.store
            .set_batch_status("apply-2", BatchStatus::Succeeded)
            .await
            .unwrap();
        fx.queue.advance_run_queue().await.unwrap();
        seen.push(status(&fx, run.id).await);

        assert_eq!(
            seen,
            vec![
                RunStatus::Approved,
                RunStatus::Applying,
                RunStatus::Succeeded
            ]
        );
        assert_eq!(fx.store.dequeued.load(Ordering::SeqCst), 0);

        for _ in 0..3 {
            fx.queue.advance_run_queue().await.unwrap();
        }
        assert_eq!(fx.store.dequeued.load(Ordering::SeqCst), 1);
        assert!(fx.store.front_of_queues().await.unwrap().is_empty());
        assert_eq!(status(&fx, run.id).await, RunStatus::Succeeded);
        assert_eq!(fx.ci.triggers(), vec![(run.id, StageKind::Apply)]);
    }

    #[tokio::test]
    async fn test_no_approval_goes_straight_to_approved() {
        let fx = fixture(FakeCi::default());
        let run = fx.store.enqueue(new_run("db", 3, false)).await.unwrap();
        fx.queue.advance_run_queue().await.unwrap();
        fx.store
            .set_batch_status("plan-3", BatchStatus::Succeeded)
            .await
            .unwrap();
        fx.queue.advance_run_queue().await.unwrap();
        assert_eq!(status(&fx, run.id).await, RunStatus::Approved);
        fx.queue.advance_run_queue().await.unwrap();
        assert_eq!(status(&fx, run.id).await, RunStatus::Applying);
    }

    #[tokio::test]
    async fn test_failed_plan_fails_and_dequeues() {
        let fx = fixture(FakeCi::default());
        let run = fx.store.enqueue(new_run("db", 4, true)).await.unwrap();
        fx.queue.advance_run_queue().await.unwrap();
        fx.store
            .set_batch_status("plan-4", BatchStatus::Failed)
            .await
            .unwrap();
        fx.queue.advance_run_queue().await.unwrap();

        assert_eq!(status(&fx, run.id).await, RunStatus::Failed);
        assert_eq!(fx.store.dequeued.load(Ordering::SeqCst), 1);
        assert!(fx.store.front_of_queues().await.unwrap().is_empty());
    }

    // ── queue semantics ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_one_run_per_project_advances() {
        let fx = fixture(FakeCi::default());
        let first = fx.store.enqueue(new_run("db", 5, true)).await.unwrap();
        let second = fx.store.enqueue(new_run("db", 6, true)).await.unwrap();
        let other = fx.store.enqueue(new_run("network", 7, true)).await.unwrap();

        assert_eq!(fx.queue.advance_run_queue().await.unwrap(), 2);
        assert_eq!(status(&fx, first.id).await, RunStatus::Planning);
        assert_eq!(status(&fx, second.id).await, RunStatus::Queued);
        assert_eq!(status(&fx, other.id).await, RunStatus::Planning);
    }

    #[tokio::test]
    async fn test_unknown_status_is_skipped() {
        let fx = fixture(FakeCi::default());
        let odd = fx.store.enqueue(new_run("db", 8, true)).await.unwrap();
        let ok = fx.store.enqueue(new_run("network", 9, true)).await.unwrap();
        fx.store.inner.set_raw_status(odd.id, "paused").await;

        assert_eq!(fx.queue.advance_run_queue().await.unwrap(), 1);
        assert_eq!(status(&fx, ok.id).await, RunStatus::Planning);
        assert_eq!(fx.ci.triggers(), vec![(ok.id, StageKind::Plan)]);
    }

    #[tokio::test]
    async fn test_trigger_failure_leaves_run_queued() {
        let fx = fixture(FakeCi::failing());
        let run = fx.store.enqueue(new_run("db", 10, true)).await.unwrap();
        assert_eq!(fx.queue.advance_run_queue().await.unwrap(), 0);
        assert_eq!(status(&fx, run.id).await, RunStatus::Queued);
    }

    #[tokio::test]
    async fn test_pending_approval_waits_for_human() {
        let fx = fixture(FakeCi::default());
        let run = fx.store.enqueue(new_run("db", 11, true)).await.unwrap();
        fx.store
            .update_status(run.id, RunStatus::PendingApproval)
            .await
            .unwrap();
        assert_eq!(fx.queue.advance_run_queue().await.unwrap(), 0);
        assert!(fx.store.approve(run.id).await.unwrap());
        fx.queue.advance_run_queue().await.unwrap();
        assert_eq!(status(&fx, run.id).await, RunStatus::Applying);
    }

    // ── poller ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_poller_ticks_until_cancelled() {
        let fx = fixture(FakeCi::default());
        let run = fx.store.enqueue(new_run("db", 12, true)).await.unwrap();
        let poller = RunQueuePoller::new(fx.queue.clone(), Duration::from_millis(10));
        let cancel = CancellationToken::new();

        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(status(&fx, run.id).await, RunStatus::Planning);
        assert_eq!(fx.ci.triggers().len(), 1);
    }
}
