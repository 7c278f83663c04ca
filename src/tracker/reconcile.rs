//! Write-behind of counted views into the durable store.
//!
//! Jobs go through a bounded channel to a single actor task, so the request
//! path never waits on the database. The actor applies jobs in arrival order;
//! a failed job is logged and dropped, never retried. Administrative writes
//! travel through the same channel so they are ordered with the jobs around
//! them.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::CounterTarget;
use crate::storage::Storage;

/// Durable side effects of one counted view.
#[derive(Debug, Clone)]
pub struct ReconcileJob {
    pub target: CounterTarget,
    /// Known when the request path managed to resolve the counter record
    pub counter_id: Option<i64>,
    /// Fast cache count right after the increment. `None` when the view
    /// bypassed the fast store; the durable total is then bumped by one.
    pub count: Option<i64>,
    pub visitor_hash: String,
    pub viewed_at: DateTime<Utc>,
}

/// Administrative write applied in queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminWrite {
    /// Zero the total and delete buckets and view log. No-op for unknown targets.
    Reset,
    /// Overwrite the total, creating the counter if needed
    SetTotal(i64),
}

enum ActorMessage {
    Reconcile(ReconcileJob),
    /// Acknowledged with the total the counter had before the write
    Admin {
        target: CounterTarget,
        write: AdminWrite,
        ack: oneshot::Sender<anyhow::Result<i64>>,
    },
    /// Acknowledged once every job queued before it has been applied
    Flush(oneshot::Sender<()>),
    /// Apply everything still queued, acknowledge, then stop
    Shutdown(oneshot::Sender<()>),
}

struct ReconcileActor {
    receiver: mpsc::Receiver<ActorMessage>,
    storage: Arc<dyn Storage>,
    job_timeout: Duration,
}

impl ReconcileActor {
    async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ActorMessage::Reconcile(job) => self.apply(job).await,
                ActorMessage::Admin { target, write, ack } => {
                    let _ = ack.send(admin_write(self.storage.as_ref(), &target, write).await);
                }
                ActorMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
                ActorMessage::Shutdown(ack) => {
                    info!("Reconciler received shutdown signal, draining queue...");
                    self.drain().await;
                    let _ = ack.send(());
                    return;
                }
            }
        }

        warn!("Reconciler channel closed without shutdown");
    }

    /// Stop accepting messages and apply what is already queued.
    async fn drain(&mut self) {
        self.receiver.close();
        let mut drained = 0usize;
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ActorMessage::Reconcile(job) => {
                    self.apply(job).await;
                    drained += 1;
                }
                ActorMessage::Admin { target, write, ack } => {
                    let _ = ack.send(admin_write(self.storage.as_ref(), &target, write).await);
                }
                ActorMessage::Flush(ack) | ActorMessage::Shutdown(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        info!(drained, "Reconciler queue drained");
    }

    async fn apply(&self, job: ReconcileJob) {
        let key = job.target.canonical_key();
        match tokio::time::timeout(self.job_timeout, write_job(self.storage.as_ref(), &job)).await
        {
            Ok(Ok(())) => debug!(counter = %key, count = ?job.count, "view reconciled"),
            Ok(Err(err)) => {
                warn!(counter = %key, count = ?job.count, error = %err, "failed to reconcile view")
            }
            Err(_) => warn!(
                counter = %key,
                count = ?job.count,
                timeout_ms = self.job_timeout.as_millis() as u64,
                "reconciliation timed out"
            ),
        }
    }
}

async fn write_job(storage: &dyn Storage, job: &ReconcileJob) -> anyhow::Result<()> {
    let counter_id = match job.counter_id {
        Some(id) => id,
        None => storage.get_or_create_counter(&job.target).await?.id,
    };

    match job.count {
        Some(count) => storage.raise_total_views(counter_id, count).await?,
        None => storage.increment_total_views(counter_id).await?,
    }
    storage
        .increment_daily_views(counter_id, job.viewed_at.date_naive())
        .await?;
    storage
        .append_view_log(counter_id, &job.visitor_hash, job.viewed_at.timestamp())
        .await?;

    Ok(())
}

async fn admin_write(
    storage: &dyn Storage,
    target: &CounterTarget,
    write: AdminWrite,
) -> anyhow::Result<i64> {
    match write {
        AdminWrite::Reset => {
            let Some(counter) = storage.find_counter(target).await? else {
                return Ok(0);
            };
            storage.set_total_views(counter.id, 0).await?;
            storage.clear_history(counter.id).await?;
            Ok(counter.total_views)
        }
        AdminWrite::SetTotal(total) => {
            let counter = storage.get_or_create_counter(target).await?;
            storage.set_total_views(counter.id, total).await?;
            Ok(counter.total_views)
        }
    }
}

/// Handle to the reconciliation actor.
pub struct Reconciler {
    sender: mpsc::Sender<ActorMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    /// Spawn the actor. Must be called inside a tokio runtime.
    pub fn spawn(storage: Arc<dyn Storage>, buffer_size: usize, job_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));

        let actor = ReconcileActor {
            receiver,
            storage,
            job_timeout,
        };
        let handle = tokio::spawn(async move {
            actor.run().await;
        });

        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job without waiting. Drops the job when the queue is full.
    pub fn submit(&self, job: ReconcileJob) {
        match self.sender.try_send(ActorMessage::Reconcile(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(ActorMessage::Reconcile(job))) => warn!(
                counter = %job.target,
                count = ?job.count,
                "reconciliation queue full, dropping view"
            ),
            Err(TrySendError::Closed(ActorMessage::Reconcile(job))) => warn!(
                counter = %job.target,
                count = ?job.count,
                "reconciler stopped, dropping view"
            ),
            Err(_) => {}
        }
    }

    /// Apply `write` after every job queued so far. Returns the previous total.
    pub async fn admin(&self, target: &CounterTarget, write: AdminWrite) -> anyhow::Result<i64> {
        let (ack, done) = oneshot::channel();
        let msg = ActorMessage::Admin {
            target: target.clone(),
            write,
            ack,
        };
        if self.sender.send(msg).await.is_err() {
            return Err(anyhow!("reconciler stopped"));
        }
        done.await
            .map_err(|_| anyhow!("reconciler stopped before applying {write:?}"))?
    }

    /// Wait until every job submitted so far has been applied.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(ActorMessage::Flush(ack)).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Apply all queued jobs and stop the actor. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(ActorMessage::Shutdown(ack)).await.is_ok() {
            let _ = done.await;
        }

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "reconciler task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn setup() -> (Reconciler, Arc<dyn Storage>) {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        let storage: Arc<dyn Storage> = Arc::new(storage);
        let reconciler = Reconciler::spawn(Arc::clone(&storage), 16, Duration::from_secs(5));
        (reconciler, storage)
    }

    fn job(target: &CounterTarget, count: Option<i64>) -> ReconcileJob {
        ReconcileJob {
            target: target.clone(),
            counter_id: None,
            count,
            visitor_hash: "0123456789abcdef0123456789abcdef".to_string(),
            viewed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_reset_applies_after_queued_jobs() {
        let (reconciler, storage) = setup().await;
        let target = CounterTarget::profile("octocat").unwrap();

        reconciler.submit(job(&target, Some(57)));
        reconciler.submit(job(&target, Some(58)));
        let previous = reconciler.admin(&target, AdminWrite::Reset).await.unwrap();
        assert_eq!(previous, 58);

        let counter = storage.find_counter(&target).await.unwrap().unwrap();
        assert_eq!(counter.total_views, 0);
        assert!(storage.view_logs(counter.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_of_unknown_target_creates_nothing() {
        let (reconciler, storage) = setup().await;
        let target = CounterTarget::profile("nobody").unwrap();

        assert_eq!(reconciler.admin(&target, AdminWrite::Reset).await.unwrap(), 0);
        assert!(storage.find_counter(&target).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_job_without_count_adds_one() {
        let (reconciler, storage) = setup().await;
        let target = CounterTarget::profile("octocat").unwrap();

        let previous = reconciler
            .admin(&target, AdminWrite::SetTotal(1000))
            .await
            .unwrap();
        assert_eq!(previous, 0);

        reconciler.submit(job(&target, None));
        reconciler.submit(job(&target, None));
        reconciler.flush().await;

        let counter = storage.find_counter(&target).await.unwrap().unwrap();
        assert_eq!(counter.total_views, 1002);
        assert_eq!(storage.view_logs(counter.id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_admin_after_shutdown_is_an_error() {
        let (reconciler, _) = setup().await;
        let target = CounterTarget::profile("octocat").unwrap();

        reconciler.shutdown().await;
        assert!(reconciler
            .admin(&target, AdminWrite::SetTotal(1))
            .await
            .is_err());
    }
}
