use crate::{
    metrics::{ControllerMetrics, SyncResult},
    ObjectKey, WorkQueue,
};
use futures::prelude::*;
use podguard_policy_controller_k8s_api::{watcher, Resource};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

/// Brings the cluster state for a single key in line with the desired state.
///
/// Implementations must be idempotent: reconciling an unchanged key again
/// must not write anything.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, key: &ObjectKey) -> anyhow::Result<()>;
}

/// Drains a work queue through a reconciler with a pool of workers.
pub struct Controller<R> {
    name: &'static str,
    queue: Arc<WorkQueue<String>>,
    reconciler: Arc<R>,
    metrics: ControllerMetrics,
}

// === impl Controller ===

impl<R: Reconcile> Controller<R> {
    pub fn new(
        name: &'static str,
        queue: Arc<WorkQueue<String>>,
        reconciler: Arc<R>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            name,
            queue,
            reconciler,
            metrics,
        }
    }

    pub fn queue(&self) -> &Arc<WorkQueue<String>> {
        &self.queue
    }

    /// Processes a single key. Returns false once the queue has shut down.
    pub async fn process_next(&self) -> bool {
        let key = match self.queue.get().await {
            Some(key) => key,
            None => return false,
        };
        self.metrics.queue_depth(self.name, self.queue.len());

        let result = match key.parse::<ObjectKey>() {
            Err(error) => {
                warn!(%error, "Dropping key");
                self.queue.forget(&key);
                SyncResult::Dropped
            }
            Ok(obj) => match self.reconciler.reconcile(&obj).await {
                Ok(()) => {
                    debug!(%key, "Synced");
                    self.queue.forget(&key);
                    SyncResult::Ok
                }
                Err(error) => {
                    warn!(%key, %error, requeues = self.queue.requeues(&key), "Failed to sync");
                    self.queue.add_rate_limited(key.clone());
                    SyncResult::Error
                }
            },
        };
        self.metrics.sync(self.name, result);

        self.queue.done(&key);
        true
    }

    /// Runs `workers` tasks until shutdown is signaled. In-flight keys are
    /// allowed to finish before shutdown is released.
    pub async fn run(self, workers: usize, drain: drain::Watch) {
        let this = Arc::new(self);
        let tasks = (0..workers.max(1))
            .map(|worker| {
                let this = this.clone();
                tokio::spawn(
                    async move { while this.process_next().await {} }
                        .instrument(tracing::debug_span!("worker", worker)),
                )
            })
            .collect::<Vec<_>>();
        info!(workers = tasks.len(), "Started");

        let release = drain.signaled().await;
        this.queue.shut_down();
        release
            .release_after(async move {
                for task in tasks {
                    if let Err(error) = task.await {
                        warn!(%error, "Worker failed");
                    }
                }
                info!("Stopped");
            })
            .await;
    }
}

/// Enqueues the key of every object touched by a watch, including deletions.
pub async fn enqueue<K>(
    queue: Arc<WorkQueue<String>>,
    objects: impl Stream<Item = Result<K, watcher::Error>>,
) where
    K: Resource,
{
    tokio::pin!(objects);
    while let Some(res) = objects.next().await {
        match res {
            Ok(obj) => queue.add(ObjectKey::of(&obj).to_string()),
            Err(error) => info!(%error, "Watch failed"),
        }
    }
}
