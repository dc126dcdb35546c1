//! Async upgrade worker pool
//!
//! Workers pull request keys from a shared [`WorkQueue`] and run one
//! [`RequestExecutor`] step per delivery. A key moved to `Running` is re-added
//! immediately; a step that cannot read the request or write its status is
//! re-added with backoff.

use super::queue::WorkQueue;
use super::request::{Outcome, RequestExecutor};
use crate::config::EngineConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use vmt_api::{ObjectKey, Phase};

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Deliveries handled
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Deliveries re-added, immediately or with backoff
    pub requeued: u64,
    /// Steps that returned an error
    pub errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    requeued: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ControllerStats {
        ControllerStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Worker pool driving upgrade requests to a terminal phase
#[derive(Debug)]
pub struct UpgradeController {
    queue: Arc<WorkQueue<ObjectKey>>,
    executor: Arc<RequestExecutor>,
    workers: usize,
    counters: Arc<Counters>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl UpgradeController {
    #[must_use]
    pub fn new(executor: RequestExecutor, config: &EngineConfig) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new(
                config.queue.base_delay(),
                config.queue.max_delay(),
            )),
            executor: Arc::new(executor),
            workers: config.upgrade_workers,
            counters: Arc::new(Counters::default()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Queue a request key
    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    /// Spawn the workers; calling again while running is a no-op
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        for worker in 0..self.workers {
            let queue = Arc::clone(&self.queue);
            let executor = Arc::clone(&self.executor);
            let counters = Arc::clone(&self.counters);
            handles.push(tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    process(&queue, &executor, &counters, &key).await;
                    queue.done(&key);
                }
                tracing::debug!(worker, "upgrade worker stopped");
            }));
        }
        tracing::info!(workers = self.workers, "upgrade controller started");
    }

    /// Stop the queue and wait for workers to drain
    pub async fn shutdown(&self) {
        self.queue.shut_down();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "upgrade worker panicked");
            }
        }
        tracing::info!(stats = ?self.stats(), "upgrade controller stopped");
    }

    #[must_use]
    pub fn stats(&self) -> ControllerStats {
        self.counters.snapshot()
    }

    /// Keys waiting in the queue
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

async fn process(
    queue: &Arc<WorkQueue<ObjectKey>>,
    executor: &RequestExecutor,
    counters: &Counters,
    key: &ObjectKey,
) {
    Counters::bump(&counters.processed);
    match executor.execute(key).await {
        Ok(Outcome::Requeue) => {
            Counters::bump(&counters.requeued);
            queue.forget(key);
            queue.add(key.clone());
        }
        Ok(Outcome::Completed(phase)) => {
            match phase {
                Phase::Succeeded => Counters::bump(&counters.succeeded),
                Phase::Failed => Counters::bump(&counters.failed),
                Phase::Unset | Phase::Running => {}
            }
            queue.forget(key);
        }
        Ok(Outcome::Terminal(_) | Outcome::Missing) => queue.forget(key),
        Err(e) => {
            Counters::bump(&counters.errors);
            if e.is_retryable() {
                tracing::warn!(
                    request = %key,
                    retries = queue.num_requeues(key),
                    error = %e,
                    "upgrade step failed, retrying"
                );
                Counters::bump(&counters.requeued);
                queue.add_rate_limited(key.clone());
            } else {
                tracing::error!(request = %key, error = %e, "upgrade step failed");
                queue.forget(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::CompatibilityDecoder;
    use crate::snapshot::SnapshotStore;
    use crate::upgrade::Upgrader;
    use std::time::Duration;
    use vmt_api::UpgradeRequest;
    use vmt_store::{InMemoryStore, ObjectCache, ObjectStore};

    async fn wait_terminal(store: &InMemoryStore, key: &ObjectKey) -> Phase {
        for _ in 0..200 {
            let phase = store.get_upgrade_request(key).await.unwrap().status.phase;
            if phase.is_terminal() {
                return phase;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("request {key} never reached a terminal phase");
    }

    #[tokio::test]
    async fn missing_targets_fail_and_are_counted() {
        let store = Arc::new(InMemoryStore::new());
        let decoder = CompatibilityDecoder::default();
        let snapshots = SnapshotStore::new(store.clone(), ObjectCache::default(), decoder.clone());
        let executor = RequestExecutor::new(
            store.clone(),
            Upgrader::new(store.clone(), snapshots, decoder),
        );
        let controller = UpgradeController::new(
            executor,
            &EngineConfig::default().with_upgrade_workers(2),
        );

        let mut keys = Vec::new();
        for i in 0..3 {
            let request = UpgradeRequest::new("ns", format!("r{i}"), format!("absent-{i}"));
            keys.push(store.create_upgrade_request(request).await.unwrap().key());
        }
        controller.start();
        controller.start();
        for key in &keys {
            controller.enqueue(key.clone());
        }
        for key in &keys {
            assert_eq!(wait_terminal(&store, key).await, Phase::Failed);
        }
        controller.shutdown().await;

        let stats = controller.stats();
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.requeued, 3);
        assert_eq!(stats.processed, 6);
    }
}
