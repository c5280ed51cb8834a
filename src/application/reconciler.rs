//! Edge-triggered reconcile engine.
//!
//! One work queue per controller kind with per-key deduplication and
//! serialization: a key is never reconciled by two workers at once, and a
//! key observed while in flight is marked dirty and re-queued when the
//! running reconcile finishes. Transient errors re-enqueue with capped
//! exponential backoff; version conflicts re-enqueue immediately.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tracing::{debug, error, warn};

use crate::domain::errors::{DomainError, DomainResult};

/// Identity of one reconciled resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a successful reconcile asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing to do until the next watch event.
    Done,
    /// Observe again after the given delay (polling on external progress).
    RequeueAfter(Duration),
}

/// A pure observed-state-to-writes pass over one resource.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome>;
}

/// Capped exponential backoff for transient errors.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry attempt (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(20));
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.cap)
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ResourceKey>,
    queued: HashSet<ResourceKey>,
    in_flight: HashSet<ResourceKey>,
    dirty: HashSet<ResourceKey>,
}

/// Deduplicating work queue with per-key serialization.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    /// Enqueue a key. Duplicates of an already-queued key are dropped; keys
    /// currently being reconciled are marked dirty and re-queued on
    /// completion.
    pub fn add(&self, key: ResourceKey) {
        let mut state = self.state.lock().unwrap();
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.pending.push_back(key);
            self.notify.notify_one();
        }
    }

    /// Pop the next key, waiting for work. Returns None on shutdown.
    pub async fn next(&self, shutdown: &mut watch::Receiver<bool>) -> Option<ResourceKey> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            {
                let mut state = self.state.lock().unwrap();
                if let Some(key) = state.pending.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    return Some(key);
                }
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Mark a key's reconcile finished, re-queueing it if it went dirty
    /// while in flight.
    pub fn done(&self, key: &ResourceKey) {
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.clone()) {
            state.pending.push_back(key.clone());
            self.notify.notify_one();
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drains one work queue with a pool of reconcile workers.
pub struct ControllerRunner {
    name: &'static str,
    queue: Arc<WorkQueue>,
    reconciler: Arc<dyn Reconcile>,
    backoff: BackoffPolicy,
    workers: usize,
    failures: Mutex<HashMap<ResourceKey, u32>>,
}

impl ControllerRunner {
    pub fn new(
        name: &'static str,
        reconciler: Arc<dyn Reconcile>,
        backoff: BackoffPolicy,
        workers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            queue: WorkQueue::new(),
            reconciler,
            backoff,
            workers: workers.max(1),
            failures: Mutex::new(HashMap::new()),
        })
    }

    pub fn queue(&self) -> Arc<WorkQueue> {
        Arc::clone(&self.queue)
    }

    pub fn enqueue(&self, key: ResourceKey) {
        self.queue.add(key);
    }

    /// Run the worker pool until shutdown flips to true.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let runner = Arc::clone(&self);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                runner.worker_loop(worker_id, shutdown).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        debug!(controller = self.name, "runner stopped");
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        while let Some(key) = self.queue.next(&mut shutdown).await {
            debug!(controller = self.name, worker = worker_id, key = %key, "reconciling");
            let result = self.reconciler.reconcile(&key).await;
            self.queue.done(&key);

            match result {
                Ok(ReconcileOutcome::Done) => {
                    self.failures.lock().unwrap().remove(&key);
                }
                Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                    self.failures.lock().unwrap().remove(&key);
                    self.requeue_later(key, delay);
                }
                Err(err) => self.handle_error(key, err),
            }
        }
    }

    fn handle_error(&self, key: ResourceKey, err: DomainError) {
        if err.is_conflict() {
            debug!(controller = self.name, key = %key, "version conflict, requeueing");
            self.queue.add(key);
            return;
        }

        let attempt = {
            let mut failures = self.failures.lock().unwrap();
            let attempt = failures.entry(key.clone()).or_insert(0);
            *attempt += 1;
            *attempt - 1
        };
        let delay = self.backoff.delay(attempt);

        if err.is_transient() {
            warn!(
                controller = self.name,
                key = %key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient reconcile error, backing off"
            );
        } else {
            // Permanent errors are normally absorbed into a Failed condition
            // by the controller itself; reaching here means the write-back
            // did not happen, so keep retrying at the capped rate.
            error!(controller = self.name, key = %key, error = %err, "reconcile error");
        }
        self.requeue_later(key, delay);
    }

    fn requeue_later(&self, key: ResourceKey, delay: Duration) {
        let queue = Arc::clone(&self.queue);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingReconciler {
        count: AtomicU32,
    }

    #[async_trait]
    impl Reconcile for CountingReconciler {
        async fn reconcile(&self, _key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(ReconcileOutcome::Done)
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(5),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(20), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_queue_deduplicates() {
        let queue = WorkQueue::new();
        queue.add(ResourceKey::new("default", "a"));
        queue.add(ResourceKey::new("default", "a"));
        queue.add(ResourceKey::new("default", "b"));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_in_flight_key_goes_dirty_and_requeues() {
        let queue = WorkQueue::new();
        let (_tx, mut shutdown) = watch::channel(false);

        queue.add(ResourceKey::new("default", "a"));
        let key = queue.next(&mut shutdown).await.unwrap();

        // Two events arrive while the key is being reconciled: one requeue.
        queue.add(key.clone());
        queue.add(key.clone());
        assert_eq!(queue.len(), 0);

        queue.done(&key);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_runner_drains_queue() {
        let reconciler = Arc::new(CountingReconciler {
            count: AtomicU32::new(0),
        });
        let runner = ControllerRunner::new(
            "test",
            reconciler.clone() as Arc<dyn Reconcile>,
            BackoffPolicy::default(),
            2,
        );

        for i in 0..5 {
            runner.enqueue(ResourceKey::new("default", format!("exp-{i}")));
        }

        let (tx, rx) = watch::channel(false);
        let run_handle = tokio::spawn(Arc::clone(&runner).run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        run_handle.await.unwrap();

        assert_eq!(reconciler.count.load(Ordering::SeqCst), 5);
    }
}
