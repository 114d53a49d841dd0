//! Keyed async operation queue.
//!
//! All file-system mutations in brim flow through an [`OpQueue`], which
//! provides the ordering guarantees the mirror depends on:
//!
//! - **Partitioned exclusion** — at most one task per partition key runs at
//!   any moment. Submissions for a busy key are deferred, never rejected.
//! - **FIFO per key** — tasks for the same key run in submission order.
//!   Across keys there is no ordering guarantee.
//! - **Bounded concurrency** — at most `max_concurrency` distinct keys run
//!   at once.
//! - **Per-task timeout** — when a task's timeout elapses, the reaper
//!   releases its key slot even though the task body keeps running; the
//!   abandoned task's eventual completion is discarded via a run-id check,
//!   so it cannot release a slot now owned by a successor.
//! - **Graceful drain** — [`OpQueue::stop`] refuses new submissions;
//!   [`OpQueue::drain`] waits for outstanding work and escalates to an
//!   immediate stop (discarding not-yet-started tasks) when the shutdown
//!   timeout expires.
//!
//! tokio schedules preemptively, so queue state lives behind a single
//! `std::sync::Mutex` that is never held across an await point.

mod error;

pub use error::QueueError;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, trace, warn};

/// Boxed error type produced by queue tasks.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// The future type executed by the queue.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

/// A task failure forwarded to the host for classification.
#[derive(Debug)]
pub struct TaskFailure {
    /// Partition key of the failed task.
    pub key: String,
    /// The error the task completed with.
    pub error: TaskError,
}

/// Queue tuning knobs.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of distinct keys running concurrently.
    pub max_concurrency: usize,
    /// Timeout applied to tasks submitted via [`OpQueue::submit`].
    /// `None` disables the default timeout.
    pub default_task_timeout: Option<Duration>,
    /// How often the reaper sweeps the running-task table for expired
    /// entries. An evicted key becomes schedulable again on the sweep, so
    /// a timed-out task releases its key within `timeout + reaper_interval`.
    pub reaper_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 300,
            default_task_timeout: Some(Duration::from_secs(60)),
            reaper_interval: Duration::from_secs(1),
        }
    }
}

struct QueueItem {
    key: String,
    timeout: Option<Duration>,
    task: TaskFuture,
}

struct RunningSlot {
    run_id: u64,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    pending: VecDeque<QueueItem>,
    running: HashMap<String, RunningSlot>,
    next_run_id: u64,
    stopping: bool,
}

/// Keyed operation queue. Created with [`OpQueue::new`]; shared via `Arc`.
pub struct OpQueue {
    inner: Mutex<Inner>,
    config: QueueConfig,
    /// Signalled whenever the queue may have become idle.
    idle: Notify,
    /// Optional failure sink; when absent, failures are logged at ERROR.
    failures: Option<mpsc::UnboundedSender<TaskFailure>>,
}

impl OpQueue {
    /// Create a queue and start its reaper.
    ///
    /// Failures are logged at ERROR level.
    pub fn new(config: QueueConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Create a queue whose task failures are forwarded on `failures`
    /// for the host to classify.
    pub fn with_failure_sink(
        config: QueueConfig,
        failures: mpsc::UnboundedSender<TaskFailure>,
    ) -> Arc<Self> {
        Self::build(config, Some(failures))
    }

    fn build(config: QueueConfig, failures: Option<mpsc::UnboundedSender<TaskFailure>>) -> Arc<Self> {
        let queue = Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            config,
            idle: Notify::new(),
            failures,
        });
        Self::spawn_reaper(&queue);
        queue
    }

    /// Submit a task under the default timeout.
    pub fn submit(self: &Arc<Self>, key: impl Into<String>, task: TaskFuture) -> Result<(), QueueError> {
        let timeout = self.config.default_task_timeout;
        self.submit_with_timeout(key, timeout, task)
    }

    /// Submit a task with an explicit timeout (`None` = run unbounded).
    pub fn submit_with_timeout(
        self: &Arc<Self>,
        key: impl Into<String>,
        timeout: Option<Duration>,
        task: TaskFuture,
    ) -> Result<(), QueueError> {
        let key = key.into();
        {
            let mut inner = self.lock();
            if inner.stopping {
                return Err(QueueError::Stopped);
            }
            trace!(%key, pending = inner.pending.len() + 1, "task submitted");
            inner.pending.push_back(QueueItem { key, timeout, task });
        }
        self.dispatch();
        Ok(())
    }

    /// Number of tasks waiting to start.
    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of keys currently holding a running slot.
    pub fn running_len(&self) -> usize {
        self.lock().running.len()
    }

    /// Whether no work is pending or running.
    pub fn is_idle(&self) -> bool {
        let inner = self.lock();
        inner.pending.is_empty() && inner.running.is_empty()
    }

    /// Stop accepting submissions. With `immediate`, also discard tasks
    /// that have not started yet; tasks already running are never
    /// interrupted.
    pub fn stop(&self, immediate: bool) {
        let discarded = {
            let mut inner = self.lock();
            inner.stopping = true;
            if immediate {
                let n = inner.pending.len();
                inner.pending.clear();
                n
            } else {
                0
            }
        };
        if discarded > 0 {
            warn!(discarded, "immediate stop — discarding queued tasks");
        }
        self.notify_if_idle();
    }

    /// Drain the queue for shutdown.
    ///
    /// Refuses new submissions, then waits up to `timeout` for pending and
    /// running work to finish. On expiry the drain escalates to an
    /// immediate stop and returns `false`; in-flight task bodies are left
    /// to run to completion on their own.
    pub async fn drain(self: &Arc<Self>, timeout: Duration) -> bool {
        self.stop(false);
        if tokio::time::timeout(timeout, self.wait_idle()).await.is_ok() {
            return true;
        }
        warn!(
            timeout_ms = timeout.as_millis() as u64,
            "graceful drain timed out — escalating to immediate stop"
        );
        self.stop(true);
        false
    }

    /// Wait until the queue is idle (no pending, no running).
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("queue lock poisoned")
    }

    /// Move startable items from pending to running and spawn them.
    ///
    /// An item is startable when its key holds no running slot, no earlier
    /// pending item claims the same key (per-key FIFO), and the
    /// concurrency cap has room.
    fn dispatch(self: &Arc<Self>) {
        let mut to_start = Vec::new();
        {
            let mut inner = self.lock();
            let mut blocked: HashSet<String> = HashSet::new();
            let mut i = 0;
            while i < inner.pending.len() {
                if inner.running.len() >= self.config.max_concurrency {
                    break;
                }
                let key = &inner.pending[i].key;
                if inner.running.contains_key(key) || blocked.contains(key) {
                    blocked.insert(key.clone());
                    i += 1;
                    continue;
                }
                let item = inner
                    .pending
                    .remove(i)
                    .expect("index checked against length");
                let run_id = inner.next_run_id;
                inner.next_run_id += 1;
                let expires_at = item.timeout.map(|t| Instant::now() + t);
                inner
                    .running
                    .insert(item.key.clone(), RunningSlot { run_id, expires_at });
                to_start.push((item, run_id));
            }
        }
        for (item, run_id) in to_start {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                trace!(key = %item.key, run_id, "task starting");
                let result = item.task.await;
                queue.complete(&item.key, run_id, result);
            });
        }
    }

    /// Completion path for a spawned task. Releases the key slot only when
    /// the slot still belongs to this run; a slot reassigned after timeout
    /// eviction is left untouched.
    fn complete(self: &Arc<Self>, key: &str, run_id: u64, result: Result<(), TaskError>) {
        let released = {
            let mut inner = self.lock();
            match inner.running.get(key) {
                Some(slot) if slot.run_id == run_id => {
                    inner.running.remove(key);
                    true
                }
                _ => false,
            }
        };
        if !released {
            debug!(%key, run_id, "discarding completion of evicted task");
        }
        if let Err(err) = result {
            match &self.failures {
                Some(tx) => {
                    if tx
                        .send(TaskFailure {
                            key: key.to_owned(),
                            error: err,
                        })
                        .is_err()
                    {
                        debug!(%key, "failure sink closed — dropping task error");
                    }
                }
                None => error!(%key, error = %err, "queued task failed"),
            }
        }
        self.dispatch();
        self.notify_if_idle();
    }

    /// Evict running slots whose deadline has passed and reschedule.
    fn reap(self: &Arc<Self>) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut inner = self.lock();
            let keys: Vec<String> = inner
                .running
                .iter()
                .filter(|(_, slot)| slot.expires_at.is_some_and(|at| at <= now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                inner.running.remove(key);
            }
            keys
        };
        if expired.is_empty() {
            return;
        }
        for key in &expired {
            warn!(%key, "task timeout — releasing key slot");
        }
        self.dispatch();
        self.notify_if_idle();
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.idle.notify_waiters();
        }
    }

    fn spawn_reaper(queue: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(queue);
        let period = queue.config.reaper_interval;
        tokio::spawn(async move {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let Some(queue) = weak.upgrade() else { break };
                queue.reap();
            }
        });
    }
}
