//! Concurrency-bounded scheduler for background refresh tasks.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use super::RefreshConfig;
use crate::telemetry;
use crate::{Result, VerdandiError};

/// Hooks the manager calls while running tasks of type `T`.
///
/// Only the in-progress markers and `execute` are required. Callbacks run on
/// the worker task; a panicking callback is logged and does not stop the
/// queue.
#[async_trait]
pub trait RefreshHandler<T: Send + Sync>: Send + Sync {
    /// Claim `task`. Returning `false` means it is already being handled and
    /// the manager must not run it.
    fn mark_in_progress(&self, task: &T) -> bool;

    /// Release a claim taken by [`mark_in_progress`](Self::mark_in_progress).
    fn clear_in_progress(&self, task: &T);

    /// Perform one attempt.
    async fn execute(&self, task: &T) -> Result<()>;

    /// Whether a failed attempt is worth repeating. `false` reports the task
    /// as failed without spending the remaining retries.
    fn should_retry(&self, _task: &T, _error: &VerdandiError) -> bool {
        true
    }

    /// Checked before every attempt; `true` abandons the task silently.
    fn should_halt(&self, _task: &T) -> bool {
        false
    }

    fn on_success(&self, _task: &T) {}

    /// All attempts failed. `attempts` counts the first attempt too.
    fn on_failure(&self, _task: &T, _attempts: u32) {}

    /// The task outlived `max_refresh_duration` and was abandoned.
    fn on_timeout(&self, _task: &T, _elapsed: Duration) {}

    /// The task was evicted from a full queue before it ran.
    fn on_dropped(&self, _task: &T) {}
}

/// How a task's attempt chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Timeout,
    Halted,
    Cancelled,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Timeout => "timeout",
            Outcome::Halted => "halted",
            Outcome::Cancelled => "cancelled",
        }
    }
}

enum Admission<T> {
    Run,
    Queued { dropped: Option<T> },
    AlreadyQueued,
    Rejected,
}

struct QueueState<T> {
    active: usize,
    pending: VecDeque<T>,
}

struct Shared<T: Send + Sync> {
    config: RefreshConfig,
    handler: Arc<dyn RefreshHandler<T>>,
    queue: Mutex<QueueState<T>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

/// Runs refresh tasks in the background with bounded concurrency, a capped
/// queue, per-task retries with exponential backoff and a per-task deadline.
///
/// Cloning is cheap; clones share the same queue and workers.
///
/// # Deduplication
///
/// [`schedule`](Self::schedule) first claims the task through
/// [`RefreshHandler::mark_in_progress`]; a refused claim makes the call a
/// no-op. Running tasks keep their claim until they finish. Queued tasks
/// release it while they wait (the queue itself deduplicates them) and claim
/// again when dequeued: if the claim is refused then, another path is
/// already handling the key and the task is skipped.
pub struct BackgroundRefreshManager<T: Send + Sync> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + Sync> Clone for BackgroundRefreshManager<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BackgroundRefreshManager<T>
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    pub fn new(config: RefreshConfig, handler: Arc<dyn RefreshHandler<T>>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                handler,
                queue: Mutex::new(QueueState {
                    active: 0,
                    pending: VecDeque::new(),
                }),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.shared.config
    }

    /// Submit a task. Idempotent while the task is running or queued.
    ///
    /// Must be called within a tokio runtime.
    pub fn schedule(&self, task: T) {
        let shared = &self.shared;
        if shared.cancel.is_cancelled() {
            debug!(?task, "refresh manager shut down, ignoring task");
            return;
        }
        if !shared.guarded("mark_in_progress", &task, || {
            shared.handler.mark_in_progress(&task)
        }) {
            debug!(?task, "refresh already in progress");
            return;
        }

        let admission = {
            let mut queue = shared.lock();
            if queue.active < shared.config.max_concurrent {
                queue.active += 1;
                Admission::Run
            } else if queue.pending.contains(&task) {
                Admission::AlreadyQueued
            } else if shared.config.max_queue_size == 0 {
                Admission::Rejected
            } else {
                let dropped = if queue.pending.len() >= shared.config.max_queue_size {
                    queue.pending.pop_front()
                } else {
                    None
                };
                queue.pending.push_back(task.clone());
                Admission::Queued { dropped }
            }
        };

        match admission {
            Admission::Run => {
                metrics::counter!(telemetry::REFRESH_SCHEDULED_TOTAL).increment(1);
                let worker = Arc::clone(shared);
                shared.tracker.spawn(worker.work(task));
            }
            Admission::Queued { dropped } => {
                metrics::counter!(telemetry::REFRESH_SCHEDULED_TOTAL).increment(1);
                shared.release(&task);
                debug!(?task, "refresh queued");
                if let Some(dropped) = dropped {
                    shared.drop_task(&dropped);
                }
            }
            Admission::AlreadyQueued => {
                shared.release(&task);
                debug!(?task, "refresh already queued");
            }
            Admission::Rejected => {
                shared.release(&task);
                shared.drop_task(&task);
            }
        }
    }

    /// Tasks currently executing (never above `max_concurrent`).
    pub fn active_count(&self) -> usize {
        self.shared.lock().active
    }

    /// Tasks waiting for a slot.
    pub fn queue_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_idle(&self) -> bool {
        let queue = self.shared.lock();
        queue.active == 0 && queue.pending.is_empty()
    }

    /// Cancel in-flight work, discard the queue and wait for workers to exit.
    ///
    /// Interrupted tasks fire no outcome callback; their claims are released.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        let discarded = {
            let mut queue = self.shared.lock();
            let n = queue.pending.len();
            queue.pending.clear();
            n
        };
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        debug!(discarded, "refresh manager shut down");
    }
}

impl<T> Shared<T>
where
    T: Clone + PartialEq + Debug + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a hook, containing panics. Returns `R::default()` on panic.
    fn guarded<R: Default>(&self, hook: &'static str, task: &T, f: impl FnOnce() -> R) -> R {
        match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => value,
            Err(_) => {
                error!(hook, ?task, "refresh callback panicked");
                R::default()
            }
        }
    }

    fn release(&self, task: &T) {
        self.guarded("clear_in_progress", task, || {
            self.handler.clear_in_progress(task)
        });
    }

    fn drop_task(&self, task: &T) {
        warn!(?task, "refresh queue full, dropping oldest task");
        metrics::counter!(telemetry::REFRESH_DROPPED_TOTAL).increment(1);
        self.guarded("on_dropped", task, || self.handler.on_dropped(task));
    }

    /// Worker loop: run the given task, then keep draining the queue until
    /// it is empty. Holds one concurrency slot for its whole lifetime.
    async fn work(self: Arc<Self>, first: T) {
        let mut next = Some(first);
        while let Some(task) = next {
            let outcome = self.run(&task).await;
            metrics::counter!(telemetry::REFRESH_OUTCOMES_TOTAL, "outcome" => outcome.as_str())
                .increment(1);
            self.release(&task);
            next = self.next_task();
        }
    }

    /// Pop the next claimable task, or give up the slot when none is left.
    fn next_task(&self) -> Option<T> {
        loop {
            let task = {
                let mut queue = self.lock();
                if self.cancel.is_cancelled() {
                    queue.pending.clear();
                }
                match queue.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        queue.active -= 1;
                        return None;
                    }
                }
            };
            if self.guarded("mark_in_progress", &task, || {
                self.handler.mark_in_progress(&task)
            }) {
                return Some(task);
            }
            debug!(?task, "queued refresh claimed elsewhere, skipping");
        }
    }

    async fn run(&self, task: &T) -> Outcome {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            let elapsed = started.elapsed();
            if elapsed > self.config.max_refresh_duration {
                warn!(
                    ?task,
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "background refresh exceeded its deadline, abandoning"
                );
                self.guarded("on_timeout", task, || self.handler.on_timeout(task, elapsed));
                return Outcome::Timeout;
            }

            if attempt > 0 {
                let delay = self.config.delay_for_attempt(attempt);
                metrics::counter!(telemetry::REFRESH_RETRIES_TOTAL).increment(1);
                tokio::select! {
                    _ = self.cancel.cancelled() => return Outcome::Cancelled,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            // A panicking predicate halts the task.
            let halt = std::panic::catch_unwind(AssertUnwindSafe(|| self.handler.should_halt(task)))
                .unwrap_or(true);
            if halt {
                debug!(?task, attempt, "background refresh halted");
                return Outcome::Halted;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                result = AssertUnwindSafe(self.handler.execute(task)).catch_unwind() => result,
            };
            let (error, retryable) = match result {
                Ok(Ok(())) => {
                    debug!(?task, attempt, "background refresh succeeded");
                    self.guarded("on_success", task, || self.handler.on_success(task));
                    return Outcome::Success;
                }
                Ok(Err(e)) => {
                    // A panicking predicate keeps retrying.
                    let retryable = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        self.handler.should_retry(task, &e)
                    }))
                    .unwrap_or(true);
                    (e.to_string(), retryable)
                }
                Err(_) => ("refresh execution panicked".to_string(), true),
            };

            if retryable && attempt < self.config.max_retry_attempts {
                warn!(
                    ?task,
                    attempt = attempt + 1,
                    max_attempts = self.config.max_retry_attempts + 1,
                    delay_ms = self.config.delay_for_attempt(attempt + 1).as_millis() as u64,
                    error = %error,
                    "background refresh failed, retrying"
                );
                attempt += 1;
            } else {
                warn!(?task, attempts = attempt + 1, error = %error, "background refresh failed, giving up");
                self.guarded("on_failure", task, || {
                    self.handler.on_failure(task, attempt + 1)
                });
                return Outcome::Failure;
            }
        }
    }
}
