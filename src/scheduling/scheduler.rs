// Greedy task scheduler
//
// One queue, one timer. The timer is always armed for the earliest queued
// deadline (or disarmed). When it fires, the earliest task is popped, the
// timer is re-armed for the next one, and the popped task runs on its own
// tokio task so a slow body never delays the next dispatch.

use super::future::TaskFuture;
use super::queue::{TaskItem, TaskQueue, Upsert};
use super::task::{Outcome, Task};
use super::timer::Timer;
use crate::config::SchedulerConfig;
use crate::errors::TaskError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

/// Point-in-time view of a scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks waiting in the queue
    pub queued: usize,
    /// Dispatched executions that have not finished
    pub running: usize,
    /// Whether new dispatch is suspended
    pub paused: bool,
    /// Earliest queued deadline
    pub next_deadline: Option<DateTime<Utc>>,
    /// Whether a timer wait is pending
    pub timer_armed: bool,
}

/// Greedy scheduler for tasks of type `T`.
///
/// Cheap to clone; clones share the same queue and timer. Must be created
/// inside a Tokio runtime (or given a [`Handle`] explicitly).
pub struct Scheduler<T: Task> {
    shared: Arc<Shared<T>>,
}

impl<T: Task> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T: Task> {
    config: SchedulerConfig,
    tolerance: chrono::Duration,
    runtime: Handle,
    queue: TaskQueue<T>,
    timer: Timer,
    /// Dispatched executions; these are never aborted.
    running: AtomicUsize,
    /// Pause depth; timer fires are serviced only at zero.
    pausing: AtomicUsize,
    /// Notified when a pop leaves the queue empty.
    drained: Notify,
    /// Notified when `running` drops to zero.
    idle: Notify,
}

impl<T: Task> Scheduler<T> {
    /// Scheduler with default configuration on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::with_runtime(config, Handle::current())
    }

    /// Scheduler whose timer waits and executions are spawned on `runtime`.
    ///
    /// An out-of-range `early_tolerance_ms` is clamped rather than rejected.
    pub fn with_runtime(config: SchedulerConfig, runtime: Handle) -> Self {
        if let Err(e) = config.validate() {
            warn!(scheduler = %config.name, "Scheduler config out of range, clamping: {}", e);
        }
        let tolerance = config.early_tolerance();
        Self {
            shared: Arc::new(Shared {
                config,
                tolerance,
                runtime,
                queue: TaskQueue::new(),
                timer: Timer::new(),
                running: AtomicUsize::new(0),
                pausing: AtomicUsize::new(0),
                drained: Notify::new(),
                idle: Notify::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Schedule `task` at its execution time.
    ///
    /// If a task with the same id is already queued, the queued entry takes
    /// the new value and deadline and its existing future is returned.
    pub fn submit(&self, task: T) -> TaskFuture<T::Output> {
        let when = task.execution_time();
        self.shared.schedule(task, when)
    }

    /// Like [`submit`](Self::submit) but eligible immediately.
    pub fn trigger(&self, task: T) -> TaskFuture<T::Output> {
        self.shared.schedule(task, Utc::now())
    }

    /// Suspend new dispatch. Queued tasks stay queued and running tasks
    /// keep running. Calls nest; each needs a matching [`resume`](Self::resume).
    pub fn pause(&self) {
        let depth = self.shared.pausing.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.timer.stop();
        info!(scheduler = %self.shared.config.name, depth, "Scheduler paused");
    }

    /// Undo one [`pause`](Self::pause). Dispatch restarts when the last one
    /// is undone.
    pub fn resume(&self) {
        match self.shared.release_pause() {
            Some(0) => {
                info!(scheduler = %self.shared.config.name, "Scheduler resumed");
                self.shared.rearm();
            }
            Some(depth) => {
                debug!(scheduler = %self.shared.config.name, depth, "Pause released, still paused");
            }
            None => {
                warn!(scheduler = %self.shared.config.name, "resume() without a matching pause()");
            }
        }
    }

    /// Stop dispatching and wait for running executions to finish.
    ///
    /// Tasks that are not yet due stay queued. Meant for teardown.
    pub async fn stop(&self) {
        self.pause();
        self.shared.wait_idle().await;
        self.shared.release_pause();
        info!(
            scheduler = %self.shared.config.name,
            queued = self.shared.queue.len(),
            "Scheduler stopped"
        );
    }

    /// Wait until every queued task has been dispatched. Does not wait for
    /// dispatched tasks to finish.
    pub async fn wait(&self) {
        self.shared.wait_drained().await;
    }

    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Executions currently in flight.
    pub fn running(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_queued(&self, id: &T::Id) -> bool {
        self.shared.queue.contains(id)
    }

    /// Deadline of the queued task with this id.
    pub fn deadline_of(&self, id: &T::Id) -> Option<DateTime<Utc>> {
        self.shared.queue.deadline_of(id)
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.shared.queue.len(),
            running: self.running(),
            paused: self.is_paused(),
            next_deadline: self.shared.queue.peek().map(|(_, deadline)| deadline),
            timer_armed: self.shared.timer.armed_deadline().is_some(),
        }
    }
}

impl<T: Task> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.shared.config.name)
            .field("stats", &self.stats())
            .finish()
    }
}

/// What the task body asked for, decided inside the execution unit so a
/// panicking `retry_time` is contained too.
enum Step<R> {
    Complete(R),
    Retry {
        at: DateTime<Utc>,
        cause: Option<anyhow::Error>,
    },
    Abandon(anyhow::Error),
}

impl<T: Task> Shared<T> {
    fn is_paused(&self) -> bool {
        self.pausing.load(Ordering::Acquire) > 0
    }

    /// Decrement the pause depth, saturating at zero. Returns the new depth,
    /// or `None` if it was already zero.
    fn release_pause(&self) -> Option<usize> {
        self.pausing
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| depth.checked_sub(1))
            .ok()
            .map(|previous| previous - 1)
    }

    fn schedule(self: &Arc<Self>, task: T, when: DateTime<Utc>) -> TaskFuture<T::Output> {
        let id = task.id();
        let (future, kind) = self.queue.upsert(task, when);
        match kind {
            Upsert::Updated => debug!(task = %id, deadline = %when, "Queued task updated in place"),
            Upsert::Pushed => debug!(task = %id, deadline = %when, "Task queued"),
        }
        self.rearm();
        future
    }

    /// Put an entry back in the queue, keeping its future.
    fn requeue(self: &Arc<Self>, mut item: TaskItem<T>, when: DateTime<Utc>) {
        debug!(task = %item.id, deadline = %when, "Task requeued");
        item.deadline = when;
        self.queue.push(item);
        self.rearm();
    }

    /// Arm the timer for the earliest deadline, superseding any pending wait.
    fn rearm(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.timer.reset_with(
            &self.runtime,
            || {
                if self.is_paused() {
                    return None;
                }
                self.queue.peek().map(|(_, deadline)| deadline)
            },
            move |generation| Self::on_fire(&weak, generation),
        );
    }

    fn on_fire(weak: &Weak<Self>, generation: u64) {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        if shared.timer.claim_fire(generation) {
            shared.worker();
        }
    }

    fn worker(self: &Arc<Self>) {
        // A later resume() re-arms.
        if self.is_paused() {
            trace!("Timer fired while paused");
            return;
        }

        let Some(item) = self.queue.pop() else {
            return;
        };
        if self.queue.is_empty() {
            self.drained.notify_waiters();
        }

        self.rearm();
        self.dispatch(item);
    }

    fn dispatch(self: &Arc<Self>, item: TaskItem<T>) {
        let guard = RunningGuard::enter(Arc::clone(self));
        trace!(task = %item.id, "Task dispatched");
        self.runtime.spawn(async move {
            guard.shared.execute(item).await;
        });
    }

    async fn execute(self: &Arc<Self>, item: TaskItem<T>) {
        // Timer coarseness can pop an entry slightly early.
        let early = Utc::now()
            .checked_add_signed(self.tolerance)
            .is_some_and(|limit| item.deadline > limit);
        if early {
            let deadline = item.deadline;
            self.requeue(item, deadline);
            return;
        }

        let task = Arc::clone(&item.task);
        let body = self.runtime.spawn(async move {
            match task.execute().await {
                Outcome::Complete(value) => Step::Complete(value),
                Outcome::Retry => Step::Retry {
                    at: task.retry_time(),
                    cause: None,
                },
                Outcome::Failed(err) => Step::Retry {
                    at: task.retry_time(),
                    cause: Some(err),
                },
                Outcome::Abandon(err) => Step::Abandon(err),
            }
        });

        match body.await {
            Ok(Step::Complete(value)) => {
                debug!(task = %item.id, "Task completed");
                item.future.put(Ok(value));
            }
            Ok(Step::Retry { at, cause: None }) => {
                debug!(task = %item.id, retry_at = %at, "Task asked to retry");
                self.requeue(item, at);
            }
            Ok(Step::Retry { at, cause: Some(err) }) => {
                warn!(task = %item.id, retry_at = %at, "Task failed, retrying: {:#}", err);
                self.requeue(item, at);
            }
            Ok(Step::Abandon(err)) => {
                warn!(task = %item.id, "Task abandoned: {:#}", err);
                item.future.put(Err(TaskError::Abandoned {
                    id: item.id.to_string(),
                    reason: format!("{:#}", err),
                }));
            }
            Err(join) if join.is_panic() => {
                let reason = panic_reason(join.into_panic());
                error!(
                    scheduler = %self.config.name,
                    task = %item.id,
                    "Task panicked while executing: {}",
                    reason
                );
                item.future.put(Err(TaskError::Panicked {
                    id: item.id.to_string(),
                    reason,
                }));
            }
            Err(_) => {
                warn!(task = %item.id, "Task aborted before completion");
                item.future.put(Err(TaskError::Aborted {
                    id: item.id.to_string(),
                }));
            }
        }
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.queue.is_empty() {
                return;
            }
            notified.await;
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.running.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Counts one execution in `running` for as long as it lives.
struct RunningGuard<T: Task> {
    shared: Arc<Shared<T>>,
}

impl<T: Task> RunningGuard<T> {
    fn enter(shared: Arc<Shared<T>>) -> Self {
        shared.running.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }
}

impl<T: Task> Drop for RunningGuard<T> {
    fn drop(&mut self) {
        if self.shared.running.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.idle.notify_waiters();
        }
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Probe {
        id: u32,
        at: DateTime<Utc>,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Task for Probe {
        type Id = u32;
        type Output = u32;

        fn id(&self) -> u32 {
            self.id
        }

        fn execution_time(&self) -> DateTime<Utc> {
            self.at
        }

        fn retry_time(&self) -> DateTime<Utc> {
            Utc::now()
        }

        async fn execute(&self) -> Outcome<u32> {
            Outcome::Complete(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn probe(id: u32, offset_ms: i64, calls: &Arc<AtomicU32>) -> Probe {
        Probe {
            id,
            at: Utc::now() + chrono::Duration::milliseconds(offset_ms),
            calls: Arc::clone(calls),
        }
    }

    #[tokio::test]
    async fn test_unpaired_resume_saturates() {
        let scheduler = Scheduler::<Probe>::new();
        scheduler.resume();
        assert!(!scheduler.is_paused());

        scheduler.pause();
        scheduler.pause();
        scheduler.resume();
        assert!(scheduler.is_paused());
        scheduler.resume();
        assert!(!scheduler.is_paused());
    }

    #[tokio::test]
    async fn test_stats_reflect_queue_and_timer() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::with_config(SchedulerConfig::named("stats"));
        scheduler.submit(probe(1, 60_000, &calls));

        let stats = scheduler.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.running, 0);
        assert!(!stats.paused);
        assert!(stats.timer_armed);
        assert!(stats.next_deadline.is_some());

        scheduler.pause();
        let stats = scheduler.stats();
        assert!(stats.paused);
        assert!(!stats.timer_armed);
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn test_empty_queue_leaves_timer_disarmed() {
        let scheduler = Scheduler::<Probe>::new();
        scheduler.pause();
        scheduler.resume();
        assert!(!scheduler.stats().timer_armed);
        scheduler.wait().await;
    }

    #[tokio::test]
    async fn test_trigger_runs_future_task_now() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new();
        let future = scheduler.trigger(probe(7, 60_000, &calls));

        let result = tokio::time::timeout(Duration::from_secs(2), future.get())
            .await
            .expect("triggered task should run immediately");
        assert_eq!(result, Ok(1));
        assert!(!scheduler.is_queued(&7));
    }

    #[tokio::test]
    async fn test_trigger_updates_queued_entry() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new();
        let queued = scheduler.submit(probe(3, 60_000, &calls));
        assert!(scheduler.is_queued(&3));

        let triggered = scheduler.trigger(probe(3, 60_000, &calls));
        assert!(queued.ptr_eq(&triggered));
        assert_eq!(triggered.get().await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_scheduler_releases_pending_timer() {
        let calls = Arc::new(AtomicU32::new(0));
        let future = {
            let scheduler = Scheduler::new();
            scheduler.submit(probe(9, 30, &calls))
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!future.is_ready());
    }

    #[tokio::test]
    async fn test_oversized_tolerance_still_runs_due_task() {
        for early_tolerance_ms in [1 << 62, u64::MAX - 10_000_000_000] {
            let calls = Arc::new(AtomicU32::new(0));
            let scheduler = Scheduler::with_config(SchedulerConfig {
                early_tolerance_ms,
                ..SchedulerConfig::named("oversized")
            });
            let future = scheduler.submit(probe(1, 0, &calls));

            let result = tokio::time::timeout(Duration::from_secs(2), future.get())
                .await
                .expect("due task should run despite the configured tolerance");
            assert_eq!(result, Ok(1));
            assert!(scheduler.is_empty());
        }
    }

    #[tokio::test]
    async fn test_early_entry_is_requeued_with_its_future() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new();
        // Keeps the requeue from re-arming and dispatching again.
        scheduler.pause();

        let task = probe(4, 60_000, &calls);
        let deadline = task.at;
        let item = TaskItem::new(task, deadline);
        let future = item.future.clone();
        scheduler.shared.execute(item).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!future.is_ready());
        assert_eq!(scheduler.deadline_of(&4), Some(deadline));

        // The requeued entry still owns the original future.
        scheduler.resume();
        let triggered = scheduler.trigger(probe(4, 60_000, &calls));
        assert!(triggered.ptr_eq(&future));
        assert_eq!(future.get().await, Ok(1));
    }

    #[tokio::test]
    async fn test_entry_within_tolerance_runs_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::with_config(SchedulerConfig {
            early_tolerance_ms: 5_000,
            ..SchedulerConfig::named("tolerant")
        });

        let task = probe(5, 1_000, &calls);
        let deadline = task.at;
        let item = TaskItem::new(task, deadline);
        let future = item.future.clone();
        scheduler.shared.execute(item).await;

        assert_eq!(future.try_get(), Some(Ok(1)));
        assert!(!scheduler.is_queued(&5));
    }

    #[test]
    fn test_panic_reason_formats() {
        assert_eq!(panic_reason(Box::new("static")), "static");
        assert_eq!(panic_reason(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_reason(Box::new(5u8)), "unknown panic payload");
    }
}
