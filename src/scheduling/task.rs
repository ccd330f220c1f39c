// Task capability consumed by the scheduler

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Result of one execution attempt.
#[derive(Debug)]
pub enum Outcome<R> {
    /// Finished; the value is delivered on the task's future.
    Complete(R),

    /// Not an error: run again at [`Task::retry_time`].
    Retry,

    /// Transient failure: logged, then run again at [`Task::retry_time`].
    Failed(anyhow::Error),

    /// Permanent failure: the future is fulfilled with
    /// [`TaskError::Abandoned`](crate::errors::TaskError::Abandoned) and the
    /// task is not rescheduled.
    Abandon(anyhow::Error),
}

impl<R> Outcome<R> {
    /// Whether this outcome puts the task back in the queue.
    pub fn reschedules(&self) -> bool {
        matches!(self, Outcome::Retry | Outcome::Failed(_))
    }
}

/// A unit of work the scheduler can run.
///
/// `id` must be unique among concurrently scheduled tasks. Submitting a
/// task whose id is already queued replaces the queued value and deadline
/// in place instead of adding a second entry.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    type Id: Eq + Hash + Clone + Debug + Display + Send + Sync + 'static;
    type Output: Clone + Send + Sync + 'static;

    fn id(&self) -> Self::Id;

    /// When the task should first run.
    fn execution_time(&self) -> DateTime<Utc>;

    /// When the task should run again after `Retry` or `Failed`.
    /// Called after each such attempt, so it may depend on the clock.
    fn retry_time(&self) -> DateTime<Utc>;

    async fn execute(&self) -> Outcome<Self::Output>;
}
