// Greedy in-process task scheduling
//
// Tasks run at or after their scheduled time, can ask to be retried, and
// deliver their result through a shared future.

mod future;
mod queue;
mod scheduler;
mod task;
mod timer;

pub use future::TaskFuture;
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::{Outcome, Task};
