// greedy-sched - greedy in-process task scheduler
// Library exports

pub mod config;
pub mod errors;
pub mod logging;
pub mod scheduling;

pub use errors::TaskError;
pub use scheduling::{Outcome, Scheduler, SchedulerStats, Task, TaskFuture};
