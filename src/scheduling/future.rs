// Single-assignment result cell shared between a queued task and its callers

use crate::errors::TaskError;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

type Slot<R> = Option<Result<R, TaskError>>;

/// Handle to the eventual result of a scheduled task.
///
/// Clones share the same cell. The cell is written at most once by the
/// executing unit; any number of holders may read it, any number of times.
pub struct TaskFuture<R> {
    slot: Arc<watch::Sender<Slot<R>>>,
}

impl<R> Clone for TaskFuture<R> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<R: Clone + Send + Sync> TaskFuture<R> {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { slot: Arc::new(tx) }
    }

    /// Store the outcome. Returns `false` if one was already stored, in
    /// which case `outcome` is discarded.
    pub(crate) fn put(&self, outcome: Result<R, TaskError>) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
            true
        })
    }

    /// Wait for the task to finish and return its outcome.
    pub async fn get(&self) -> Result<R, TaskError> {
        let mut rx = self.slot.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
        // The sender lives in `self`, so `changed` cannot observe it closing.
        unreachable!("task future dropped while being read")
    }

    /// Blocking variant of [`get`](Self::get) for synchronous callers.
    ///
    /// Must not be called from inside an async runtime worker thread.
    pub fn blocking_get(&self) -> Result<R, TaskError> {
        futures::executor::block_on(self.get())
    }

    /// The outcome, if the task already finished.
    pub fn try_get(&self) -> Option<Result<R, TaskError>> {
        self.slot.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// The error, if the task finished with one.
    pub fn error(&self) -> Option<TaskError> {
        self.slot
            .borrow()
            .as_ref()
            .and_then(|outcome| outcome.as_ref().err().cloned())
    }

    /// Whether two handles refer to the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<R> fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("ready", &self.slot.borrow().is_some())
            .finish()
    }
}
