// The scheduler's single reusable timer
//
// Each arm bumps a generation counter and gets a fresh CancellationToken;
// arming again cancels the previous token under the same lock, so at most
// one waiter is ever live. A waiter whose token was cancelled exits
// without firing. A waiter that fires passes its generation back so the
// owner can ignore a fire that lost a race with a newer arm.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

struct Armed {
    generation: u64,
    deadline: DateTime<Utc>,
    cancel: CancellationToken,
}

pub(crate) struct Timer {
    slot: Mutex<Option<Armed>>,
    generation: AtomicU64,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Armed>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Disarm. Returns true if a wait was pending.
    pub(crate) fn stop(&self) -> bool {
        match self.lock().take() {
            Some(armed) => {
                armed.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Supersede any pending wait and arm for the deadline `next` returns.
    ///
    /// `next` runs while the timer lock is held, so two concurrent resets
    /// cannot leave the timer armed for a stale deadline. If it returns
    /// `None` the timer stays disarmed. When the deadline passes,
    /// `on_fire` is called on `runtime` with the generation it was armed
    /// under.
    pub(crate) fn reset_with<N, F>(&self, runtime: &Handle, next: N, on_fire: F) -> Option<DateTime<Utc>>
    where
        N: FnOnce() -> Option<DateTime<Utc>>,
        F: FnOnce(u64) + Send + 'static,
    {
        let mut slot = self.lock();
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
        }

        let deadline = next()?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let cancel = CancellationToken::new();
        *slot = Some(Armed {
            generation,
            deadline,
            cancel: cancel.clone(),
        });
        drop(slot);

        let delay = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        trace!(generation, delay_ms = delay.as_millis() as u64, "timer armed");

        runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!(generation, "timer wait superseded");
                }
                _ = tokio::time::sleep(delay) => on_fire(generation),
            }
        });

        Some(deadline)
    }

    /// Disarm if `generation` is still the armed one. Returns false for a
    /// fire that was superseded after its sleep completed.
    pub(crate) fn claim_fire(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        match slot.as_ref() {
            Some(armed) if armed.generation == generation => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn armed_deadline(&self) -> Option<DateTime<Utc>> {
        self.lock().as_ref().map(|armed| armed.deadline)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
