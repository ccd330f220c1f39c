// Time-ordered task queue with by-identity lookup
//
// A binary min-heap keyed by (deadline, push sequence) plus an
// identity -> entry map, both behind one mutex. Every entry carries a
// sequence number unique among live entries; `positions` maps it to the
// entry's current heap index and is kept in step on every swap.

use super::future::TaskFuture;
use super::task::Task;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A queued task: the task value, its next execution time and its future.
pub(crate) struct TaskItem<T: Task> {
    pub(crate) id: T::Id,
    pub(crate) task: Arc<T>,
    pub(crate) deadline: DateTime<Utc>,
    pub(crate) future: TaskFuture<T::Output>,
    seq: u64,
}

impl<T: Task> TaskItem<T> {
    pub(crate) fn new(task: T, deadline: DateTime<Utc>) -> Self {
        Self {
            id: task.id(),
            task: Arc::new(task),
            deadline,
            future: TaskFuture::new(),
            seq: 0,
        }
    }
}

struct Inner<T: Task> {
    heap: Vec<TaskItem<T>>,
    /// Identity -> sequence of the entry `update` should target.
    lookup: HashMap<T::Id, u64>,
    /// Sequence -> heap index.
    positions: HashMap<u64, usize>,
    next_seq: u64,
}

impl<T: Task> Inner<T> {
    fn less(&self, i: usize, j: usize) -> bool {
        let (a, b) = (&self.heap[i], &self.heap[j]);
        (a.deadline, a.seq) < (b.deadline, b.seq)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.positions.insert(self.heap[i].seq, i);
        self.positions.insert(self.heap[j].seq, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(i, parent) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Returns true if the entry moved.
    fn sift_down(&mut self, mut i: usize) -> bool {
        let start = i;
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.less(right, left) {
                right
            } else {
                left
            };
            if !self.less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i > start
    }

    fn fix(&mut self, i: usize) {
        if !self.sift_down(i) {
            self.sift_up(i);
        }
    }

    fn push(&mut self, mut item: TaskItem<T>) -> TaskFuture<T::Output> {
        item.seq = self.next_seq;
        self.next_seq += 1;

        let future = item.future.clone();
        let index = self.heap.len();
        // A requeued entry must not steal the lookup from a newer
        // submission with the same id.
        self.lookup.entry(item.id.clone()).or_insert(item.seq);
        self.positions.insert(item.seq, index);
        self.heap.push(item);
        self.sift_up(index);
        future
    }

    fn pop(&mut self) -> Option<TaskItem<T>> {
        let last = self.heap.len().checked_sub(1)?;
        self.swap(0, last);
        let item = self.heap.pop()?;
        self.positions.remove(&item.seq);
        // Only drop the lookup if it points at this entry.
        if self.lookup.get(&item.id) == Some(&item.seq) {
            self.lookup.remove(&item.id);
        }
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(item)
    }

    /// Replace the value and deadline of the entry `task`'s identity maps
    /// to, keeping its future. Gives `task` back if the identity is absent.
    fn update(&mut self, task: T, when: DateTime<Utc>) -> Result<TaskFuture<T::Output>, T> {
        let Some(index) = self.index_of(&task.id()) else {
            return Err(task);
        };
        let item = &mut self.heap[index];
        item.task = Arc::new(task);
        item.deadline = when;
        let future = item.future.clone();
        self.fix(index);
        Ok(future)
    }

    fn index_of(&self, id: &T::Id) -> Option<usize> {
        let seq = self.lookup.get(id)?;
        self.positions.get(seq).copied()
    }
}

/// Whether [`TaskQueue::upsert`] updated an existing entry or added one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Upsert {
    Updated,
    Pushed,
}

/// Concurrency-safe priority queue ordered by execution time.
pub(crate) struct TaskQueue<T: Task> {
    inner: Mutex<Inner<T>>,
}

impl<T: Task> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: Vec::new(),
                lookup: HashMap::new(),
                positions: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    // Nothing panics while holding the guard, but a poisoned queue is
    // still structurally valid.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, item: TaskItem<T>) -> TaskFuture<T::Output> {
        self.lock().push(item)
    }

    pub(crate) fn pop(&self) -> Option<TaskItem<T>> {
        self.lock().pop()
    }

    /// Earliest task and its deadline, without removing it.
    pub(crate) fn peek(&self) -> Option<(Arc<T>, DateTime<Utc>)> {
        let inner = self.lock();
        inner
            .heap
            .first()
            .map(|item| (Arc::clone(&item.task), item.deadline))
    }

    /// Replace the queued value and deadline for `task`'s identity in place,
    /// or push a new entry if the identity is not queued. Both happen under
    /// one lock so two submissions of one id cannot both miss the lookup.
    pub(crate) fn upsert(&self, task: T, when: DateTime<Utc>) -> (TaskFuture<T::Output>, Upsert) {
        let mut inner = self.lock();
        match inner.update(task, when) {
            Ok(future) => (future, Upsert::Updated),
            Err(task) => (inner.push(TaskItem::new(task, when)), Upsert::Pushed),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn contains(&self, id: &T::Id) -> bool {
        self.lock().lookup.contains_key(id)
    }

    pub(crate) fn deadline_of(&self, id: &T::Id) -> Option<DateTime<Utc>> {
        let inner = self.lock();
        inner.index_of(id).map(|index| inner.heap[index].deadline)
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let inner = self.lock();
        for (index, item) in inner.heap.iter().enumerate() {
            assert_eq!(inner.positions.get(&item.seq), Some(&index));
            if index > 0 {
                let parent = (index - 1) / 2;
                assert!(!inner.less(index, parent), "heap property violated at {}", index);
            }
        }
        assert_eq!(inner.positions.len(), inner.heap.len());
        for seq in inner.lookup.values() {
            assert!(inner.positions.contains_key(seq));
        }
    }
}
