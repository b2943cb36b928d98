//! # Task Queue
//!
//! Bounded, key-deduplicated, priority-ordered container for one task kind.
//!
//! ## Ordering
//!
//! Scans and `top_by_filter` walk tasks by descending priority, then by
//! ascending `create_time`, then by key. The order index is a `BTreeSet`
//! kept in lock-step with the key map under the same write lock.
//!
//! ## Capacity
//!
//! When a push would exceed capacity the queue first retires every task
//! matching its retire strategy (default: retries exhausted and timed out).
//! Retired tasks are parked until the owner drains them with
//! `take_retired()`, so no task leaves the system without a terminal record.
//! If the queue is still full the push fails with `QueueError::Exceeded`.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{Task, TaskKey};
use crate::clock::{Clock, SystemClock};
use crate::error::QueueError;

/// Decides whether a queued task may be evicted to make room.
pub type RetireStrategy = Arc<dyn Fn(&Task, u64) -> bool + Send + Sync>;

/// Retires tasks whose retries are exhausted and whose deadline passed.
pub fn default_retire_strategy() -> RetireStrategy {
    Arc::new(|task: &Task, now: u64| task.exceed_retry() && task.exceed_timeout(now))
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    priority: Reverse<i32>,
    create_time: u64,
    key: TaskKey,
}

impl OrderKey {
    fn of(task: &Task) -> Self {
        Self {
            priority: Reverse(task.meta.priority),
            create_time: task.meta.create_time,
            key: task.key.clone(),
        }
    }
}

#[derive(Default)]
struct Inner {
    tasks: HashMap<TaskKey, Task>,
    order: BTreeSet<OrderKey>,
    retired: Vec<Task>,
}

impl Inner {
    fn insert(&mut self, task: Task) {
        self.order.insert(OrderKey::of(&task));
        self.tasks.insert(task.key.clone(), task);
    }

    fn remove(&mut self, key: &TaskKey) -> Option<Task> {
        let task = self.tasks.remove(key)?;
        self.order.remove(&OrderKey::of(&task));
        Some(task)
    }

    fn ordered(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|o| self.tasks.get(&o.key))
    }
}

pub struct TaskQueue {
    name: String,
    capacity: usize,
    clock: Arc<dyn Clock>,
    retire: RetireStrategy,
    inner: RwLock<Inner>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            clock: Arc::new(SystemClock),
            retire: default_retire_strategy(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retire_strategy(mut self, retire: RetireStrategy) -> Self {
        self.retire = retire;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cap(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.read().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, key: &TaskKey) -> bool {
        self.inner.read().tasks.contains_key(key)
    }

    pub fn get(&self, key: &TaskKey) -> Option<Task> {
        self.inner.read().tasks.get(key).cloned()
    }

    /// Adds a new task. Never replaces an existing one.
    pub fn push(&self, task: Task) -> Result<(), QueueError> {
        let mut inner = self.inner.write();
        if inner.tasks.contains_key(&task.key) {
            return Err(QueueError::Repeated(task.key));
        }
        if inner.tasks.len() >= self.capacity {
            let now = self.clock.now();
            let victims: Vec<TaskKey> = inner
                .tasks
                .values()
                .filter(|t| (self.retire)(*t, now))
                .map(|t| t.key.clone())
                .collect();
            for key in victims {
                if let Some(old) = inner.remove(&key) {
                    debug!(queue = %self.name, task_key = %key, "retired task to make room");
                    inner.retired.push(old);
                }
            }
            if inner.tasks.len() >= self.capacity {
                warn!(queue = %self.name, capacity = self.capacity, "task queue exceeded");
                return Err(QueueError::Exceeded {
                    queue: self.name.clone(),
                    capacity: self.capacity,
                });
            }
        }
        inner.insert(task);
        Ok(())
    }

    pub fn pop_by_key(&self, key: &TaskKey) -> Option<Task> {
        self.inner.write().remove(key)
    }

    /// Replaces an existing task in place, re-indexing it. Returns `false`
    /// and drops `task` if its key is not queued.
    pub fn update(&self, task: Task) -> bool {
        let mut inner = self.inner.write();
        if inner.remove(&task.key).is_none() {
            return false;
        }
        inner.insert(task);
        true
    }

    /// All tasks in dispatch order.
    pub fn scan(&self) -> Vec<Task> {
        self.inner.read().ordered().cloned().collect()
    }

    pub fn scan_with_limit(&self, limit: usize) -> Vec<Task> {
        self.inner.read().ordered().take(limit).cloned().collect()
    }

    /// First task in dispatch order matching `filter`. Does not remove it.
    pub fn top_by_filter<F>(&self, filter: F) -> Option<Task>
    where
        F: Fn(&Task) -> bool,
    {
        self.inner.read().ordered().find(|t| filter(*t)).cloned()
    }

    /// Atomically finds the first task matching `filter`, applies `mutate`
    /// and re-registers it. Returns the updated copy.
    ///
    /// Two concurrent callers never claim the same task unless `mutate`
    /// leaves it matching `filter`.
    pub fn claim_top<F, M>(&self, filter: F, mutate: M) -> Option<Task>
    where
        F: Fn(&Task) -> bool,
        M: FnOnce(&mut Task),
    {
        let mut inner = self.inner.write();
        let key = inner.ordered().find(|t| filter(*t)).map(|t| t.key.clone())?;
        let mut task = inner.remove(&key)?;
        mutate(&mut task);
        inner.insert(task.clone());
        Some(task)
    }

    /// Number of queued tasks matching `filter`.
    pub fn count_by_filter<F>(&self, filter: F) -> usize
    where
        F: Fn(&Task) -> bool,
    {
        self.inner.read().tasks.values().filter(|t| filter(*t)).count()
    }

    /// Removes and returns every task matching `filter`.
    pub fn remove_by_filter<F>(&self, filter: F) -> Vec<Task>
    where
        F: Fn(&Task) -> bool,
    {
        let mut inner = self.inner.write();
        let keys: Vec<TaskKey> = inner
            .tasks
            .values()
            .filter(|t| filter(*t))
            .map(|t| t.key.clone())
            .collect();
        keys.iter().filter_map(|k| inner.remove(k)).collect()
    }

    /// Drains tasks evicted by the retire strategy since the last call.
    pub fn take_retired(&self) -> Vec<Task> {
        std::mem::take(&mut self.inner.write().retired)
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
