//! One `TaskQueue` per task type.
//!
//! The set is fixed at construction, so lookups never fail for a valid
//! `TaskType`. Tasks are routed to their queue by `Task::task_type()`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use spnode_common::{Clock, ManagerConfig, Task, TaskKey, TaskQueue, TaskType};

/// Types handed to executors through `dispatch_task`. Upload, resumable
/// upload, download and challenge tasks are run by the front end that
/// began them and only reported back.
pub const DISPATCHABLE: [TaskType; 10] = [
    TaskType::ReplicatePiece,
    TaskType::SealObject,
    TaskType::ReceivePiece,
    TaskType::RecoverPiece,
    TaskType::MigrateGvg,
    TaskType::GcObject,
    TaskType::GcZombiePiece,
    TaskType::GcMeta,
    TaskType::GcStaleVersion,
    TaskType::GcBucketMigration,
];

pub fn is_dispatchable(task_type: TaskType) -> bool {
    DISPATCHABLE.contains(&task_type)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub task_type: TaskType,
    pub len: usize,
    pub cap: usize,
    pub dispatched: usize,
}

pub struct TaskQueues {
    queues: BTreeMap<TaskType, TaskQueue>,
}

impl TaskQueues {
    pub fn new(config: &ManagerConfig, clock: Arc<dyn Clock>) -> Self {
        let queues = TaskType::ALL
            .iter()
            .map(|t| {
                let q = TaskQueue::new(t.name(), config.queue_cap(*t)).with_clock(Arc::clone(&clock));
                (*t, q)
            })
            .collect();
        Self { queues }
    }

    pub fn get(&self, task_type: TaskType) -> &TaskQueue {
        // Every TaskType is inserted in `new`.
        &self.queues[&task_type]
    }

    pub fn of(&self, task: &Task) -> &TaskQueue {
        self.get(task.task_type())
    }

    /// Looks a task up by key alone.
    pub fn find(&self, key: &TaskKey) -> Option<Task> {
        key.task_type().and_then(|t| self.get(t).get(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskType, &TaskQueue)> {
        self.queues.iter().map(|(t, q)| (*t, q))
    }

    /// First queued task of `types` whose object id is `object_id`.
    pub fn find_by_object(&self, types: &[TaskType], object_id: u64) -> Option<Task> {
        types.iter().find_map(|t| {
            self.get(*t)
                .top_by_filter(|task| task.object().map(|o| o.id) == Some(object_id))
        })
    }

    pub fn stats(&self) -> Vec<QueueStats> {
        self.iter()
            .map(|(task_type, q)| QueueStats {
                task_type,
                len: q.len(),
                cap: q.cap(),
                dispatched: q.count_by_filter(|t| t.dispatched()),
            })
            .collect()
    }
}
