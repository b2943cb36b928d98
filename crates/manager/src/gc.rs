//! GC task generation.
//!
//! | Kind | Range | Bound |
//! |------|-------|-------|
//! | GcObject | block heights | `height - gc_object_safe_distance` |
//! | GcZombiePiece | object ids | restarts after `gc_sweep_span` ids |
//! | GcMeta | record ids | restarts after `gc_sweep_span` ids |
//!
//! Cursors are loaded lazily from the stored checkpoint and then kept in
//! memory. A generator that cannot read its checkpoint skips the tick.
//! Nothing is generated while the kind's queue is full.

use spnode_common::{
    GcMetaPayload, GcObjectPayload, GcRange, GcZombiePiecePayload, QueueError, Task, TaskKey,
    TaskPayload, TaskType,
};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, Result};
use crate::manager::Manager;
use crate::metrics::ManagerMetrics;

#[derive(Debug, Default)]
pub(crate) struct GcCursors {
    object_block: Option<u64>,
    zombie_id: Option<u64>,
    meta_id: Option<u64>,
}

impl GcCursors {
    fn slot(&mut self, task_type: TaskType) -> Option<&mut Option<u64>> {
        match task_type {
            TaskType::GcObject => Some(&mut self.object_block),
            TaskType::GcZombiePiece => Some(&mut self.zombie_id),
            TaskType::GcMeta => Some(&mut self.meta_id),
            _ => None,
        }
    }
}

impl Manager {
    pub async fn generate_gc_object_task(&self) -> Result<Option<TaskKey>> {
        if !self.config.enable_gc_object || self.queue_full(TaskType::GcObject) {
            return Ok(None);
        }
        let height = self
            .topology
            .current_block_height()
            .await
            .map_err(ManagerError::Chain)?;
        let Some(start) = self.gc_cursor(TaskType::GcObject).await else {
            return Ok(None);
        };
        let safe_end = height.saturating_sub(self.config.gc_object_safe_distance);
        let end = start
            .saturating_add(self.config.gc_object_block_interval)
            .min(safe_end);
        if end <= start {
            debug!(start, height, "no blocks past the safe distance yet");
            return Ok(None);
        }
        let task = Task::new(
            TaskKey::gc_object(start, end),
            TaskPayload::GcObject(GcObjectPayload {
                range: GcRange::new(start, end),
                last_deleted_object_id: 0,
            }),
            self.clock.now(),
        );
        Ok(self.push_gc_task(task, end))
    }

    pub async fn generate_gc_zombie_task(&self) -> Result<Option<TaskKey>> {
        if !self.config.enable_gc_zombie || self.queue_full(TaskType::GcZombiePiece) {
            return Ok(None);
        }
        let Some((start, end)) = self.next_id_range(TaskType::GcZombiePiece).await else {
            return Ok(None);
        };
        let task = Task::new(
            TaskKey::gc_zombie_piece(start, end),
            TaskPayload::GcZombiePiece(GcZombiePiecePayload {
                range: GcRange::new(start, end),
            }),
            self.clock.now(),
        );
        Ok(self.push_gc_task(task, self.wrap_sweep(end)))
    }

    pub async fn generate_gc_meta_task(&self) -> Result<Option<TaskKey>> {
        if !self.config.enable_gc_meta || self.queue_full(TaskType::GcMeta) {
            return Ok(None);
        }
        let Some((start, end)) = self.next_id_range(TaskType::GcMeta).await else {
            return Ok(None);
        };
        let task = Task::new(
            TaskKey::gc_meta(start, end),
            TaskPayload::GcMeta(GcMetaPayload {
                range: GcRange::new(start, end),
            }),
            self.clock.now(),
        );
        Ok(self.push_gc_task(task, self.wrap_sweep(end)))
    }

    fn queue_full(&self, task_type: TaskType) -> bool {
        let q = self.queues.get(task_type);
        q.len() >= q.cap()
    }

    fn wrap_sweep(&self, next: u64) -> u64 {
        if next >= self.config.gc_sweep_span {
            0
        } else {
            next
        }
    }

    async fn next_id_range(&self, task_type: TaskType) -> Option<(u64, u64)> {
        let start = self.gc_cursor(task_type).await?;
        Some((start, start.saturating_add(self.config.gc_batch_size)))
    }

    /// In-memory cursor of `task_type`, loaded from its checkpoint on first use.
    async fn gc_cursor(&self, task_type: TaskType) -> Option<u64> {
        if let Some(cursor) = self.gc_cursors.lock().slot(task_type).and_then(|c| *c) {
            return Some(cursor);
        }
        let loaded = match self.metadata.get_gc_checkpoint(task_type).await {
            Ok(cp) => cp.map(|c| c.current).unwrap_or(0),
            Err(e) => {
                warn!(%task_type, error = %e, "gc checkpoint unreadable, skipping tick");
                return None;
            }
        };
        let mut cursors = self.gc_cursors.lock();
        let slot = cursors.slot(task_type)?;
        Some(*slot.get_or_insert(loaded))
    }

    fn push_gc_task(&self, mut task: Task, next_cursor: u64) -> Option<TaskKey> {
        let task_type = task.task_type();
        self.policy.apply(&mut task);
        let key = task.key.clone();
        let generated = match self.queues.of(&task).push(task) {
            Ok(()) => true,
            Err(QueueError::Repeated(_)) => false,
            Err(e) => {
                debug!(%task_type, error = %e, "gc task not generated");
                return None;
            }
        };
        if let Some(slot) = self.gc_cursors.lock().slot(task_type) {
            *slot = Some(next_cursor);
        }
        if !generated {
            return None;
        }
        ManagerMetrics::inc(&self.metrics.gc_tasks_generated);
        info!(task_key = %key, "gc task generated");
        self.wake_dispatchers();
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{harness, harness_with};
    use spnode_common::{GcCheckpoint, ManagerConfig, MetadataStore};

    #[tokio::test]
    async fn test_gc_object_respects_safe_distance() {
        let h = harness().await;
        h.chain.set_height(500);
        assert_eq!(h.manager.generate_gc_object_task().await.unwrap(), None);

        h.chain.set_height(2_500);
        let key = h.manager.generate_gc_object_task().await.unwrap().unwrap();
        assert_eq!(key, TaskKey::gc_object(0, 1_000));
        let key = h.manager.generate_gc_object_task().await.unwrap().unwrap();
        assert_eq!(key, TaskKey::gc_object(1_000, 1_500));
        assert_eq!(h.manager.generate_gc_object_task().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_gc_cursor_resumes_from_checkpoint() {
        let h = harness().await;
        h.store
            .set_gc_checkpoint(GcCheckpoint {
                task_type: TaskType::GcMeta,
                start: 0,
                end: 1_000,
                current: 700,
            })
            .await
            .unwrap();
        let key = h.manager.generate_gc_meta_task().await.unwrap().unwrap();
        assert_eq!(key, TaskKey::gc_meta(700, 1_700));
    }

    #[tokio::test]
    async fn test_gc_stops_at_queue_capacity() {
        let h = harness().await;
        let cap = h.manager.config.gc_zombie_queue_cap;
        for _ in 0..cap {
            assert!(h.manager.generate_gc_zombie_task().await.unwrap().is_some());
        }
        assert_eq!(h.manager.generate_gc_zombie_task().await.unwrap(), None);
        assert_eq!(h.manager.queues.get(TaskType::GcZombiePiece).len(), cap);
    }

    #[tokio::test]
    async fn test_disabled_generator_is_idle() {
        let h = harness_with(ManagerConfig {
            enable_gc_meta: false,
            ..ManagerConfig::default()
        })
        .await;
        assert_eq!(h.manager.generate_gc_meta_task().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sweep_wraps_to_zero() {
        let h = harness_with(ManagerConfig {
            gc_batch_size: 600,
            gc_sweep_span: 1_000,
            ..ManagerConfig::default()
        })
        .await;
        let first = h.manager.generate_gc_meta_task().await.unwrap().unwrap();
        let second = h.manager.generate_gc_meta_task().await.unwrap().unwrap();
        let third = h.manager.generate_gc_meta_task().await.unwrap();
        assert_eq!(first, TaskKey::gc_meta(0, 600));
        assert_eq!(second, TaskKey::gc_meta(600, 1_200));
        // [0, 600) is still queued.
        assert_eq!(third, None);
    }
}
