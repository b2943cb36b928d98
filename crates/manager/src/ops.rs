//! Operator and peer operations: status queries, family picks, swap-out,
//! bucket migration and successor recovery.
//!
//! ## Bucket Migration
//!
//! ```text
//!  pre-migrate ──► plan {src → dest GVG}, quota reserved, MigrateGvg per src
//!        │
//!        ▼  MigrateGvg reports (finished)
//!  plan.migrated grows
//!        │
//!  post-migrate(success) ──► complete on chain, GcBucketMigration, quota recouped
//!  post-migrate(failure) ──► pending MigrateGvg dropped, quota recouped
//! ```

use std::collections::BTreeSet;

use spnode_common::{
    BucketMigrationProgress, CompleteMigrateBucketRequest, GcBucketMigrationPayload, GcRange,
    GlobalVirtualGroup, MigrateGvgPayload, QueueError, RecoverPiecePayload, RedundancyType, Task,
    TaskKey, TaskPayload, TaskType, UploadState,
};
use spnode_storage::{ec_piece_size, segment_count, segment_size};
use spnode_vgmgr::VgmError;
use tracing::{info, warn};

use crate::api::{
    error_description, PostMigrateBucketRequest, PreMigrateBucketRequest, RecoverProcess,
    RecoverProcessView, RecoverRequest, SwapOutRequest, TaskProgress, TasksStats,
    DESC_IN_PROGRESS, DESC_SEALED,
};
use crate::error::{ManagerError, Result};
use crate::manager::Manager;
use crate::side_effect::SideEffect;

/// Objects listed per `trigger_recover_for_successor_sp` call.
pub const RECOVER_OBJECT_BATCH: usize = 10_000;

pub const MIGRATION_MIGRATING: &str = "migrating";
pub const MIGRATION_COMPLETED: &str = "completed";
pub const MIGRATION_CANCELED: &str = "canceled";
pub const MIGRATION_FAILED: &str = "failed";

#[derive(Debug, Clone)]
pub(crate) struct BucketMigrationPlan {
    bucket_name: String,
    family_id: u32,
    /// Source GVG id → destination GVG id.
    mappings: Vec<(u32, u32)>,
    migrated: BTreeSet<u32>,
    quota_bytes: u64,
    error: Option<String>,
}

impl BucketMigrationPlan {
    fn progress(&self, bucket_id: u64, state: &str) -> BucketMigrationProgress {
        BucketMigrationProgress {
            bucket_id,
            state: state.to_string(),
            migrated_gvgs: self.migrated.len() as u32,
            total_gvgs: self.mappings.len() as u32,
            migrated_bytes: 0,
            error: self.error.clone().unwrap_or_default(),
        }
    }

    fn state(&self) -> &'static str {
        if self.error.is_some() {
            MIGRATION_FAILED
        } else {
            MIGRATION_MIGRATING
        }
    }

    fn done(&self) -> bool {
        self.migrated.len() == self.mappings.len()
    }
}

impl Manager {
    // ════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ════════════════════════════════════════════════════════════════════════

    pub fn query_tasks_stats(&self) -> TasksStats {
        let migrations = self.migrations.lock();
        TasksStats {
            queues: self.queues.stats(),
            backup_tasks: self.backup_count(),
            recovery_failed: self.recovery.lock().failed.len(),
            migrating_buckets: migrations.len(),
            migration_quota_reserved: migrations.values().map(|p| p.quota_bytes).sum(),
        }
    }

    /// Upload pipeline status of one object. Live tasks win over the stored
    /// progress record, which may lag behind.
    pub async fn query_task_progress(&self, object_id: u64) -> Result<TaskProgress> {
        let live = self.queues.find_by_object(
            &[
                TaskType::Upload,
                TaskType::ResumableUpload,
                TaskType::ReplicatePiece,
                TaskType::SealObject,
            ],
            object_id,
        );
        let stored = self
            .metadata
            .get_upload_progress(object_id)
            .await
            .map_err(ManagerError::Metadata)?;

        if let Some(task) = live {
            let state = match task.task_type() {
                TaskType::ReplicatePiece => UploadState::Replicating,
                TaskType::SealObject => UploadState::Sealing,
                _ => UploadState::Uploading,
            };
            let description = match task.error() {
                Some(e) => error_description(&e.message),
                None => DESC_IN_PROGRESS.to_string(),
            };
            return Ok(TaskProgress {
                object_id,
                state,
                task_key: Some(task.key.clone()),
                retry: task.meta.retry,
                max_retry: task.meta.max_retry,
                description,
            });
        }

        let progress =
            stored.ok_or_else(|| ManagerError::NotFound(format!("object {}", object_id)))?;
        let description = if progress.state.is_failed() {
            progress.error_description.clone()
        } else if progress.state == UploadState::Sealed {
            DESC_SEALED.to_string()
        } else {
            DESC_IN_PROGRESS.to_string()
        };
        Ok(TaskProgress {
            object_id,
            state: progress.state,
            task_key: None,
            retry: 0,
            max_retry: 0,
            description,
        })
    }

    // ════════════════════════════════════════════════════════════════════════
    // PLACEMENT
    // ════════════════════════════════════════════════════════════════════════

    /// Family a new bucket should bind to. Opens a new family when none of
    /// ours has room, then retries once.
    pub async fn pick_virtual_group_family(&self) -> Result<u32> {
        let picked = self.vgm.pick_virtual_group_family(&|_| true);
        match picked {
            Ok(f) => Ok(f.id),
            Err(VgmError::FailedPickVgf) => {
                info!("no usable family, creating a gvg in a new one");
                self.vgm
                    .create_global_virtual_group(0, self.sp_policy.as_ref())
                    .await?;
                Ok(self.vgm.pick_virtual_group_family(&|_| true)?.id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queues one `MigrateGvg` per GVG of ours in which `sp_id` is a
    /// secondary, moving its redundancy index to a successor.
    pub fn notify_migrate_swap_out(&self, req: &SwapOutRequest) -> Result<Vec<TaskKey>> {
        if req.sp_id == self.vgm.self_sp_id() {
            return Err(ManagerError::InvalidRequest(
                "cannot swap out the primary itself".to_string(),
            ));
        }
        let snap = self.vgm.snapshot();
        let mut planned = Vec::new();
        for gvg_id in snap.gvgs_with_secondary(req.sp_id) {
            let Some(gvg) = snap.gvg(gvg_id) else {
                continue;
            };
            let Some(idx) = gvg.redundancy_index_of(req.sp_id) else {
                continue;
            };
            let dest_sp_id = match req.successor_sp_id {
                Some(id) => id,
                None => {
                    self.vgm
                        .pick_dest_sp(&|c| c.id != req.sp_id && !gvg.contains_secondary(c.id))?
                        .id
                }
            };
            planned.push((gvg.id, idx as i32, dest_sp_id));
        }

        let mut keys = Vec::new();
        for (gvg_id, idx, dest_sp_id) in planned {
            let task = Task::new(
                TaskKey::migrate_gvg(gvg_id, 0, idx),
                TaskPayload::MigrateGvg(MigrateGvgPayload {
                    src_gvg_id: gvg_id,
                    dest_gvg_id: gvg_id,
                    dest_sp_id,
                    bucket_id: 0,
                    redundancy_idx: idx,
                    last_migrated_object_id: 0,
                    finished: false,
                }),
                self.clock.now(),
            );
            if let Some(key) = self.push_generated(task)? {
                info!(gvg_id, from_sp = req.sp_id, dest_sp_id, "swap-out migration queued");
                keys.push(key);
            }
        }
        Ok(keys)
    }

    // ════════════════════════════════════════════════════════════════════════
    // BUCKET MIGRATION
    // ════════════════════════════════════════════════════════════════════════

    pub async fn notify_pre_migrate_bucket_and_deduct_quota(
        &self,
        req: &PreMigrateBucketRequest,
    ) -> Result<BucketMigrationProgress> {
        if req.src_gvg_ids.is_empty() {
            return Err(ManagerError::InvalidRequest(
                "bucket migration without source gvgs".to_string(),
            ));
        }
        if self.migrations.lock().contains_key(&req.bucket_id) {
            return Err(ManagerError::InvalidRequest(format!(
                "bucket {} is already migrating",
                req.bucket_id
            )));
        }
        let q = self.queues.get(TaskType::MigrateGvg);
        if q.cap().saturating_sub(q.len()) < req.src_gvg_ids.len() {
            return Err(QueueError::Exceeded {
                queue: q.name().to_string(),
                capacity: q.cap(),
            }
            .into());
        }

        let src: BTreeSet<u32> = req.src_gvg_ids.iter().copied().collect();
        let first = self
            .vgm
            .pick_gvg_for_bucket_migrate(&|_| true, &|g: &GlobalVirtualGroup| !src.contains(&g.id))?;
        let mut mappings = vec![(req.src_gvg_ids[0], first.id)];
        for src_id in &req.src_gvg_ids[1..] {
            let dest = self.vgm.pick_global_virtual_group(first.family_id, &|_| false)?;
            mappings.push((*src_id, dest.id));
        }

        for (src_id, dest_id) in &mappings {
            let task = Task::new(
                TaskKey::migrate_gvg(*src_id, req.bucket_id, -1),
                TaskPayload::MigrateGvg(MigrateGvgPayload {
                    src_gvg_id: *src_id,
                    dest_gvg_id: *dest_id,
                    dest_sp_id: 0,
                    bucket_id: req.bucket_id,
                    redundancy_idx: -1,
                    last_migrated_object_id: 0,
                    finished: false,
                }),
                self.clock.now(),
            );
            self.push_generated(task)?;
        }

        let plan = BucketMigrationPlan {
            bucket_name: req.bucket_name.clone(),
            family_id: first.family_id,
            mappings,
            migrated: BTreeSet::new(),
            quota_bytes: req.quota_bytes,
            error: None,
        };
        let progress = plan.progress(req.bucket_id, MIGRATION_MIGRATING);
        self.migrations.lock().insert(req.bucket_id, plan);
        info!(
            bucket_id = req.bucket_id,
            family_id = first.family_id,
            gvgs = progress.total_gvgs,
            quota_bytes = req.quota_bytes,
            "bucket migration planned"
        );
        self.side_effects
            .submit(SideEffect::SetBucketMigrationProgress(progress.clone()))
            .await;
        Ok(progress)
    }

    pub async fn notify_post_migrate_bucket_and_recoup_quota(
        &self,
        req: &PostMigrateBucketRequest,
    ) -> Result<BucketMigrationProgress> {
        let plan = self
            .migrations
            .lock()
            .get(&req.bucket_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotFound(format!("migration of bucket {}", req.bucket_id)))?;

        let progress = if req.success {
            if !plan.done() || plan.error.is_some() {
                return Err(ManagerError::InvalidRequest(format!(
                    "bucket {}: {} of {} gvgs migrated",
                    req.bucket_id,
                    plan.migrated.len(),
                    plan.mappings.len()
                )));
            }
            self.signer
                .complete_migrate_bucket(CompleteMigrateBucketRequest {
                    bucket_id: req.bucket_id,
                    bucket_name: plan.bucket_name.clone(),
                    gvg_family_id: plan.family_id,
                    gvg_mappings: plan.mappings.clone(),
                })
                .await
                .map_err(ManagerError::Chain)?;

            let total = plan.mappings.len() as u64;
            let gc = Task::new(
                TaskKey::gc_bucket_migration(req.bucket_id),
                TaskPayload::GcBucketMigration(GcBucketMigrationPayload {
                    bucket_id: req.bucket_id,
                    range: GcRange::new(0, total),
                }),
                self.clock.now(),
            );
            if let Err(e) = self.push_generated(gc) {
                warn!(bucket_id = req.bucket_id, error = %e, "bucket migration gc not queued");
            }
            plan.progress(req.bucket_id, MIGRATION_COMPLETED)
        } else {
            let bucket_id = req.bucket_id;
            let dropped = self.queues.get(TaskType::MigrateGvg).remove_by_filter(|t| {
                matches!(&t.payload, TaskPayload::MigrateGvg(p) if p.bucket_id == bucket_id)
            });
            for task in &dropped {
                self.put_event(task, spnode_common::EventOutcome::Canceled, None)
                    .await;
            }
            plan.progress(req.bucket_id, MIGRATION_CANCELED)
        };

        self.migrations.lock().remove(&req.bucket_id);
        info!(
            bucket_id = req.bucket_id,
            state = %progress.state,
            quota_bytes = plan.quota_bytes,
            "bucket migration settled, quota recouped"
        );
        self.side_effects
            .submit(SideEffect::SetBucketMigrationProgress(progress.clone()))
            .await;
        Ok(progress)
    }

    pub async fn query_bucket_migration_progress(
        &self,
        bucket_id: u64,
    ) -> Result<BucketMigrationProgress> {
        let live = self
            .migrations
            .lock()
            .get(&bucket_id)
            .map(|p| p.progress(bucket_id, p.state()));
        if let Some(progress) = live {
            return Ok(progress);
        }
        self.metadata
            .get_bucket_migration_progress(bucket_id)
            .await
            .map_err(ManagerError::Metadata)?
            .ok_or_else(|| ManagerError::NotFound(format!("migration of bucket {}", bucket_id)))
    }

    pub(crate) async fn record_gvg_migrated(&self, bucket_id: u64, src_gvg_id: u32) {
        let progress = {
            let mut migrations = self.migrations.lock();
            let Some(plan) = migrations.get_mut(&bucket_id) else {
                return;
            };
            plan.migrated.insert(src_gvg_id);
            plan.progress(bucket_id, plan.state())
        };
        self.side_effects
            .submit(SideEffect::SetBucketMigrationProgress(progress))
            .await;
    }

    pub(crate) async fn record_migration_failure(&self, bucket_id: u64, description: &str) {
        let progress = {
            let mut migrations = self.migrations.lock();
            let Some(plan) = migrations.get_mut(&bucket_id) else {
                return;
            };
            plan.error = Some(description.to_string());
            plan.progress(bucket_id, MIGRATION_FAILED)
        };
        self.side_effects
            .submit(SideEffect::SetBucketMigrationProgress(progress))
            .await;
    }

    // ════════════════════════════════════════════════════════════════════════
    // RECOVERY
    // ════════════════════════════════════════════════════════════════════════

    /// Queues one `RecoverPiece` per segment of every object stored in
    /// `gvg_id`, for the redundancy index this SP is taking over.
    pub async fn trigger_recover_for_successor_sp(
        &self,
        req: &RecoverRequest,
    ) -> Result<RecoverProcess> {
        if !self.queues.get(TaskType::RecoverPiece).is_empty() {
            return Err(ManagerError::InvalidRequest(
                "a recovery is already running".to_string(),
            ));
        }
        let objects = self
            .metadata
            .list_objects_by_gvg(req.gvg_id, RECOVER_OBJECT_BATCH)
            .await
            .map_err(ManagerError::Metadata)?;
        let params = self.vgm.snapshot().storage_params.clone();

        let mut total = 0u64;
        'objects: for object in objects {
            let segments = segment_count(object.payload_size, params.max_segment_size);
            for segment_idx in 0..segments {
                let seg_size = segment_size(object.payload_size, params.max_segment_size, segment_idx);
                let piece_size = match (req.redundancy_idx >= 0, object.redundancy) {
                    (true, RedundancyType::ErasureCode) => {
                        ec_piece_size(seg_size, params.redundant_data_chunk_num)
                    }
                    _ => seg_size,
                };
                let task = Task::new(
                    TaskKey::recover_piece(&object, segment_idx, req.redundancy_idx),
                    TaskPayload::RecoverPiece(RecoverPiecePayload {
                        object: object.clone(),
                        params: params.clone(),
                        segment_idx,
                        redundancy_idx: req.redundancy_idx,
                        piece_size,
                        recovered: false,
                    }),
                    self.clock.now(),
                );
                match self.push_generated(task) {
                    Ok(Some(_)) => total += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(gvg_id = req.gvg_id, error = %e, "recover queue full, batch truncated");
                        break 'objects;
                    }
                }
            }
        }

        let process = RecoverProcess {
            gvg_id: req.gvg_id,
            redundancy_idx: req.redundancy_idx,
            total,
            succeeded: 0,
            failed: 0,
        };
        self.recovery.lock().process = Some(process.clone());
        info!(gvg_id = req.gvg_id, redundancy_idx = req.redundancy_idx, total, "recovery triggered");
        Ok(process)
    }

    pub fn query_recover_process(&self) -> RecoverProcessView {
        let recovery = self.recovery.lock();
        RecoverProcessView {
            process: recovery.process.clone(),
            pending: self.queues.get(TaskType::RecoverPiece).len(),
            failed: recovery.failed.clone(),
        }
    }

    /// Clears the recovery-failed list. Returns how many entries it held.
    pub fn reset_recovery_failed_list(&self) -> usize {
        let mut recovery = self.recovery.lock();
        let cleared = recovery.failed.len();
        recovery.failed.clear();
        if let Some(process) = recovery.process.as_mut() {
            process.failed = 0;
        }
        info!(cleared, "recovery failed list reset");
        cleared
    }

    /// Applies policy and queues a manager-generated task. `Ok(None)` if an
    /// identical key is already queued.
    fn push_generated(&self, mut task: Task) -> Result<Option<TaskKey>> {
        self.policy.apply(&mut task);
        let key = task.key.clone();
        match self.queues.of(&task).push(task) {
            Ok(()) => {
                self.wake_dispatchers();
                Ok(Some(key))
            }
            Err(QueueError::Repeated(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{ask, gvg, harness};
    use spnode_common::task::fixtures;
    use spnode_common::{MetadataStore, SignerCall};

    fn finish(task: &mut Task) {
        if let TaskPayload::MigrateGvg(p) = &mut task.payload {
            p.finished = true;
        }
    }

    // ──── PROGRESS ────

    #[tokio::test]
    async fn test_progress_of_live_and_finished_objects() {
        let h = harness().await;
        let upload = fixtures::upload_task(5, 1024, 0);
        h.manager.begin_upload(upload.clone()).await.unwrap();
        let p = h.manager.query_task_progress(5).await.unwrap();
        assert_eq!(p.state, UploadState::Uploading);
        assert_eq!(p.description, DESC_IN_PROGRESS);

        let mut failed = upload.clone();
        failed.set_error(1, "disk full");
        h.manager.handle_report(failed).await.unwrap();
        h.manager.flush_side_effects().await;
        let p = h.manager.query_task_progress(5).await.unwrap();
        assert_eq!(p.state, UploadState::UploadFailed);
        assert_eq!(p.description, "error: disk full");

        assert!(matches!(
            h.manager.query_task_progress(6).await,
            Err(ManagerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_progress_shows_error_of_retrying_task() {
        let h = harness().await;
        let upload = fixtures::upload_task(5, 1024, 0);
        h.manager.begin_upload(upload.clone()).await.unwrap();
        h.manager.handle_report(upload).await.unwrap();
        let mut rep = h.manager.try_dispatch(&ask("exec-1")).unwrap();
        rep.set_error(2, "timeout talking to sp 3");
        h.manager.handle_report(rep).await.unwrap();

        let p = h.manager.query_task_progress(5).await.unwrap();
        assert_eq!(p.state, UploadState::Replicating);
        assert_eq!(p.description, "error: timeout talking to sp 3");
        assert_eq!(p.retry, 1);
    }

    // ──── PLACEMENT ────

    #[tokio::test]
    async fn test_pick_family_creates_when_full() {
        let h = harness().await;
        assert_eq!(h.manager.pick_virtual_group_family().await.unwrap(), 1);

        h.chain.set_gvg_usage(10, 1_000, 1_000);
        h.manager.vgm.force_refresh().await.unwrap();
        let vgf = h.manager.pick_virtual_group_family().await.unwrap();
        assert_ne!(vgf, 1);
        assert!(h
            .chain
            .signer_calls()
            .iter()
            .any(|c| matches!(c, SignerCall::CreateGvg { request, .. } if request.family_id == 0)));
    }

    #[tokio::test]
    async fn test_swap_out_queues_one_task_per_gvg() {
        let h = harness().await;
        h.chain.add_gvg(gvg(11, 1, vec![3, 4, 5, 6, 7, 8]));
        h.manager.vgm.force_refresh().await.unwrap();

        let keys = h
            .manager
            .notify_migrate_swap_out(&SwapOutRequest {
                sp_id: 3,
                successor_sp_id: None,
            })
            .unwrap();
        assert_eq!(keys.len(), 2);
        for task in h.manager.queues.get(TaskType::MigrateGvg).scan() {
            let TaskPayload::MigrateGvg(p) = &task.payload else {
                panic!("expected migrate payload");
            };
            let g = h.manager.vgm.snapshot().gvg(p.src_gvg_id).cloned().unwrap();
            assert_eq!(g.secondary_sp_ids[p.redundancy_idx as usize], 3);
            assert!(!g.contains_secondary(p.dest_sp_id));
            assert_ne!(p.dest_sp_id, 3);
        }

        // Repeated notification is idempotent.
        let again = h
            .manager
            .notify_migrate_swap_out(&SwapOutRequest {
                sp_id: 3,
                successor_sp_id: None,
            })
            .unwrap();
        assert!(again.is_empty());
    }

    // ──── BUCKET MIGRATION ────

    #[tokio::test]
    async fn test_bucket_migration_lifecycle() {
        let h = harness().await;
        let req = PreMigrateBucketRequest {
            bucket_id: 42,
            bucket_name: "b".into(),
            src_gvg_ids: vec![100, 101],
            quota_bytes: 1 << 20,
        };
        let progress = h
            .manager
            .notify_pre_migrate_bucket_and_deduct_quota(&req)
            .await
            .unwrap();
        assert_eq!(progress.total_gvgs, 2);
        assert_eq!(h.manager.query_tasks_stats().migration_quota_reserved, 1 << 20);
        assert!(h
            .manager
            .notify_pre_migrate_bucket_and_deduct_quota(&req)
            .await
            .is_err());

        let early = h
            .manager
            .notify_post_migrate_bucket_and_recoup_quota(&PostMigrateBucketRequest {
                bucket_id: 42,
                success: true,
            })
            .await;
        assert!(matches!(early, Err(ManagerError::InvalidRequest(_))));

        for _ in 0..2 {
            let mut t = h.manager.try_dispatch(&ask("exec-1")).unwrap();
            finish(&mut t);
            h.manager.handle_report(t).await.unwrap();
        }
        assert_eq!(
            h.manager.query_bucket_migration_progress(42).await.unwrap().migrated_gvgs,
            2
        );

        let done = h
            .manager
            .notify_post_migrate_bucket_and_recoup_quota(&PostMigrateBucketRequest {
                bucket_id: 42,
                success: true,
            })
            .await
            .unwrap();
        assert_eq!(done.state, MIGRATION_COMPLETED);
        assert_eq!(h.manager.query_tasks_stats().migration_quota_reserved, 0);
        assert!(h
            .manager
            .queues
            .find(&TaskKey::gc_bucket_migration(42))
            .is_some());
        assert!(h.chain.signer_calls().iter().any(|c| matches!(
            c,
            SignerCall::CompleteMigrateBucket(r) if r.gvg_mappings == vec![(100, 10), (101, 10)]
        )));

        h.manager.flush_side_effects().await;
        let stored = h.manager.query_bucket_migration_progress(42).await.unwrap();
        assert_eq!(stored.state, MIGRATION_COMPLETED);
    }

    #[tokio::test]
    async fn test_failed_bucket_migration_drops_pending_tasks() {
        let h = harness().await;
        h.manager
            .notify_pre_migrate_bucket_and_deduct_quota(&PreMigrateBucketRequest {
                bucket_id: 42,
                bucket_name: "b".into(),
                src_gvg_ids: vec![100],
                quota_bytes: 0,
            })
            .await
            .unwrap();
        let p = h
            .manager
            .notify_post_migrate_bucket_and_recoup_quota(&PostMigrateBucketRequest {
                bucket_id: 42,
                success: false,
            })
            .await
            .unwrap();
        assert_eq!(p.state, MIGRATION_CANCELED);
        assert!(h.manager.queues.get(TaskType::MigrateGvg).is_empty());
    }

    // ──── RECOVERY ────

    #[tokio::test]
    async fn test_recovery_queues_pieces_and_tracks_failures() {
        let h = harness().await;
        let seg = spnode_common::StorageParams::default().max_segment_size;
        h.store.add_object_to_gvg(20, fixtures::object(1, seg * 2 + 1));
        h.store.add_object_to_gvg(20, fixtures::object(2, 10));

        let process = h
            .manager
            .trigger_recover_for_successor_sp(&RecoverRequest {
                gvg_id: 20,
                redundancy_idx: 2,
            })
            .await
            .unwrap();
        assert_eq!(process.total, 4);
        assert!(h
            .manager
            .trigger_recover_for_successor_sp(&RecoverRequest {
                gvg_id: 20,
                redundancy_idx: 2,
            })
            .await
            .is_err());

        let mut ok = h.manager.try_dispatch(&ask("exec-1")).unwrap();
        if let TaskPayload::RecoverPiece(p) = &mut ok.payload {
            assert_eq!(p.redundancy_idx, 2);
            p.recovered = true;
        }
        h.manager.handle_report(ok).await.unwrap();

        let victim = h.manager.queues.get(TaskType::RecoverPiece).scan()[0].clone();
        h.manager.fail_terminal(victim, "exceeded retries, abandoned".into()).await;

        let view = h.manager.query_recover_process();
        let process = view.process.unwrap();
        assert_eq!(process.succeeded, 1);
        assert_eq!(process.failed, 1);
        assert_eq!(view.pending, 2);
        assert_eq!(view.failed.len(), 1);

        assert_eq!(h.manager.reset_recovery_failed_list(), 1);
        assert!(h.manager.query_recover_process().failed.is_empty());
        assert_eq!(h.manager.query_tasks_stats().recovery_failed, 0);
        assert!(h.store.get_upload_progress(1).await.unwrap().is_none());
    }
}
