//! # Report Handling
//!
//! Every report enters through [`Manager::handle_report`], which matches on
//! the task type exhaustively. A report for a key that is no longer queued
//! is answered with `Canceled` and changes nothing.
//!
//! ## Upload Pipeline
//!
//! ```text
//!  Upload ──ok──► ReplicatePiece ──ok, sealed──────────────► done (Sealed)
//!                      │         ──ok, not sealed──► SealObject ──ok──► done (Sealed)
//!                      │ error at idx i                  │
//!                      ▼                                 ▼ exhausted
//!          freeze secondary i, re-pick GVG        SealFailed + reject unseal
//! ```
//!
//! Failed reports of dispatchable kinds are re-queued until the retry budget
//! is spent, then abandoned by `fail_terminal`.

use spnode_common::{
    AuditEvent, EventOutcome, GcCheckpoint, GcRange, GlobalVirtualGroup, ObjectInfo,
    RejectUnsealRequest, ReplicatePiecePayload, SealObjectPayload, Task, TaskErrorInfo, TaskKey,
    TaskPayload, TaskType, UploadState, NO_FAILED_SP,
};
use spnode_vgmgr::VgmError;
use tracing::{debug, info, warn};

use crate::api::{error_description, RecoverFailedEntry, DESC_EXCEEDED};
use crate::error::{ManagerError, Result};
use crate::manager::Manager;
use crate::metrics::ManagerMetrics;
use crate::side_effect::SideEffect;

impl Manager {
    /// Applies an executor or front-end report to the queues.
    pub async fn handle_report(&self, task: Task) -> Result<()> {
        if !self.queues.of(&task).has(&task.key) {
            ManagerMetrics::inc(&self.metrics.tasks_canceled);
            warn!(task_key = %task.key, "report for a task no longer queued");
            return Err(ManagerError::Canceled(task.key));
        }
        if task.error().is_some() {
            ManagerMetrics::inc(&self.metrics.reports_failed);
        } else {
            ManagerMetrics::inc(&self.metrics.reports_succeeded);
        }

        match task.task_type() {
            TaskType::Upload | TaskType::ResumableUpload => self.handle_upload_report(task).await,
            TaskType::ReplicatePiece => self.handle_replicate_report(task).await,
            TaskType::SealObject => self.handle_seal_report(task).await,
            TaskType::ReceivePiece => self.handle_receive_report(task).await,
            TaskType::GcObject
            | TaskType::GcZombiePiece
            | TaskType::GcMeta
            | TaskType::GcStaleVersion
            | TaskType::GcBucketMigration => self.handle_gc_report(task).await,
            TaskType::RecoverPiece => self.handle_recover_report(task).await,
            TaskType::MigrateGvg => self.handle_migrate_gvg_report(task).await,
            TaskType::Download | TaskType::Challenge => self.handle_front_end_report(task).await,
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // UPLOAD → REPLICATE
    // ════════════════════════════════════════════════════════════════════════

    async fn handle_upload_report(&self, task: Task) -> Result<()> {
        if let Some(err) = task.error() {
            // The front end restarts failed uploads with a fresh begin.
            let description = error_description(&err.message);
            self.fail_terminal(task, description).await;
            return Ok(());
        }
        if let TaskPayload::ResumableUpload(p) = &task.payload {
            if !p.completed {
                let offset = p.offset;
                let mut task = task;
                task.meta.update_time = self.clock.now();
                self.queues.of(&task).update(task.clone());
                debug!(task_key = %task.key, offset, "resumable upload progressed");
                return Ok(());
            }
        }
        self.start_replication(task).await
    }

    async fn start_replication(&self, upload: Task) -> Result<()> {
        let (object, params) = match &upload.payload {
            TaskPayload::Upload(p) => (p.object.clone(), p.params.clone()),
            TaskPayload::ResumableUpload(p) => (p.object.clone(), p.params.clone()),
            _ => {
                return Err(ManagerError::Dangling(format!(
                    "{} is not an upload",
                    upload.key
                )))
            }
        };

        let gvg = match self.pick_gvg_with_create(object.bucket_vgf_id, &|_| false).await {
            Ok(g) => g,
            Err(e) => {
                let description = error_description(&format!("failed to pick gvg: {}", e));
                self.fail_terminal_as(upload, UploadState::ReplicateFailed, description)
                    .await;
                return Err(e);
            }
        };

        let now = self.clock.now();
        let mut replicate = Task::new(
            TaskKey::replicate_piece(&object),
            TaskPayload::ReplicatePiece(ReplicatePiecePayload {
                object: object.clone(),
                params,
                gvg_id: gvg.id,
                secondary_sp_ids: gvg.secondary_sp_ids.clone(),
                secondary_endpoints: gvg.secondary_endpoints.clone(),
                secondary_signatures: Vec::new(),
                not_available_sp_idx: NO_FAILED_SP,
                sealed: false,
            }),
            now,
        );
        replicate.meta.create_time = upload.meta.create_time;
        replicate.meta.logs = upload.meta.logs.clone();
        replicate.append_log(&format!("upload done, picked gvg {}", gvg.id));
        self.policy.apply(&mut replicate);

        self.push_successor(&upload, replicate)?;
        self.set_progress(object.id, UploadState::Replicating, "").await;
        ManagerMetrics::inc(&self.metrics.replicate_tasks_created);
        info!(object_id = object.id, gvg_id = gvg.id, "replicate task created");
        Ok(())
    }

    /// Weighted GVG pick in `vgf_id`; creates one GVG in the family and
    /// retries once when the family has nothing usable.
    pub(crate) async fn pick_gvg_with_create(
        &self,
        vgf_id: u32,
        exclude: &(dyn Fn(&GlobalVirtualGroup) -> bool + Sync),
    ) -> Result<GlobalVirtualGroup> {
        let picked = self.vgm.pick_global_virtual_group(vgf_id, exclude);
        match picked {
            Ok(g) => Ok(g),
            Err(VgmError::FailedPickGvg { .. }) => {
                info!(vgf_id, "no usable gvg in family, creating one");
                self.vgm
                    .create_global_virtual_group(vgf_id, self.sp_policy.as_ref())
                    .await?;
                Ok(self.vgm.pick_global_virtual_group(vgf_id, exclude)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Enqueues `next` then drops `prev`. If `next` cannot be queued, `prev`
    /// stays so its reporter can try again.
    fn push_successor(&self, prev: &Task, next: Task) -> Result<()> {
        match self.queues.of(&next).push(next.clone()) {
            Ok(()) => {}
            Err(spnode_common::QueueError::Repeated(key)) => {
                debug!(task_key = %key, "successor already queued");
            }
            Err(e) => return Err(e.into()),
        }
        self.queues.of(prev).pop_by_key(&prev.key);
        self.wake_dispatchers();
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // REPLICATE & SEAL
    // ════════════════════════════════════════════════════════════════════════

    async fn handle_replicate_report(&self, task: Task) -> Result<()> {
        let TaskPayload::ReplicatePiece(payload) = &task.payload else {
            return Err(ManagerError::Dangling(format!("{} is not a replicate task", task.key)));
        };

        if let Some(err) = task.error().cloned() {
            let mut task = task;
            self.repick_after_secondary_failure(&mut task).await;
            return self.retry_or_abandon(task, err).await;
        }

        let object = payload.object.clone();
        if payload.sealed {
            self.queues.of(&task).pop_by_key(&task.key);
            self.finish_sealed(&task, &object).await;
            return Ok(());
        }

        let mut seal = Task::new(
            TaskKey::seal_object(&object),
            TaskPayload::SealObject(SealObjectPayload {
                object: object.clone(),
                params: payload.params.clone(),
                gvg_id: payload.gvg_id,
                secondary_sp_ids: payload.secondary_sp_ids.clone(),
                secondary_signatures: payload.secondary_signatures.clone(),
            }),
            self.clock.now(),
        );
        seal.meta.create_time = task.meta.create_time;
        seal.meta.logs = task.meta.logs.clone();
        seal.append_log("replicated, seal pending");
        self.policy.apply(&mut seal);

        self.push_successor(&task, seal)?;
        self.set_progress(object.id, UploadState::Sealing, "").await;
        ManagerMetrics::inc(&self.metrics.seal_tasks_created);
        info!(object_id = object.id, "seal task created");
        Ok(())
    }

    /// Freezes the secondary named by `not_available_sp_idx` and moves the
    /// task onto another GVG of the same family. Keeps the current GVG if
    /// no other is available.
    async fn repick_after_secondary_failure(&self, task: &mut Task) {
        let (failed_sp, vgf_id, object_id) = match &task.payload {
            TaskPayload::ReplicatePiece(p) if p.not_available_sp_idx >= 0 => {
                let sp = p.secondary_sp_ids.get(p.not_available_sp_idx as usize).copied();
                (sp, p.object.bucket_vgf_id, p.object.id)
            }
            _ => return,
        };

        let mut line = None;
        if let Some(sp_id) = failed_sp {
            let frozen = self.vgm.freeze_failed_secondary(sp_id);
            ManagerMetrics::inc(&self.metrics.sps_frozen);
            warn!(object_id, sp_id, gvgs = ?frozen, "secondary failed, frozen");

            match self
                .pick_gvg_with_create(vgf_id, &move |g: &GlobalVirtualGroup| {
                    g.contains_secondary(sp_id)
                })
                .await
            {
                Ok(gvg) => {
                    if let TaskPayload::ReplicatePiece(p) = &mut task.payload {
                        p.gvg_id = gvg.id;
                        p.secondary_sp_ids = gvg.secondary_sp_ids;
                        p.secondary_endpoints = gvg.secondary_endpoints;
                    }
                    line = Some(format!("sp {} failed, moved to gvg {}", sp_id, gvg.id));
                }
                Err(e) => {
                    warn!(object_id, error = %e, "re-pick after secondary failure failed");
                    line = Some(format!("sp {} failed, re-pick failed: {}", sp_id, e));
                }
            }
        }

        if let TaskPayload::ReplicatePiece(p) = &mut task.payload {
            p.not_available_sp_idx = NO_FAILED_SP;
            p.secondary_signatures.clear();
        }
        if let Some(line) = line {
            task.append_log(&line);
        }
    }

    async fn handle_seal_report(&self, task: Task) -> Result<()> {
        if let Some(err) = task.error().cloned() {
            return self.retry_or_abandon(task, err).await;
        }
        let object = task
            .object()
            .cloned()
            .ok_or_else(|| ManagerError::Dangling(format!("{} carries no object", task.key)))?;
        self.queues.of(&task).pop_by_key(&task.key);
        self.finish_sealed(&task, &object).await;
        Ok(())
    }

    async fn finish_sealed(&self, task: &Task, object: &ObjectInfo) {
        self.put_event(task, EventOutcome::Succeeded, None).await;
        self.set_progress(object.id, UploadState::Sealed, "").await;
        self.side_effects
            .submit(SideEffect::DeleteChecksums(object.id))
            .await;
        ManagerMetrics::inc(&self.metrics.objects_sealed);
        info!(object_id = object.id, task_key = %task.key, "object sealed");
    }

    // ════════════════════════════════════════════════════════════════════════
    // RECEIVE, GC, RECOVER, MIGRATE
    // ════════════════════════════════════════════════════════════════════════

    async fn handle_receive_report(&self, task: Task) -> Result<()> {
        if let Some(err) = task.error().cloned() {
            return self.retry_or_abandon(task, err).await;
        }
        self.queues.of(&task).pop_by_key(&task.key);
        self.put_event(&task, EventOutcome::Succeeded, None).await;
        Ok(())
    }

    async fn handle_gc_report(&self, task: Task) -> Result<()> {
        if let Some(err) = task.error().cloned() {
            return self.retry_or_abandon(task, err).await;
        }
        let queue = self.queues.of(&task);
        let Some(mut queued) = queue.get(&task.key) else {
            return Err(ManagerError::Canceled(task.key));
        };
        merge_gc_progress(&mut queued.payload, &task.payload);
        let Some(range) = gc_range(&queued.payload) else {
            return Err(ManagerError::Dangling(format!("{} carries no gc range", task.key)));
        };

        self.side_effects
            .submit(SideEffect::SetGcCheckpoint(GcCheckpoint {
                task_type: queued.task_type(),
                start: range.start,
                end: range.end,
                current: range.current,
            }))
            .await;

        if range.finished() {
            queue.pop_by_key(&queued.key);
            self.put_event(&queued, EventOutcome::Succeeded, None).await;
            info!(task_key = %queued.key, "gc task finished");
        } else {
            queued.meta.update_time = self.clock.now();
            queue.update(queued);
            debug!(task_key = %task.key, current = range.current, end = range.end, "gc progressed");
        }
        Ok(())
    }

    async fn handle_recover_report(&self, task: Task) -> Result<()> {
        if let Some(err) = task.error().cloned() {
            return self.retry_or_abandon(task, err).await;
        }
        self.queues.of(&task).pop_by_key(&task.key);
        if let Some(process) = self.recovery.lock().process.as_mut() {
            process.succeeded += 1;
        }
        self.put_event(&task, EventOutcome::Succeeded, None).await;
        Ok(())
    }

    async fn handle_migrate_gvg_report(&self, task: Task) -> Result<()> {
        if let Some(err) = task.error().cloned() {
            return self.retry_or_abandon(task, err).await;
        }
        let TaskPayload::MigrateGvg(p) = &task.payload else {
            return Err(ManagerError::Dangling(format!("{} is not a migrate task", task.key)));
        };
        let queue = self.queues.of(&task);

        if p.finished {
            queue.pop_by_key(&task.key);
            self.put_event(&task, EventOutcome::Succeeded, None).await;
            if p.bucket_id != 0 {
                self.record_gvg_migrated(p.bucket_id, p.src_gvg_id).await;
            }
            info!(task_key = %task.key, "gvg migrated");
            return Ok(());
        }

        let Some(mut queued) = queue.get(&task.key) else {
            return Err(ManagerError::Canceled(task.key));
        };
        if let TaskPayload::MigrateGvg(q) = &mut queued.payload {
            q.last_migrated_object_id = q.last_migrated_object_id.max(p.last_migrated_object_id);
        }
        queued.meta.update_time = self.clock.now();
        queue.update(queued);
        Ok(())
    }

    async fn handle_front_end_report(&self, task: Task) -> Result<()> {
        self.queues.of(&task).pop_by_key(&task.key);
        let (outcome, error) = match task.error() {
            Some(e) => (EventOutcome::Failed, Some(e.message.clone())),
            None => (EventOutcome::Succeeded, None),
        };
        match task.task_type() {
            TaskType::Challenge => ManagerMetrics::inc(&self.metrics.challenges_done),
            _ => ManagerMetrics::inc(&self.metrics.downloads_done),
        }
        self.put_event(&task, outcome, error).await;
        Ok(())
    }

    // ════════════════════════════════════════════════════════════════════════
    // FAILURE
    // ════════════════════════════════════════════════════════════════════════

    /// Re-queues a failed task for another attempt, or abandons it once its
    /// retry budget is spent.
    async fn retry_or_abandon(&self, mut task: Task, err: TaskErrorInfo) -> Result<()> {
        if let Some(queued) = self.queues.of(&task).get(&task.key) {
            task.meta.retry = task.meta.retry.max(queued.meta.retry);
        }
        if task.exceed_retry() {
            self.fail_terminal(task, DESC_EXCEEDED.to_string()).await;
            return Ok(());
        }
        let line = format!("attempt {} failed: {}", task.meta.retry, err.message);
        task.append_log(&line);
        task.meta.update_time = self.clock.now();
        task.meta.address.clear();
        task.meta.error = Some(err);

        let key = task.key.clone();
        if !self.queues.of(&task).update(task) {
            return Err(ManagerError::Canceled(key));
        }
        ManagerMetrics::inc(&self.metrics.tasks_retried);
        info!(task_key = %key, "task re-queued for retry");
        self.wake_dispatchers();
        Ok(())
    }

    /// Removes `task` for good and records why.
    pub(crate) async fn fail_terminal(&self, task: Task, description: String) {
        let state = match task.task_type() {
            TaskType::Upload | TaskType::ResumableUpload => Some(UploadState::UploadFailed),
            TaskType::ReplicatePiece => Some(UploadState::ReplicateFailed),
            TaskType::SealObject => Some(UploadState::SealFailed),
            _ => None,
        };
        match state {
            Some(state) => self.fail_terminal_as(task, state, description).await,
            None => self.abandon(task, description).await,
        }
    }

    async fn fail_terminal_as(&self, task: Task, state: UploadState, description: String) {
        let object = task.object().cloned();
        self.abandon(task, description.clone()).await;
        let Some(object) = object else {
            return;
        };
        self.set_progress(object.id, state, &description).await;
        if matches!(state, UploadState::ReplicateFailed | UploadState::SealFailed) {
            self.side_effects
                .submit(SideEffect::DeleteChecksums(object.id))
                .await;
            self.side_effects
                .submit(SideEffect::RejectUnseal(RejectUnsealRequest {
                    object_id: object.id,
                    bucket_name: object.bucket_name.clone(),
                    object_name: object.object_name.clone(),
                }))
                .await;
        }
    }

    async fn abandon(&self, task: Task, description: String) {
        self.queues.of(&task).pop_by_key(&task.key);
        ManagerMetrics::inc(&self.metrics.tasks_terminal);
        warn!(task_key = %task.key, retry = task.meta.retry, %description, "task abandoned");

        match &task.payload {
            TaskPayload::RecoverPiece(p) => {
                let mut recovery = self.recovery.lock();
                if let Some(process) = recovery.process.as_mut() {
                    process.failed += 1;
                }
                recovery.failed.push(RecoverFailedEntry {
                    task_key: task.key.clone(),
                    object_id: p.object.id,
                    segment_idx: p.segment_idx,
                    redundancy_idx: p.redundancy_idx,
                    reason: description.clone(),
                });
            }
            TaskPayload::MigrateGvg(p) if p.bucket_id != 0 => {
                self.record_migration_failure(p.bucket_id, &description).await;
            }
            _ => {}
        }
        self.put_event(&task, EventOutcome::Failed, Some(description)).await;
    }

    pub(crate) async fn put_event(&self, task: &Task, outcome: EventOutcome, error: Option<String>) {
        let event = AuditEvent {
            task_key: task.key.clone(),
            task_type: task.task_type(),
            object_id: task.object().map(|o| o.id),
            outcome,
            logs: task.meta.logs.clone(),
            error,
            time: self.clock.now(),
        };
        self.side_effects.submit(SideEffect::PutEvent(event)).await;
    }
}

fn gc_range(payload: &TaskPayload) -> Option<GcRange> {
    match payload {
        TaskPayload::GcObject(p) => Some(p.range),
        TaskPayload::GcZombiePiece(p) => Some(p.range),
        TaskPayload::GcMeta(p) => Some(p.range),
        TaskPayload::GcStaleVersion(p) => Some(p.range),
        TaskPayload::GcBucketMigration(p) => Some(p.range),
        _ => None,
    }
}

/// Advances the queued cursor to the reported one. Cursors never move back.
fn merge_gc_progress(queued: &mut TaskPayload, reported: &TaskPayload) {
    let Some(reported_range) = gc_range(reported) else {
        return;
    };
    match queued {
        TaskPayload::GcObject(q) => {
            q.range.advance_to(reported_range.current);
            if let TaskPayload::GcObject(r) = reported {
                q.last_deleted_object_id = q.last_deleted_object_id.max(r.last_deleted_object_id);
            }
        }
        TaskPayload::GcZombiePiece(q) => q.range.advance_to(reported_range.current),
        TaskPayload::GcMeta(q) => q.range.advance_to(reported_range.current),
        TaskPayload::GcStaleVersion(q) => q.range.advance_to(reported_range.current),
        TaskPayload::GcBucketMigration(q) => q.range.advance_to(reported_range.current),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{ask, harness, Harness};
    use spnode_common::task::fixtures;
    use spnode_common::{GcMetaPayload, MetadataStore, SignerCall};

    async fn uploaded(h: &Harness, id: u64) -> Task {
        let upload = fixtures::upload_task(id, 1024 * 1024, 0);
        h.manager.begin_upload(upload.clone()).await.unwrap();
        h.manager.handle_report(upload.clone()).await.unwrap();
        let object = upload.object().cloned().unwrap();
        h.manager
            .queues
            .find(&TaskKey::replicate_piece(&object))
            .unwrap()
    }

    fn replicate_payload(task: &mut Task) -> &mut ReplicatePiecePayload {
        match &mut task.payload {
            TaskPayload::ReplicatePiece(p) => p,
            _ => panic!("not a replicate task"),
        }
    }

    // ──── UPLOAD ────

    #[tokio::test]
    async fn test_upload_done_creates_replicate_task() {
        let h = harness().await;
        let mut rep = uploaded(&h, 5).await;
        h.manager.flush_side_effects().await;

        assert!(h.manager.queues.get(TaskType::Upload).is_empty());
        let p = replicate_payload(&mut rep);
        assert_eq!(p.gvg_id, 10);
        assert_eq!(p.secondary_sp_ids, vec![2, 3, 4, 5, 6, 7]);
        assert_eq!(p.secondary_endpoints[0], "http://sp2");
        assert_eq!(p.not_available_sp_idx, NO_FAILED_SP);
        assert_eq!(
            h.store.get_upload_progress(5).await.unwrap().unwrap().state,
            UploadState::Replicating
        );
    }

    #[tokio::test]
    async fn test_upload_error_is_terminal() {
        let h = harness().await;
        let mut upload = fixtures::upload_task(5, 1024, 0);
        h.manager.begin_upload(upload.clone()).await.unwrap();
        upload.set_error(1, "client went away");
        h.manager.handle_report(upload).await.unwrap();
        h.manager.flush_side_effects().await;

        let p = h.store.get_upload_progress(5).await.unwrap().unwrap();
        assert_eq!(p.state, UploadState::UploadFailed);
        assert_eq!(p.error_description, "error: client went away");
    }

    #[tokio::test]
    async fn test_report_for_unknown_task_is_canceled() {
        let h = harness().await;
        let upload = fixtures::upload_task(5, 1024, 0);
        let err = h.manager.handle_report(upload).await.unwrap_err();
        assert!(matches!(err, ManagerError::Canceled(_)));
        assert_eq!(ManagerMetrics::get(&h.manager.metrics.tasks_canceled), 1);
    }

    #[tokio::test]
    async fn test_unplaceable_upload_fails_replication() {
        let h = harness().await;
        let mut upload = fixtures::upload_task(5, 1024, 0);
        if let TaskPayload::Upload(p) = &mut upload.payload {
            p.object.bucket_vgf_id = 99;
        }
        h.chain.fail_create(true);
        h.manager.begin_upload(upload.clone()).await.unwrap();
        assert!(h.manager.handle_report(upload).await.is_err());
        h.manager.flush_side_effects().await;
        assert!(h.manager.queues.get(TaskType::Upload).is_empty());
        assert_eq!(
            h.store.get_upload_progress(5).await.unwrap().unwrap().state,
            UploadState::ReplicateFailed
        );
    }

    // ──── REPLICATE ────

    #[tokio::test]
    async fn test_sealed_replicate_finishes_without_seal_task() {
        let h = harness().await;
        uploaded(&h, 5).await;
        let mut rep = h.manager.try_dispatch(&ask("exec-1")).unwrap();
        replicate_payload(&mut rep).sealed = true;
        h.manager.handle_report(rep).await.unwrap();
        h.manager.flush_side_effects().await;

        assert!(h.manager.queues.get(TaskType::ReplicatePiece).is_empty());
        assert!(h.manager.queues.get(TaskType::SealObject).is_empty());
        assert_eq!(
            h.store.get_upload_progress(5).await.unwrap().unwrap().state,
            UploadState::Sealed
        );
    }

    #[tokio::test]
    async fn test_unsealed_replicate_creates_seal_task() {
        let h = harness().await;
        uploaded(&h, 5).await;
        let mut rep = h.manager.try_dispatch(&ask("exec-1")).unwrap();
        replicate_payload(&mut rep).secondary_signatures = vec![vec![1u8; 96]; 6];
        h.manager.handle_report(rep).await.unwrap();

        let seal = h.manager.queues.get(TaskType::SealObject).scan();
        assert_eq!(seal.len(), 1);
        match &seal[0].payload {
            TaskPayload::SealObject(p) => {
                assert_eq!(p.gvg_id, 10);
                assert_eq!(p.secondary_signatures.len(), 6);
            }
            _ => panic!("expected seal payload"),
        }
        assert!(h.manager.queues.get(TaskType::ReplicatePiece).is_empty());
    }

    #[tokio::test]
    async fn test_secondary_failure_freezes_and_repicks() {
        let h = harness().await;
        uploaded(&h, 5).await;
        h.chain.add_gvg(crate::manager::tests::gvg(11, 1, vec![8, 9, 4, 5, 6, 7]));
        h.manager.vgm.force_refresh().await.unwrap();
        let mut rep = h.manager.try_dispatch(&ask("exec-1")).unwrap();
        assert_eq!(replicate_payload(&mut rep).gvg_id, 10);

        {
            let p = replicate_payload(&mut rep);
            p.not_available_sp_idx = 0;
        }
        rep.set_error(1, "push to sp 2 failed");
        h.manager.handle_report(rep.clone()).await.unwrap();

        assert!(h.manager.vgm.freeze_pool().is_sp_frozen(2));
        let mut queued = h.manager.queues.find(&rep.key).unwrap();
        let p = replicate_payload(&mut queued);
        assert_eq!(p.gvg_id, 11);
        assert!(!p.secondary_sp_ids.contains(&2));
        assert_eq!(p.not_available_sp_idx, NO_FAILED_SP);
        assert!(p.secondary_signatures.is_empty());
        assert!(!queued.dispatched());
        assert!(queued.error().is_some());
    }

    #[tokio::test]
    async fn test_replicate_abandoned_after_budget() {
        let h = harness().await;
        let rep = uploaded(&h, 5).await;
        let attempts = rep.meta.max_retry + 1;
        for _ in 0..attempts {
            let mut t = h.manager.try_dispatch(&ask("exec-1")).unwrap();
            t.set_error(1, "boom");
            h.manager.handle_report(t).await.unwrap();
        }
        h.manager.flush_side_effects().await;

        assert!(h.manager.queues.find(&rep.key).is_none());
        let p = h.store.get_upload_progress(5).await.unwrap().unwrap();
        assert_eq!(p.state, UploadState::ReplicateFailed);
        assert_eq!(p.error_description, DESC_EXCEEDED);
        assert!(h
            .chain
            .signer_calls()
            .iter()
            .any(|c| matches!(c, SignerCall::RejectUnseal(r) if r.object_id == 5)));
    }

    // ──── GC ────

    #[tokio::test]
    async fn test_gc_progress_checkpoints_until_finished() {
        let h = harness().await;
        let mut task = Task::new(
            TaskKey::gc_meta(0, 100),
            TaskPayload::GcMeta(GcMetaPayload {
                range: GcRange::new(0, 100),
            }),
            1_000,
        );
        h.manager.policy.apply(&mut task);
        h.manager.queues.of(&task).push(task.clone()).unwrap();
        let mut t = h.manager.try_dispatch(&ask("exec-1")).unwrap();

        if let TaskPayload::GcMeta(p) = &mut t.payload {
            p.range.advance_to(40);
        }
        h.manager.handle_report(t.clone()).await.unwrap();
        h.manager.flush_side_effects().await;
        let cp = h.store.get_gc_checkpoint(TaskType::GcMeta).await.unwrap().unwrap();
        assert_eq!(cp.current, 40);
        let queued = h.manager.queues.find(&t.key).unwrap();
        assert_eq!(queued.meta.address, "exec-1");

        if let TaskPayload::GcMeta(p) = &mut t.payload {
            p.range.advance_to(100);
        }
        h.manager.handle_report(t.clone()).await.unwrap();
        assert!(h.manager.queues.find(&t.key).is_none());
    }

    #[test]
    fn test_gc_cursor_never_moves_back() {
        let mut queued = TaskPayload::GcMeta(GcMetaPayload {
            range: GcRange {
                start: 0,
                end: 100,
                current: 50,
            },
        });
        let reported = TaskPayload::GcMeta(GcMetaPayload {
            range: GcRange::new(0, 100),
        });
        merge_gc_progress(&mut queued, &reported);
        assert_eq!(gc_range(&queued).unwrap().current, 50);
    }
}
