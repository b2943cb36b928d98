//! # Task Manager
//!
//! Owns one queue per task type and moves objects through the upload
//! pipeline. Report handling lives in `report`, GC generation in `gc` and
//! the operator operations in `ops`; all of them are `impl Manager` blocks.
//!
//! ```text
//!   front end ──begin──►┌──────────────┐◄──ask── executors
//!                       │   Manager    │
//!   front end ─report──►│  TaskQueues  │◄─report─ executors
//!                       └──────┬───────┘
//!                              │ picks / freezes
//!                              ▼
//!                     VirtualGroupManager
//! ```
//!
//! ## Dispatch Rules
//!
//! | Condition | Dispatchable |
//! |-----------|--------------|
//! | never dispatched, `retry <= max_retry`, fits the executor limit | yes |
//! | dispatched, `now > update_time + timeout + grace` | yes (re-dispatch) |
//! | `retry > max_retry` | no, reconciler retires it once timed out |
//!
//! Every dispatch bumps `retry`, so a task runs at most `max_retry + 1` times.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spnode_common::{
    Clock, ManagerConfig, MetadataStore, Signer, Task, TaskPayload, TaskPolicy, TaskType,
    TopologySource, UploadProgress, UploadState,
};
use spnode_vgmgr::{RandomPolicy, SpPickPolicy, VirtualGroupManager};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{DispatchRequest, RecoverFailedEntry, RecoverProcess, DESC_EXCEEDED};
use crate::error::{ManagerError, Result};
use crate::gc::GcCursors;
use crate::metrics::ManagerMetrics;
use crate::ops::BucketMigrationPlan;
use crate::queues::{TaskQueues, DISPATCHABLE};
use crate::side_effect::{SideEffect, SideEffects};

#[derive(Debug, Default)]
pub(crate) struct RecoveryState {
    pub process: Option<RecoverProcess>,
    pub failed: Vec<RecoverFailedEntry>,
}

pub struct Manager {
    pub(crate) config: ManagerConfig,
    pub(crate) queues: TaskQueues,
    pub(crate) policy: TaskPolicy,
    pub(crate) vgm: Arc<VirtualGroupManager>,
    pub(crate) metadata: Arc<dyn MetadataStore>,
    pub(crate) topology: Arc<dyn TopologySource>,
    pub(crate) signer: Arc<dyn Signer>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) side_effects: SideEffects,
    pub(crate) metrics: Arc<ManagerMetrics>,
    pub(crate) sp_policy: Arc<dyn SpPickPolicy>,
    pub(crate) gc_cursors: Mutex<GcCursors>,
    pub(crate) recovery: Mutex<RecoveryState>,
    pub(crate) migrations: Mutex<BTreeMap<u64, BucketMigrationPlan>>,
    notify: Notify,
    backup_count: AtomicUsize,
}

impl Manager {
    /// Builds the manager and starts its side effect worker. Must be called
    /// inside a tokio runtime.
    pub fn new(
        config: ManagerConfig,
        vgm: Arc<VirtualGroupManager>,
        metadata: Arc<dyn MetadataStore>,
        topology: Arc<dyn TopologySource>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(ManagerMetrics::new());
        let (side_effects, _worker) = SideEffects::spawn(
            config.side_effect_queue_cap,
            Arc::clone(&metadata),
            Arc::clone(&signer),
            Arc::clone(&metrics),
        );
        Self {
            queues: TaskQueues::new(&config, Arc::clone(&clock)),
            policy: TaskPolicy::new(config.policy.clone()),
            config,
            vgm,
            metadata,
            topology,
            signer,
            clock,
            side_effects,
            metrics,
            sp_policy: Arc::new(RandomPolicy),
            gc_cursors: Mutex::new(GcCursors::default()),
            recovery: Mutex::new(RecoveryState::default()),
            migrations: Mutex::new(BTreeMap::new()),
            notify: Notify::new(),
            backup_count: AtomicUsize::new(0),
        }
    }

    /// Secondary ordering used when this manager creates GVGs.
    pub fn with_sp_policy(mut self, policy: Arc<dyn SpPickPolicy>) -> Self {
        self.sp_policy = policy;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn queues(&self) -> &TaskQueues {
        &self.queues
    }

    pub fn vgm(&self) -> &Arc<VirtualGroupManager> {
        &self.vgm
    }

    pub fn metrics(&self) -> &Arc<ManagerMetrics> {
        &self.metrics
    }

    pub fn backup_count(&self) -> usize {
        self.backup_count.load(Ordering::SeqCst)
    }

    /// Waits until every side effect submitted so far has been applied.
    pub async fn flush_side_effects(&self) {
        self.side_effects.flush().await;
    }

    pub(crate) fn wake_dispatchers(&self) {
        self.notify.notify_waiters();
    }

    pub(crate) async fn set_progress(&self, object_id: u64, state: UploadState, description: &str) {
        let progress = UploadProgress {
            object_id,
            state,
            error_description: description.to_string(),
            update_time: self.clock.now(),
        };
        self.side_effects.submit(SideEffect::UpdateProgress(progress)).await;
    }

    // ════════════════════════════════════════════════════════════════════════
    // BEGIN
    // ════════════════════════════════════════════════════════════════════════

    /// Registers a new upload. Fails without side effects if the task is
    /// malformed or its queue is full.
    pub async fn begin_upload(&self, task: Task) -> Result<()> {
        if task.task_type() != TaskType::Upload {
            return Err(ManagerError::Dangling(format!(
                "expected upload task, got {}",
                task.task_type()
            )));
        }
        self.begin_object_upload(task).await
    }

    pub async fn begin_resumable_upload(&self, task: Task) -> Result<()> {
        if task.task_type() != TaskType::ResumableUpload {
            return Err(ManagerError::Dangling(format!(
                "expected resumable upload task, got {}",
                task.task_type()
            )));
        }
        self.begin_object_upload(task).await
    }

    /// Entry point for every task a front end starts itself.
    pub async fn begin_task(&self, task: Task) -> Result<()> {
        match task.task_type() {
            TaskType::Upload => self.begin_upload(task).await,
            TaskType::ResumableUpload => self.begin_resumable_upload(task).await,
            TaskType::Download | TaskType::Challenge => {
                validate_object_task(&task)?;
                self.enqueue_front_end(task).map(|_| ())
            }
            other => Err(ManagerError::InvalidRequest(format!(
                "{} tasks cannot be begun",
                other
            ))),
        }
    }

    async fn begin_object_upload(&self, task: Task) -> Result<()> {
        validate_object_task(&task)?;
        let task = self.enqueue_front_end(task)?;
        let object_id = task.object().map(|o| o.id).unwrap_or_default();
        let progress = UploadProgress {
            object_id,
            state: UploadState::Uploading,
            error_description: String::new(),
            update_time: task.meta.update_time,
        };
        self.side_effects.submit(SideEffect::InsertProgress(progress)).await;
        Ok(())
    }

    fn enqueue_front_end(&self, mut task: Task) -> Result<Task> {
        let now = self.clock.now();
        self.policy.apply(&mut task);
        if task.meta.create_time == 0 {
            task.meta.create_time = now;
        }
        task.meta.update_time = now;
        task.meta.retry = 0;
        task.meta.address.clear();
        task.clear_error();

        self.queues.of(&task).push(task.clone())?;
        ManagerMetrics::inc(&self.metrics.tasks_begun);
        info!(task_key = %task.key, timeout = task.meta.timeout, "task begun");
        Ok(task)
    }

    // ════════════════════════════════════════════════════════════════════════
    // DISPATCH
    // ════════════════════════════════════════════════════════════════════════

    /// Hands the highest-priority dispatchable task to an executor, waiting
    /// until one appears or `cancel` fires.
    pub async fn dispatch_task(
        &self,
        cancel: &CancellationToken,
        req: &DispatchRequest,
    ) -> Option<Task> {
        loop {
            let notified = self.notify.notified();
            if let Some(task) = self.try_dispatch(req) {
                return Some(task);
            }
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
                _ = tokio::time::sleep(self.config.dispatch_poll()) => {}
            }
        }
    }

    /// Single non-blocking dispatch attempt.
    pub fn try_dispatch(&self, req: &DispatchRequest) -> Option<Task> {
        let now = self.clock.now();
        let grace = self.config.redispatch_grace_secs;

        let mut types: Vec<TaskType> = DISPATCHABLE
            .iter()
            .copied()
            .filter(|t| req.task_types.is_empty() || req.task_types.contains(t))
            .collect();
        types.sort_by_key(|t| std::cmp::Reverse(self.policy.priority(*t)));

        for task_type in types {
            let mut redispatch = false;
            let claimed = self.queues.get(task_type).claim_top(
                |t| can_dispatch(t, now, grace) && req.limit.covers(&t.estimate_limit()),
                |t| {
                    redispatch = t.dispatched();
                    t.inc_retry();
                    t.clear_error();
                    t.meta.update_time = now;
                    t.meta.address = req.address.clone();
                },
            );
            if let Some(task) = claimed {
                ManagerMetrics::inc(&self.metrics.tasks_dispatched);
                if redispatch {
                    ManagerMetrics::inc(&self.metrics.tasks_redispatched);
                }
                info!(
                    task_key = %task.key,
                    address = %req.address,
                    retry = task.meta.retry,
                    redispatch,
                    "task dispatched"
                );
                return Some(task);
            }
        }
        None
    }

    // ════════════════════════════════════════════════════════════════════════
    // RECONCILE
    // ════════════════════════════════════════════════════════════════════════

    /// Recounts overdue tasks and retires the ones that can never run again.
    pub async fn run_reconcile_once(&self) -> usize {
        let now = self.clock.now();
        let grace = self.config.redispatch_grace_secs;
        let mut backups = 0;
        let mut retired = Vec::new();

        for task_type in DISPATCHABLE {
            let q = self.queues.get(task_type);
            backups += q.count_by_filter(|t| t.dispatched() && can_dispatch(t, now, grace));
            retired.extend(q.remove_by_filter(|t| t.exceed_retry() && t.exceed_timeout(now)));
        }
        for (_, q) in self.queues.iter() {
            retired.extend(q.take_retired());
        }

        let previous = self.backup_count.swap(backups, Ordering::SeqCst);
        if backups > previous {
            debug!(backups, previous, "overdue tasks grew, waking dispatchers");
            self.wake_dispatchers();
        }

        let count = retired.len();
        for task in retired {
            self.fail_terminal(task, DESC_EXCEEDED.to_string()).await;
        }
        count
    }

    // ════════════════════════════════════════════════════════════════════════
    // LOOPS
    // ════════════════════════════════════════════════════════════════════════

    /// Spawns the reconciler and the enabled GC generators.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = vec![spawn_loop(
            "manager-reconcile",
            Duration::from_secs(self.config.reconcile_interval_secs),
            cancel.clone(),
            Arc::clone(&self),
            |m| async move {
                m.run_reconcile_once().await;
            },
        )];

        if self.config.enable_gc_object {
            handles.push(spawn_loop(
                "manager-gc-object",
                Duration::from_secs(self.config.gc_object_interval_secs),
                cancel.clone(),
                Arc::clone(&self),
                |m| async move {
                    if let Err(e) = m.generate_gc_object_task().await {
                        warn!(error = %e, "gc object generation failed");
                    }
                },
            ));
        }
        if self.config.enable_gc_zombie {
            handles.push(spawn_loop(
                "manager-gc-zombie",
                Duration::from_secs(self.config.gc_zombie_interval_secs),
                cancel.clone(),
                Arc::clone(&self),
                |m| async move {
                    if let Err(e) = m.generate_gc_zombie_task().await {
                        warn!(error = %e, "gc zombie generation failed");
                    }
                },
            ));
        }
        if self.config.enable_gc_meta {
            handles.push(spawn_loop(
                "manager-gc-meta",
                Duration::from_secs(self.config.gc_meta_interval_secs),
                cancel,
                Arc::clone(&self),
                |m| async move {
                    if let Err(e) = m.generate_gc_meta_task().await {
                        warn!(error = %e, "gc meta generation failed");
                    }
                },
            ));
        }
        handles
    }
}

fn can_dispatch(task: &Task, now: u64, grace: u64) -> bool {
    if task.exceed_retry() {
        return false;
    }
    !task.dispatched()
        || now
            > task
                .meta
                .update_time
                .saturating_add(task.meta.timeout)
                .saturating_add(grace)
}

fn validate_object_task(task: &Task) -> Result<()> {
    let object = task
        .object()
        .ok_or_else(|| ManagerError::Dangling(format!("{} carries no object", task.key)))?;
    if object.bucket_name.is_empty() || object.object_name.is_empty() {
        return Err(ManagerError::Dangling(format!(
            "object {} has no bucket or object name",
            object.id
        )));
    }
    let max_segment_size = match &task.payload {
        TaskPayload::Upload(p) => p.params.max_segment_size,
        TaskPayload::ResumableUpload(p) => p.params.max_segment_size,
        TaskPayload::Download(p) => p.params.max_segment_size,
        TaskPayload::Challenge(p) => p.params.max_segment_size,
        _ => 1,
    };
    if max_segment_size == 0 {
        return Err(ManagerError::Dangling(format!(
            "object {} has no storage params",
            object.id
        )));
    }
    Ok(())
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    manager: Arc<Manager>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Manager>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(name, interval_secs = interval.as_secs(), "manager loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(name, "manager loop stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    tick(Arc::clone(&manager)).await;
                }
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use spnode_common::task::fixtures;
    use spnode_common::{
        GcMetaPayload, GcRange, GlobalVirtualGroup, ManualClock, MemoryChain, MemoryMetadataStore,
        ResourceLimit, StorageProvider, TaskKey, VgmConfig,
    };

    pub(crate) struct Harness {
        pub manager: Arc<Manager>,
        pub chain: Arc<MemoryChain>,
        pub store: Arc<MemoryMetadataStore>,
        pub clock: Arc<ManualClock>,
    }

    pub(crate) fn sp(id: u32) -> StorageProvider {
        StorageProvider {
            id,
            operator_address: format!("0xsp{}", id),
            endpoint: format!("http://sp{}", id),
            bls_public_key: vec![],
            in_service: true,
        }
    }

    pub(crate) fn gvg(id: u32, family_id: u32, secondaries: Vec<u32>) -> GlobalVirtualGroup {
        GlobalVirtualGroup {
            id,
            family_id,
            primary_sp_id: 1,
            secondary_sp_ids: secondaries,
            secondary_endpoints: vec![],
            stored_size: 0,
            staking_storage_size: 1 << 30,
        }
    }

    /// SP 1 is us; SPs 2..=9 are peers; GVG 10 in family 1 uses 2..=7.
    pub(crate) async fn harness_with(config: ManagerConfig) -> Harness {
        let chain = Arc::new(MemoryChain::new(1));
        for id in 1..=9 {
            chain.add_sp(sp(id));
        }
        chain.add_gvg(gvg(10, 1, vec![2, 3, 4, 5, 6, 7]));
        let store = Arc::new(MemoryMetadataStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let vgm = Arc::new(
            VirtualGroupManager::new(
                VgmConfig::default(),
                1,
                chain.clone(),
                chain.clone(),
                clock.clone(),
            )
            .with_rng_seed(7),
        );
        vgm.force_refresh().await.unwrap();
        let manager = Arc::new(Manager::new(
            config,
            vgm,
            store.clone(),
            chain.clone(),
            chain.clone(),
            clock.clone(),
        ));
        Harness {
            manager,
            chain,
            store,
            clock,
        }
    }

    pub(crate) async fn harness() -> Harness {
        harness_with(ManagerConfig::default()).await
    }

    pub(crate) fn ask(address: &str) -> DispatchRequest {
        DispatchRequest {
            address: address.to_string(),
            limit: ResourceLimit::unlimited(),
            task_types: vec![],
        }
    }

    fn gc_meta(start: u64, end: u64, now: u64) -> Task {
        Task::new(
            TaskKey::gc_meta(start, end),
            TaskPayload::GcMeta(GcMetaPayload {
                range: GcRange::new(start, end),
            }),
            now,
        )
    }

    fn push_dispatchable(h: &Harness, mut task: Task) -> Task {
        h.manager.policy.apply(&mut task);
        h.manager.queues.of(&task).push(task.clone()).unwrap();
        task
    }

    // ──── BEGIN ────

    #[tokio::test]
    async fn test_begin_upload_enqueues_and_records_progress() {
        let h = harness().await;
        let task = fixtures::upload_task(5, 1024, 0);
        h.manager.begin_upload(task.clone()).await.unwrap();
        h.manager.flush_side_effects().await;

        let queued = h.manager.queues.find(&task.key).unwrap();
        assert!(queued.meta.timeout > 0);
        // The uploader retries its own uploads.
        assert_eq!(queued.meta.max_retry, 0);
        assert_eq!(queued.meta.priority, 255);
        let p = h.store.get_upload_progress(5).await.unwrap().unwrap();
        assert_eq!(p.state, UploadState::Uploading);
    }

    #[tokio::test]
    async fn test_begin_upload_twice_is_repeated() {
        let h = harness().await;
        let task = fixtures::upload_task(5, 1024, 0);
        h.manager.begin_upload(task.clone()).await.unwrap();
        let err = h.manager.begin_upload(task).await.unwrap_err();
        assert_eq!(err.code(), 20001);
    }

    #[tokio::test]
    async fn test_begin_rejects_dangling_tasks() {
        let h = harness().await;
        let mut task = fixtures::upload_task(5, 1024, 0);
        if let TaskPayload::Upload(p) = &mut task.payload {
            p.params.max_segment_size = 0;
        }
        assert!(matches!(
            h.manager.begin_upload(task).await,
            Err(ManagerError::Dangling(_))
        ));
        assert!(matches!(
            h.manager.begin_upload(gc_meta(0, 10, 0)).await,
            Err(ManagerError::Dangling(_))
        ));
        assert!(matches!(
            h.manager.begin_task(gc_meta(0, 10, 0)).await,
            Err(ManagerError::InvalidRequest(_))
        ));
        assert!(h.manager.queues.get(TaskType::Upload).is_empty());
    }

    // ──── DISPATCH ────

    #[tokio::test]
    async fn test_front_end_tasks_never_dispatched() {
        let h = harness().await;
        h.manager
            .begin_upload(fixtures::upload_task(5, 1024, 0))
            .await
            .unwrap();
        assert!(h.manager.try_dispatch(&ask("exec-1")).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_stamps_address_and_retry() {
        let h = harness().await;
        push_dispatchable(&h, gc_meta(0, 10, 1_000));
        let t = h.manager.try_dispatch(&ask("exec-1")).unwrap();
        assert_eq!(t.meta.address, "exec-1");
        assert_eq!(t.meta.retry, 1);
        assert_eq!(h.manager.queues.find(&t.key).unwrap().meta.address, "exec-1");
        // In flight and not overdue.
        assert!(h.manager.try_dispatch(&ask("exec-2")).is_none());
    }

    #[tokio::test]
    async fn test_overdue_task_redispatched_after_grace() {
        let h = harness().await;
        let task = push_dispatchable(&h, gc_meta(0, 10, 1_000));
        h.manager.try_dispatch(&ask("exec-1")).unwrap();

        let deadline = task.meta.timeout + h.manager.config.redispatch_grace_secs;
        h.clock.advance(deadline);
        assert!(h.manager.try_dispatch(&ask("exec-2")).is_none());
        h.clock.advance(1);
        let t = h.manager.try_dispatch(&ask("exec-2")).unwrap();
        assert_eq!(t.meta.address, "exec-2");
        assert_eq!(t.meta.retry, 2);
        assert_eq!(ManagerMetrics::get(&h.manager.metrics.tasks_redispatched), 1);
    }

    #[tokio::test]
    async fn test_dispatch_respects_resource_limit() {
        let h = harness().await;
        push_dispatchable(&h, gc_meta(0, 10, 1_000));
        let mut req = ask("exec-1");
        req.limit = ResourceLimit {
            memory_bytes: 1,
            tasks: 1,
        };
        assert!(h.manager.try_dispatch(&req).is_none());
        assert_eq!(h.manager.queues.get(TaskType::GcMeta).len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_type() {
        let h = harness().await;
        push_dispatchable(&h, gc_meta(0, 10, 1_000));
        let mut req = ask("exec-1");
        req.task_types = vec![TaskType::ReplicatePiece];
        assert!(h.manager.try_dispatch(&req).is_none());
        req.task_types = vec![TaskType::GcMeta];
        assert!(h.manager.try_dispatch(&req).is_some());
    }

    #[tokio::test]
    async fn test_dispatch_wakes_on_new_task() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let m = Arc::clone(&h.manager);
        let c = cancel.clone();
        let waiter = tokio::spawn(async move { m.dispatch_task(&c, &ask("exec-1")).await });

        tokio::task::yield_now().await;
        push_dispatchable(&h, gc_meta(0, 10, 1_000));
        h.manager.wake_dispatchers();
        let got = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_returns_none_on_cancel() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(h.manager.dispatch_task(&cancel, &ask("exec-1")).await.is_none());
    }

    // ──── RECONCILE ────

    #[tokio::test]
    async fn test_reconcile_retires_exhausted_tasks_once_timed_out() {
        let h = harness().await;
        let mut task = gc_meta(0, 10, 1_000);
        h.manager.policy.apply(&mut task);
        task.meta.retry = task.meta.max_retry + 1;
        task.meta.address = "exec-1".into();
        h.manager.queues.of(&task).push(task.clone()).unwrap();

        assert_eq!(h.manager.run_reconcile_once().await, 0);
        h.clock.advance(task.meta.timeout + 1);
        assert_eq!(h.manager.run_reconcile_once().await, 1);
        assert!(h.manager.queues.find(&task.key).is_none());
        assert_eq!(ManagerMetrics::get(&h.manager.metrics.tasks_terminal), 1);
    }

    #[tokio::test]
    async fn test_reconcile_counts_backups() {
        let h = harness().await;
        let task = push_dispatchable(&h, gc_meta(0, 10, 1_000));
        h.manager.try_dispatch(&ask("exec-1")).unwrap();
        h.manager.run_reconcile_once().await;
        assert_eq!(h.manager.backup_count(), 0);

        h.clock
            .advance(task.meta.timeout + h.manager.config.redispatch_grace_secs + 1);
        h.manager.run_reconcile_once().await;
        assert_eq!(h.manager.backup_count(), 1);
    }
}
