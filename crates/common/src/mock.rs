//! In-memory collaborators for tests and standalone mode.
//!
//! - [`MemoryChain`]: implements both [`TopologySource`] and [`Signer`]
//!   over one shared in-memory chain state. Every signer call is recorded.
//! - [`MemoryMetadataStore`]: implements [`MetadataStore`] with plain maps.
//!
//! Both expose failure toggles so tests can drive error paths
//! deterministically. Neither performs any I/O.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::chain::{
    ChainResult, CompleteMigrateBucketRequest, CreateGvgRequest, RejectUnsealRequest,
    SealObjectRequest, Signer, TopologySource,
};
use crate::error::CollaboratorError;
use crate::metadata::{
    AuditEvent, BucketMigrationProgress, GcCheckpoint, MetaResult, MetadataStore, UploadProgress,
};
use crate::task::TaskType;
use crate::topology::{
    GlobalVirtualGroup, ObjectInfo, StorageParams, StorageProvider, VirtualGroupFamily,
    VirtualGroupParams,
};

// ════════════════════════════════════════════════════════════════════════════
// MEMORY CHAIN
// ════════════════════════════════════════════════════════════════════════════

/// One recorded signer invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignerCall {
    CreateGvg { request: CreateGvgRequest, gvg_id: u32 },
    DeleteGvg(u32),
    Deposit { gvg_id: u32, amount: u64 },
    Seal(SealObjectRequest),
    RejectUnseal(RejectUnsealRequest),
    CompleteMigrateBucket(CompleteMigrateBucketRequest),
}

struct ChainState {
    sps: BTreeMap<u32, StorageProvider>,
    families: BTreeMap<u32, VirtualGroupFamily>,
    storage_params: StorageParams,
    vg_params: VirtualGroupParams,
    height: u64,
    sealed: HashSet<u64>,
    next_gvg_id: u32,
    next_family_id: u32,
}

pub struct MemoryChain {
    /// Primary SP id used for GVGs created through the signer.
    self_sp_id: u32,
    state: RwLock<ChainState>,
    calls: Mutex<Vec<SignerCall>>,
    fail_reads: AtomicBool,
    fail_seal: AtomicBool,
    fail_create: AtomicBool,
}

impl MemoryChain {
    pub fn new(self_sp_id: u32) -> Self {
        Self {
            self_sp_id,
            state: RwLock::new(ChainState {
                sps: BTreeMap::new(),
                families: BTreeMap::new(),
                storage_params: StorageParams::default(),
                vg_params: VirtualGroupParams::default(),
                height: 1,
                sealed: HashSet::new(),
                next_gvg_id: 1,
                next_family_id: 1,
            }),
            calls: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_seal: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
        }
    }

    pub fn self_sp_id(&self) -> u32 {
        self.self_sp_id
    }

    // ──── setup helpers ────

    pub fn add_sp(&self, sp: StorageProvider) {
        self.state.write().sps.insert(sp.id, sp);
    }

    /// Inserts `gvg`, creating its family on the fly.
    pub fn add_gvg(&self, gvg: GlobalVirtualGroup) {
        let mut st = self.state.write();
        st.next_gvg_id = st.next_gvg_id.max(gvg.id.saturating_add(1));
        st.next_family_id = st.next_family_id.max(gvg.family_id.saturating_add(1));
        let family = st
            .families
            .entry(gvg.family_id)
            .or_insert_with(|| VirtualGroupFamily {
                id: gvg.family_id,
                primary_sp_id: gvg.primary_sp_id,
                gvgs: BTreeMap::new(),
            });
        family.gvgs.insert(gvg.id, gvg);
    }

    pub fn set_gvg_usage(&self, gvg_id: u32, stored_size: u64, staking_storage_size: u64) {
        let mut st = self.state.write();
        for family in st.families.values_mut() {
            if let Some(g) = family.gvgs.get_mut(&gvg_id) {
                g.stored_size = stored_size;
                g.staking_storage_size = staking_storage_size;
            }
        }
    }

    pub fn set_storage_params(&self, params: StorageParams) {
        self.state.write().storage_params = params;
    }

    pub fn set_vg_params(&self, params: VirtualGroupParams) {
        self.state.write().vg_params = params;
    }

    pub fn set_height(&self, height: u64) {
        self.state.write().height = height;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_seal(&self, fail: bool) {
        self.fail_seal.store(fail, Ordering::SeqCst);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    // ──── inspection ────

    pub fn signer_calls(&self) -> Vec<SignerCall> {
        self.calls.lock().clone()
    }

    pub fn gvg(&self, gvg_id: u32) -> Option<GlobalVirtualGroup> {
        self.state
            .read()
            .families
            .values()
            .find_map(|f| f.gvgs.get(&gvg_id).cloned())
    }

    pub fn gvg_count(&self) -> usize {
        self.state.read().families.values().map(|f| f.gvgs.len()).sum()
    }

    fn check_reads(&self) -> ChainResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Chain("injected read failure".to_string()));
        }
        Ok(())
    }

    fn with_endpoints(st: &ChainState, mut gvg: GlobalVirtualGroup) -> GlobalVirtualGroup {
        gvg.secondary_endpoints = gvg
            .secondary_sp_ids
            .iter()
            .map(|id| st.sps.get(id).map(|sp| sp.endpoint.clone()).unwrap_or_default())
            .collect();
        gvg
    }
}

#[async_trait]
impl TopologySource for MemoryChain {
    async fn list_storage_providers(&self) -> ChainResult<Vec<StorageProvider>> {
        self.check_reads()?;
        Ok(self.state.read().sps.values().cloned().collect())
    }

    async fn list_virtual_group_families(
        &self,
        primary_sp_id: u32,
    ) -> ChainResult<Vec<VirtualGroupFamily>> {
        self.check_reads()?;
        let st = self.state.read();
        Ok(st
            .families
            .values()
            .filter(|f| f.primary_sp_id == primary_sp_id)
            .map(|f| VirtualGroupFamily {
                id: f.id,
                primary_sp_id: f.primary_sp_id,
                gvgs: f
                    .gvgs
                    .iter()
                    .map(|(id, g)| (*id, Self::with_endpoints(&st, g.clone())))
                    .collect(),
            })
            .collect())
    }

    async fn query_global_virtual_group(
        &self,
        gvg_id: u32,
    ) -> ChainResult<Option<GlobalVirtualGroup>> {
        self.check_reads()?;
        let st = self.state.read();
        Ok(st
            .families
            .values()
            .find_map(|f| f.gvgs.get(&gvg_id).cloned())
            .map(|g| Self::with_endpoints(&st, g)))
    }

    async fn query_storage_params(&self) -> ChainResult<StorageParams> {
        self.check_reads()?;
        Ok(self.state.read().storage_params.clone())
    }

    async fn query_virtual_group_params(&self) -> ChainResult<VirtualGroupParams> {
        self.check_reads()?;
        Ok(self.state.read().vg_params.clone())
    }

    async fn current_block_height(&self) -> ChainResult<u64> {
        self.check_reads()?;
        Ok(self.state.read().height)
    }

    async fn is_object_sealed(&self, object_id: u64) -> ChainResult<bool> {
        self.check_reads()?;
        Ok(self.state.read().sealed.contains(&object_id))
    }
}

#[async_trait]
impl Signer for MemoryChain {
    async fn create_global_virtual_group(&self, req: CreateGvgRequest) -> ChainResult<u32> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Signer("injected create failure".to_string()));
        }
        let gvg_id = {
            let mut st = self.state.write();
            let family_id = if req.family_id == 0 {
                let id = st.next_family_id;
                st.next_family_id += 1;
                id
            } else {
                req.family_id
            };
            let gvg_id = st.next_gvg_id;
            st.next_gvg_id += 1;
            let staking = st.vg_params.initial_staking_size.max(req.deposit);
            let gvg = GlobalVirtualGroup {
                id: gvg_id,
                family_id,
                primary_sp_id: self.self_sp_id,
                secondary_sp_ids: req.secondary_sp_ids.clone(),
                secondary_endpoints: Vec::new(),
                stored_size: 0,
                staking_storage_size: staking,
            };
            let primary = self.self_sp_id;
            st.families
                .entry(family_id)
                .or_insert_with(|| VirtualGroupFamily {
                    id: family_id,
                    primary_sp_id: primary,
                    gvgs: BTreeMap::new(),
                })
                .gvgs
                .insert(gvg_id, gvg);
            gvg_id
        };
        debug!(gvg_id, family_id = req.family_id, "memory chain created gvg");
        self.calls.lock().push(SignerCall::CreateGvg {
            request: req,
            gvg_id,
        });
        Ok(gvg_id)
    }

    async fn delete_global_virtual_group(&self, gvg_id: u32) -> ChainResult<()> {
        let removed = {
            let mut st = self.state.write();
            let mut removed = false;
            for family in st.families.values_mut() {
                removed |= family.gvgs.remove(&gvg_id).is_some();
            }
            removed
        };
        if !removed {
            return Err(CollaboratorError::NotFound(format!("gvg {}", gvg_id)));
        }
        self.calls.lock().push(SignerCall::DeleteGvg(gvg_id));
        Ok(())
    }

    async fn deposit(&self, gvg_id: u32, amount: u64) -> ChainResult<()> {
        {
            let mut st = self.state.write();
            let gvg = st
                .families
                .values_mut()
                .find_map(|f| f.gvgs.get_mut(&gvg_id))
                .ok_or_else(|| CollaboratorError::NotFound(format!("gvg {}", gvg_id)))?;
            gvg.staking_storage_size = gvg.staking_storage_size.saturating_add(amount);
        }
        self.calls.lock().push(SignerCall::Deposit { gvg_id, amount });
        Ok(())
    }

    async fn seal_object(&self, req: SealObjectRequest) -> ChainResult<()> {
        self.calls.lock().push(SignerCall::Seal(req.clone()));
        if self.fail_seal.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Signer("injected seal failure".to_string()));
        }
        self.state.write().sealed.insert(req.object_id);
        Ok(())
    }

    async fn reject_unseal_object(&self, req: RejectUnsealRequest) -> ChainResult<()> {
        self.calls.lock().push(SignerCall::RejectUnseal(req));
        Ok(())
    }

    async fn complete_migrate_bucket(&self, req: CompleteMigrateBucketRequest) -> ChainResult<()> {
        self.calls.lock().push(SignerCall::CompleteMigrateBucket(req));
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MEMORY METADATA STORE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryMetadataStore {
    progress: RwLock<HashMap<u64, UploadProgress>>,
    checksums: RwLock<HashMap<(u64, i32), BTreeMap<u32, Vec<u8>>>>,
    checkpoints: RwLock<HashMap<TaskType, GcCheckpoint>>,
    events: Mutex<Vec<AuditEvent>>,
    objects_by_gvg: RwLock<HashMap<u32, Vec<ObjectInfo>>>,
    migrations: RwLock<HashMap<u64, BucketMigrationProgress>>,
    fail_writes: AtomicBool,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn add_object_to_gvg(&self, gvg_id: u32, object: ObjectInfo) {
        self.objects_by_gvg
            .write()
            .entry(gvg_id)
            .or_default()
            .push(object);
    }

    fn check_writes(&self) -> MetaResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Metadata("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_upload_progress(&self, progress: UploadProgress) -> MetaResult<()> {
        self.check_writes()?;
        self.progress.write().insert(progress.object_id, progress);
        Ok(())
    }

    async fn update_upload_progress(&self, progress: UploadProgress) -> MetaResult<()> {
        self.check_writes()?;
        self.progress.write().insert(progress.object_id, progress);
        Ok(())
    }

    async fn delete_upload_progress(&self, object_id: u64) -> MetaResult<()> {
        self.check_writes()?;
        self.progress.write().remove(&object_id);
        Ok(())
    }

    async fn get_upload_progress(&self, object_id: u64) -> MetaResult<Option<UploadProgress>> {
        Ok(self.progress.read().get(&object_id).cloned())
    }

    async fn set_replicate_piece_checksum(
        &self,
        object_id: u64,
        segment_idx: u32,
        redundancy_idx: i32,
        checksum: Vec<u8>,
    ) -> MetaResult<()> {
        self.check_writes()?;
        self.checksums
            .write()
            .entry((object_id, redundancy_idx))
            .or_default()
            .insert(segment_idx, checksum);
        Ok(())
    }

    async fn get_all_replicate_piece_checksums(
        &self,
        object_id: u64,
        redundancy_idx: i32,
        segment_count: u32,
    ) -> MetaResult<Vec<Vec<u8>>> {
        let map = self.checksums.read();
        let Some(per_segment) = map.get(&(object_id, redundancy_idx)) else {
            return Err(CollaboratorError::NotFound(format!(
                "checksums of object {} idx {}",
                object_id, redundancy_idx
            )));
        };
        (0..segment_count)
            .map(|seg| {
                per_segment.get(&seg).cloned().ok_or_else(|| {
                    CollaboratorError::NotFound(format!(
                        "checksum of object {} idx {} segment {}",
                        object_id, redundancy_idx, seg
                    ))
                })
            })
            .collect()
    }

    async fn delete_all_replicate_piece_checksums(&self, object_id: u64) -> MetaResult<()> {
        self.check_writes()?;
        self.checksums.write().retain(|(id, _), _| *id != object_id);
        Ok(())
    }

    async fn set_gc_checkpoint(&self, checkpoint: GcCheckpoint) -> MetaResult<()> {
        self.check_writes()?;
        self.checkpoints
            .write()
            .insert(checkpoint.task_type, checkpoint);
        Ok(())
    }

    async fn get_gc_checkpoint(&self, task_type: TaskType) -> MetaResult<Option<GcCheckpoint>> {
        Ok(self.checkpoints.read().get(&task_type).cloned())
    }

    async fn put_event(&self, event: AuditEvent) -> MetaResult<()> {
        self.check_writes()?;
        self.events.lock().push(event);
        Ok(())
    }

    async fn list_objects_by_gvg(&self, gvg_id: u32, limit: usize) -> MetaResult<Vec<ObjectInfo>> {
        Ok(self
            .objects_by_gvg
            .read()
            .get(&gvg_id)
            .map(|objs| objs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn set_bucket_migration_progress(
        &self,
        progress: BucketMigrationProgress,
    ) -> MetaResult<()> {
        self.check_writes()?;
        self.migrations.write().insert(progress.bucket_id, progress);
        Ok(())
    }

    async fn get_bucket_migration_progress(
        &self,
        bucket_id: u64,
    ) -> MetaResult<Option<BucketMigrationProgress>> {
        Ok(self.migrations.read().get(&bucket_id).cloned())
    }
}
