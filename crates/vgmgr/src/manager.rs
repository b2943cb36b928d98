//! # Virtual Group Manager
//!
//! Placement allocator of this SP. Answers pick queries against the current
//! topology snapshot and keeps the freeze pool, health state and GVG
//! lifecycle up to date in background loops.
//!
//! ## Background Loops
//!
//! | Loop | Interval | Action |
//! |------|----------|--------|
//! | refresh | `refresh_interval_secs` | rebuild snapshot, observe empty GVGs, spawn top-ups |
//! | health | `health_check_interval_secs` | probe peers, flip health under the floor |
//! | freeze release | `freeze_release_interval_secs` | release expired freeze entries |
//! | gvg gc | `gvg_gc_interval_secs` | delete GVGs empty past the safe period |
//!
//! Every loop exits when the `CancellationToken` passed to [`VirtualGroupManager::start`]
//! is cancelled.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use spnode_common::{
    Clock, CreateGvgRequest, GlobalVirtualGroup, Signer, StorageProvider, TopologySource,
    VgmConfig, VirtualGroupFamily,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, VgmError};
use crate::freeze::FreezeSpPool;
use crate::health::{HealthChecker, HealthProbe};
use crate::lifecycle::{EmptyGvgTracker, StakeTopUp};
use crate::pick::{free_capacity_weight, pick_weighted};
use crate::policy::{select_secondaries, SpPickPolicy};
use crate::snapshot::Snapshot;

pub struct VirtualGroupManager {
    self_sp_id: u32,
    config: VgmConfig,
    source: Arc<dyn TopologySource>,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    snapshot: RwLock<Arc<Snapshot>>,
    freeze: FreezeSpPool,
    health: Option<HealthChecker>,
    empty_gvgs: EmptyGvgTracker,
    top_up: Arc<StakeTopUp>,
    rng: Mutex<ChaCha20Rng>,
}

impl VirtualGroupManager {
    pub fn new(
        config: VgmConfig,
        self_sp_id: u32,
        source: Arc<dyn TopologySource>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            self_sp_id,
            freeze: FreezeSpPool::new(config.freeze_secs),
            empty_gvgs: EmptyGvgTracker::new(config.empty_gvg_safe_delete_secs),
            config,
            source,
            signer,
            clock,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            health: None,
            top_up: Arc::new(StakeTopUp::new()),
            rng: Mutex::new(ChaCha20Rng::from_entropy()),
        }
    }

    /// Enables health checking with `probe`. Ignored when disabled in config.
    pub fn with_health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        if self.config.enable_health_check {
            self.health = Some(HealthChecker::from_config(probe, &self.config));
        }
        self
    }

    /// Fixes the pick RNG seed for reproducible placement.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock() = ChaCha20Rng::seed_from_u64(seed);
        self
    }

    pub fn self_sp_id(&self) -> u32 {
        self.self_sp_id
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn freeze_pool(&self) -> &FreezeSpPool {
        &self.freeze
    }

    pub fn health_checker(&self) -> Option<&HealthChecker> {
        self.health.as_ref()
    }

    // ════════════════════════════════════════════════════════════════════════
    // REFRESH
    // ════════════════════════════════════════════════════════════════════════

    /// Rebuilds the snapshot and swaps it in.
    pub async fn refresh(&self) -> Result<()> {
        let now = self.clock.now();
        let snap = Arc::new(Snapshot::build(self.source.as_ref(), self.self_sp_id, now).await?);

        if self.config.enable_empty_gvg_gc {
            self.empty_gvgs.observe(snap.gvgs(), now);
        }
        if self.config.enable_stake_top_up {
            let amount = snap.vg_params.deposit_increment;
            for g in snap.gvgs().filter(|g| !g.below_usage_threshold()) {
                if self
                    .top_up
                    .spawn_deposit(Arc::clone(&self.signer), g.id, amount)
                    .is_some()
                {
                    debug!(gvg_id = g.id, "spawned stake top-up");
                }
            }
        }

        debug!(
            families = snap.families.len(),
            peers = snap.peers.len(),
            "topology snapshot refreshed"
        );
        *self.snapshot.write() = snap;
        Ok(())
    }

    pub async fn force_refresh(&self) -> Result<()> {
        self.refresh().await
    }

    fn built_snapshot(&self) -> Result<Arc<Snapshot>> {
        let snap = self.snapshot();
        if !snap.is_built() {
            return Err(VgmError::StaledMetadata("snapshot not built yet".to_string()));
        }
        Ok(snap)
    }

    // ════════════════════════════════════════════════════════════════════════
    // PICK
    // ════════════════════════════════════════════════════════════════════════

    fn gvg_usable(&self, g: &GlobalVirtualGroup) -> bool {
        if self.freeze.is_gvg_frozen(g.id) {
            return false;
        }
        if g.secondary_sp_ids.iter().any(|id| self.freeze.is_sp_frozen(*id)) {
            return false;
        }
        self.health.as_ref().map_or(true, |h| h.is_gvg_healthy(g))
    }

    fn vgf_usable(&self, f: &VirtualGroupFamily) -> bool {
        self.health.as_ref().map_or(true, |h| h.is_vgf_healthy(f))
    }

    /// Weighted pick among our families passing `filter`.
    pub fn pick_virtual_group_family(
        &self,
        filter: &dyn Fn(&VirtualGroupFamily) -> bool,
    ) -> Result<VirtualGroupFamily> {
        let snap = self.built_snapshot()?;
        let candidates: Vec<(&VirtualGroupFamily, u64)> = snap
            .families
            .values()
            .filter(|f| filter(*f) && self.vgf_usable(f))
            .filter_map(|f| free_capacity_weight(f.used(), f.staking()).map(|w| (f, w)))
            .collect();
        let picked = pick_weighted(candidates, &mut *self.rng.lock()).cloned();
        picked.ok_or(VgmError::FailedPickVgf)
    }

    /// Weighted pick among the usable GVGs of `vgf_id` not matched by `exclude`.
    pub fn pick_global_virtual_group(
        &self,
        vgf_id: u32,
        exclude: &dyn Fn(&GlobalVirtualGroup) -> bool,
    ) -> Result<GlobalVirtualGroup> {
        let snap = self.built_snapshot()?;
        let family = snap
            .family(vgf_id)
            .ok_or(VgmError::FailedPickGvg { family_id: vgf_id })?;
        self.pick_in_family(family, exclude)
            .ok_or(VgmError::FailedPickGvg { family_id: vgf_id })
    }

    fn pick_in_family(
        &self,
        family: &VirtualGroupFamily,
        exclude: &dyn Fn(&GlobalVirtualGroup) -> bool,
    ) -> Option<GlobalVirtualGroup> {
        let candidates: Vec<(&GlobalVirtualGroup, u64)> = family
            .gvgs
            .values()
            .filter(|g| !exclude(*g) && self.gvg_usable(g))
            .filter_map(|g| {
                free_capacity_weight(g.stored_size, g.staking_storage_size).map(|w| (g, w))
            })
            .collect();
        let picked = pick_weighted(candidates, &mut *self.rng.lock());
        picked.cloned()
    }

    /// First family (in id order) passing `family_filter` that yields a GVG
    /// passing `gvg_filter`.
    pub fn pick_gvg_for_bucket_migrate(
        &self,
        family_filter: &dyn Fn(&VirtualGroupFamily) -> bool,
        gvg_filter: &dyn Fn(&GlobalVirtualGroup) -> bool,
    ) -> Result<GlobalVirtualGroup> {
        let snap = self.built_snapshot()?;
        snap.families
            .values()
            .filter(|f| family_filter(*f))
            .find_map(|f| self.pick_in_family(f, &|g: &GlobalVirtualGroup| !gvg_filter(g)))
            .ok_or(VgmError::FailedPickVgf)
    }

    fn eligible_peers(&self, snap: &Snapshot) -> Vec<StorageProvider> {
        snap.in_service_peers()
            .filter(|sp| !self.config.sp_black_list.contains(&sp.id))
            .filter(|sp| !self.freeze.is_sp_frozen(sp.id))
            .filter(|sp| self.health.as_ref().map_or(true, |h| h.is_sp_healthy(sp.id)))
            .cloned()
            .collect()
    }

    /// Uniform pick among eligible peers passing `filter`.
    pub fn pick_dest_sp(&self, filter: &dyn Fn(&StorageProvider) -> bool) -> Result<StorageProvider> {
        let snap = self.built_snapshot()?;
        let candidates: Vec<(StorageProvider, u64)> = self
            .eligible_peers(&snap)
            .into_iter()
            .filter(|sp| filter(sp))
            .map(|sp| (sp, 1))
            .collect();
        let picked = pick_weighted(candidates, &mut *self.rng.lock());
        picked.ok_or(VgmError::FailedPickDestSp)
    }

    /// Secondary SP set for a new GVG: eligible peers minus `exclude`,
    /// ordered by `policy` and truncated to the required redundancy.
    pub fn generate_gvg_meta(
        &self,
        policy: &dyn SpPickPolicy,
        exclude: &dyn Fn(&StorageProvider) -> bool,
    ) -> Result<Vec<StorageProvider>> {
        let snap = self.built_snapshot()?;
        let candidates: Vec<StorageProvider> = self
            .eligible_peers(&snap)
            .into_iter()
            .filter(|sp| !exclude(sp))
            .collect();
        let mut rng = self.rng.lock();
        select_secondaries(policy, candidates, snap.required_redundancy(), &mut *rng)
    }

    // ════════════════════════════════════════════════════════════════════════
    // CHAIN RESOURCES
    // ════════════════════════════════════════════════════════════════════════

    /// Stakes a new GVG. `family_id == 0` opens a new family. Refreshes the
    /// snapshot so the new GVG is immediately pickable.
    pub async fn create_global_virtual_group(
        &self,
        family_id: u32,
        policy: &dyn SpPickPolicy,
    ) -> Result<u32> {
        let secondaries = self.generate_gvg_meta(policy, &|_| false)?;
        let deposit = self.snapshot().vg_params.initial_staking_size;
        let req = CreateGvgRequest {
            family_id,
            secondary_sp_ids: secondaries.iter().map(|sp| sp.id).collect(),
            deposit,
        };
        let gvg_id = self
            .signer
            .create_global_virtual_group(req)
            .await
            .map_err(VgmError::Signer)?;
        info!(gvg_id, family_id, "created global virtual group");
        self.force_refresh().await?;
        Ok(gvg_id)
    }

    // ════════════════════════════════════════════════════════════════════════
    // FREEZE & HEALTH
    // ════════════════════════════════════════════════════════════════════════

    pub fn freeze_sp_and_gvgs(&self, sp_id: u32, gvg_ids: &[u32]) {
        self.freeze.freeze_sp_and_gvgs(sp_id, gvg_ids, self.clock.now());
    }

    /// Freezes a failing secondary together with every GVG of ours it serves in.
    pub fn freeze_failed_secondary(&self, sp_id: u32) -> Vec<u32> {
        let gvgs = self.snapshot().gvgs_with_secondary(sp_id);
        self.freeze_sp_and_gvgs(sp_id, &gvgs);
        gvgs
    }

    pub fn release_expired_freezes(&self) -> usize {
        let snap = self.snapshot();
        let peers: BTreeSet<u32> = snap.in_service_peers().map(|sp| sp.id).collect();
        self.freeze
            .release_expired(self.clock.now(), &peers, snap.required_redundancy())
    }

    pub async fn run_health_check_once(&self) {
        let Some(health) = self.health.as_ref() else {
            return;
        };
        let snap = self.snapshot();
        let peers: Vec<StorageProvider> = snap.in_service_peers().cloned().collect();
        health.run_once(&peers, snap.required_redundancy()).await;
    }

    pub async fn run_gvg_gc_once(&self) -> Result<Vec<u32>> {
        if !self.config.enable_empty_gvg_gc {
            return Ok(Vec::new());
        }
        let deleted = self
            .empty_gvgs
            .collect(self.source.as_ref(), self.signer.as_ref(), self.clock.now())
            .await?;
        if !deleted.is_empty() {
            self.force_refresh().await?;
        }
        Ok(deleted)
    }

    // ════════════════════════════════════════════════════════════════════════
    // LOOPS
    // ════════════════════════════════════════════════════════════════════════

    /// Spawns the background loops. They stop when `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(spawn_loop(
            "vgm-refresh",
            Duration::from_secs(self.config.refresh_interval_secs),
            cancel.clone(),
            Arc::clone(&self),
            |vgm| async move {
                if let Err(e) = vgm.refresh().await {
                    warn!(error = %e, "topology refresh failed");
                }
            },
        ));

        handles.push(spawn_loop(
            "vgm-freeze-release",
            Duration::from_secs(self.config.freeze_release_interval_secs),
            cancel.clone(),
            Arc::clone(&self),
            |vgm| async move {
                vgm.release_expired_freezes();
            },
        ));

        if self.health.is_some() {
            handles.push(spawn_loop(
                "vgm-health",
                Duration::from_secs(self.config.health_check_interval_secs),
                cancel.clone(),
                Arc::clone(&self),
                |vgm| async move { vgm.run_health_check_once().await },
            ));
        }

        if self.config.enable_empty_gvg_gc {
            handles.push(spawn_loop(
                "vgm-gvg-gc",
                Duration::from_secs(self.config.gvg_gc_interval_secs),
                cancel,
                Arc::clone(&self),
                |vgm| async move {
                    if let Err(e) = vgm.run_gvg_gc_once().await {
                        warn!(error = %e, "empty gvg gc failed");
                    }
                },
            ));
        }

        handles
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    vgm: Arc<VirtualGroupManager>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<VirtualGroupManager>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(name, interval_secs = interval.as_secs(), "vgm loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(name, "vgm loop stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    tick(Arc::clone(&vgm)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RandomPolicy;
    use spnode_common::{ManualClock, MemoryChain, StorageParams};
    use std::collections::HashSet;

    fn sp(id: u32) -> StorageProvider {
        StorageProvider {
            id,
            operator_address: format!("0xsp{}", id),
            endpoint: format!("http://sp{}", id),
            bls_public_key: vec![],
            in_service: true,
        }
    }

    fn gvg(id: u32, family_id: u32, secondaries: Vec<u32>, used: u64, staking: u64) -> GlobalVirtualGroup {
        GlobalVirtualGroup {
            id,
            family_id,
            primary_sp_id: 1,
            secondary_sp_ids: secondaries,
            secondary_endpoints: vec![],
            stored_size: used,
            staking_storage_size: staking,
        }
    }

    fn chain() -> Arc<MemoryChain> {
        let chain = Arc::new(MemoryChain::new(1));
        for id in 1..=6 {
            chain.add_sp(sp(id));
        }
        chain.set_storage_params(StorageParams {
            max_segment_size: 1 << 20,
            redundant_data_chunk_num: 2,
            redundant_parity_chunk_num: 1,
        });
        chain
    }

    fn vgm(chain: &Arc<MemoryChain>, clock: Arc<ManualClock>, cfg: VgmConfig) -> VirtualGroupManager {
        VirtualGroupManager::new(cfg, 1, chain.clone(), chain.clone(), clock).with_rng_seed(5)
    }

    fn quiet_config() -> VgmConfig {
        VgmConfig {
            enable_health_check: false,
            enable_stake_top_up: false,
            ..VgmConfig::default()
        }
    }

    // ──── PICK ────

    #[tokio::test]
    async fn test_pick_before_refresh_is_staled() {
        let c = chain();
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        assert!(matches!(
            m.pick_virtual_group_family(&|_| true),
            Err(VgmError::StaledMetadata(_))
        ));
    }

    #[tokio::test]
    async fn test_threshold_boundary_gvg_never_picked() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 9_500, 10_000));
        c.add_gvg(gvg(2, 1, vec![3, 4, 5], 9_499, 10_000));
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        for _ in 0..200 {
            assert_eq!(m.pick_global_virtual_group(1, &|_| false).unwrap().id, 2);
        }
    }

    #[tokio::test]
    async fn test_full_family_fails_pick() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 9_500, 10_000));
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        assert_eq!(m.pick_virtual_group_family(&|_| true).unwrap_err(), VgmError::FailedPickVgf);
        assert_eq!(
            m.pick_global_virtual_group(1, &|_| false).unwrap_err(),
            VgmError::FailedPickGvg { family_id: 1 }
        );
    }

    #[tokio::test]
    async fn test_exclude_filter_applies() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 0, 10_000));
        c.add_gvg(gvg(2, 1, vec![3, 4, 5], 0, 10_000));
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        for _ in 0..50 {
            assert_eq!(m.pick_global_virtual_group(1, &|g| g.id == 1).unwrap().id, 2);
        }
    }

    #[tokio::test]
    async fn test_bucket_migrate_walks_families() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 0, 10_000));
        c.add_gvg(gvg(5, 2, vec![4, 5, 6], 0, 10_000));
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        let g = m
            .pick_gvg_for_bucket_migrate(&|_| true, &|g| g.secondary_sp_ids.contains(&6))
            .unwrap();
        assert_eq!(g.id, 5);
        assert!(m
            .pick_gvg_for_bucket_migrate(&|f| f.id == 1, &|g| g.secondary_sp_ids.contains(&6))
            .is_err());
    }

    #[tokio::test]
    async fn test_pick_dest_sp_skips_blacklist_and_frozen() {
        let c = chain();
        let cfg = VgmConfig {
            sp_black_list: vec![2, 3],
            ..quiet_config()
        };
        let m = vgm(&c, Arc::new(ManualClock::new(10)), cfg);
        m.refresh().await.unwrap();
        m.freeze_sp_and_gvgs(4, &[]);
        for _ in 0..50 {
            let sp = m.pick_dest_sp(&|_| true).unwrap();
            assert!(sp.id == 5 || sp.id == 6);
        }
        assert_eq!(
            m.pick_dest_sp(&|sp| sp.id == 2).unwrap_err(),
            VgmError::FailedPickDestSp
        );
    }

    // ──── FREEZE ────

    #[tokio::test]
    async fn test_freeze_then_repick_avoids_failed_sp_until_expiry() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 0, 10_000));
        c.add_gvg(gvg(2, 1, vec![3, 5, 6], 0, 10_000));
        let clock = Arc::new(ManualClock::new(1_000));
        let cfg = VgmConfig {
            freeze_secs: 300,
            ..quiet_config()
        };
        let m = vgm(&c, clock.clone(), cfg);
        m.refresh().await.unwrap();

        // Secondary SP 2 failed while replicating into GVG 1.
        assert_eq!(m.freeze_failed_secondary(2), vec![1]);
        for _ in 0..100 {
            let g = m.pick_global_virtual_group(1, &|_| false).unwrap();
            assert!(!g.secondary_sp_ids.contains(&2));
        }

        clock.advance(300);
        assert_eq!(m.release_expired_freezes(), 1);
        let mut seen_gvg1 = false;
        for _ in 0..100 {
            seen_gvg1 |= m.pick_global_virtual_group(1, &|_| false).unwrap().id == 1;
        }
        assert!(seen_gvg1);
    }

    #[tokio::test]
    async fn test_generate_meta_excludes_frozen_and_respects_count() {
        let c = chain();
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        m.freeze_sp_and_gvgs(2, &[]);
        let picked = m.generate_gvg_meta(&RandomPolicy, &|sp| sp.id == 3).unwrap();
        let ids: Vec<u32> = picked.iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&1) && !ids.contains(&2) && !ids.contains(&3));
    }

    // ──── HEALTH ────

    /// Endpoints listed in `down` are reported unreachable.
    struct SwitchedEndpoints {
        down: Mutex<HashSet<String>>,
    }

    #[async_trait::async_trait]
    impl HealthProbe for SwitchedEndpoints {
        async fn probe(&self, endpoint: &str) -> bool {
            !self.down.lock().contains(endpoint)
        }
    }

    #[tokio::test]
    async fn test_pick_skips_groups_with_unhealthy_secondary() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 0, 10_000));
        c.add_gvg(gvg(2, 1, vec![3, 5, 6], 0, 10_000));
        c.add_gvg(gvg(5, 2, vec![2, 4, 5], 0, 10_000));
        let endpoints = Arc::new(SwitchedEndpoints {
            down: Mutex::new(HashSet::new()),
        });
        let cfg = VgmConfig {
            enable_health_check: true,
            enable_stake_top_up: false,
            health_check_attempts: 1,
            health_check_retry_delay_ms: 0,
            health_check_timeout_ms: 1_000,
            ..VgmConfig::default()
        };
        let m = vgm(&c, Arc::new(ManualClock::new(10)), cfg).with_health_probe(endpoints.clone());
        m.refresh().await.unwrap();

        endpoints.down.lock().insert("http://sp2".to_string());
        m.run_health_check_once().await;
        assert_eq!(m.health_checker().unwrap().unhealthy_sp_ids(), vec![2]);

        for _ in 0..100 {
            assert_eq!(m.pick_global_virtual_group(1, &|_| false).unwrap().id, 2);
            assert_eq!(m.pick_virtual_group_family(&|_| true).unwrap().id, 1);
        }
        assert_eq!(
            m.pick_global_virtual_group(2, &|_| false).unwrap_err(),
            VgmError::FailedPickGvg { family_id: 2 }
        );

        endpoints.down.lock().clear();
        m.run_health_check_once().await;
        assert!(m.health_checker().unwrap().unhealthy_sp_ids().is_empty());
        assert_eq!(m.pick_global_virtual_group(2, &|_| false).unwrap().id, 5);
        let mut seen_gvg1 = false;
        let mut seen_vgf2 = false;
        for _ in 0..100 {
            seen_gvg1 |= m.pick_global_virtual_group(1, &|_| false).unwrap().id == 1;
            seen_vgf2 |= m.pick_virtual_group_family(&|_| true).unwrap().id == 2;
        }
        assert!(seen_gvg1 && seen_vgf2);
    }

    // ──── CHAIN RESOURCES ────

    #[tokio::test]
    async fn test_create_gvg_then_pickable() {
        let c = chain();
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        assert_eq!(m.pick_virtual_group_family(&|_| true).unwrap_err(), VgmError::FailedPickVgf);

        let gvg_id = m.create_global_virtual_group(0, &RandomPolicy).await.unwrap();
        let vgf = m.pick_virtual_group_family(&|_| true).unwrap();
        let g = m.pick_global_virtual_group(vgf.id, &|_| false).unwrap();
        assert_eq!(g.id, gvg_id);
        assert_eq!(g.secondary_sp_ids.len(), 3);
    }

    #[tokio::test]
    async fn test_create_failure_is_signer_error() {
        let c = chain();
        c.fail_create(true);
        let m = vgm(&c, Arc::new(ManualClock::new(10)), quiet_config());
        m.refresh().await.unwrap();
        assert!(matches!(
            m.create_global_virtual_group(0, &RandomPolicy).await,
            Err(VgmError::Signer(_))
        ));
    }

    // ──── LIFECYCLE ────

    #[tokio::test]
    async fn test_refresh_spawns_top_up_for_full_gvg() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 9_600, 10_000));
        let cfg = VgmConfig {
            enable_stake_top_up: true,
            enable_health_check: false,
            ..VgmConfig::default()
        };
        let m = vgm(&c, Arc::new(ManualClock::new(10)), cfg);
        m.refresh().await.unwrap();
        // Let the spawned deposit run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(c.gvg(1).unwrap().staking_storage_size > 10_000);
    }

    #[tokio::test]
    async fn test_empty_gvg_deleted_after_safe_period() {
        let c = chain();
        c.add_gvg(gvg(1, 1, vec![2, 3, 4], 0, 10_000));
        let clock = Arc::new(ManualClock::new(1_000));
        let cfg = VgmConfig {
            empty_gvg_safe_delete_secs: 86_400,
            ..quiet_config()
        };
        let m = vgm(&c, clock.clone(), cfg);
        m.refresh().await.unwrap();
        assert!(m.run_gvg_gc_once().await.unwrap().is_empty());

        clock.advance(86_400);
        assert_eq!(m.run_gvg_gc_once().await.unwrap(), vec![1]);
        assert!(m.snapshot().gvg(1).is_none());
    }

    #[tokio::test]
    async fn test_loops_stop_on_cancel() {
        let c = chain();
        let cfg = VgmConfig {
            refresh_interval_secs: 1,
            ..quiet_config()
        };
        let m = Arc::new(vgm(&c, Arc::new(ManualClock::new(10)), cfg));
        let cancel = CancellationToken::new();
        let handles = Arc::clone(&m).start(cancel.clone());
        cancel.cancel();
        for h in handles {
            h.await.unwrap();
        }
    }
}
