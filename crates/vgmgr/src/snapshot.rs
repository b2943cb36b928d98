//! Topology snapshot.
//!
//! A `Snapshot` is an immutable view of the chain as seen by this SP. Refresh
//! builds a complete replacement and the manager swaps it in under a write
//! lock, so readers always see one consistent generation.
//!
//! ```text
//!  TopologySource ──► Snapshot::build ──► Arc<Snapshot> ──► RwLock swap
//!                                              │
//!                           picks clone the Arc and release the lock
//! ```

use std::collections::BTreeMap;

use spnode_common::{
    GlobalVirtualGroup, StorageParams, StorageProvider, TopologySource, VirtualGroupFamily,
    VirtualGroupParams,
};

use crate::error::{Result, VgmError};

#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub self_sp: Option<StorageProvider>,
    /// Every SP except ourselves, by id.
    pub peers: BTreeMap<u32, StorageProvider>,
    /// Families whose primary is this SP.
    pub families: BTreeMap<u32, VirtualGroupFamily>,
    pub storage_params: StorageParams,
    pub vg_params: VirtualGroupParams,
    /// Unix seconds of the build, 0 for the placeholder before the first refresh.
    pub built_at: u64,
}

impl Snapshot {
    pub async fn build(source: &dyn TopologySource, self_sp_id: u32, now: u64) -> Result<Self> {
        let sps = source
            .list_storage_providers()
            .await
            .map_err(VgmError::Topology)?;
        let families = source
            .list_virtual_group_families(self_sp_id)
            .await
            .map_err(VgmError::Topology)?;
        let storage_params = source
            .query_storage_params()
            .await
            .map_err(VgmError::Topology)?;
        let vg_params = source
            .query_virtual_group_params()
            .await
            .map_err(VgmError::Topology)?;

        let mut self_sp = None;
        let mut peers = BTreeMap::new();
        for sp in sps {
            if sp.id == self_sp_id {
                self_sp = Some(sp);
            } else {
                peers.insert(sp.id, sp);
            }
        }
        if self_sp.is_none() {
            return Err(VgmError::StaledMetadata(format!(
                "self sp {} not registered on chain",
                self_sp_id
            )));
        }

        Ok(Self {
            self_sp,
            peers,
            families: families.into_iter().map(|f| (f.id, f)).collect(),
            storage_params,
            vg_params,
            built_at: now,
        })
    }

    pub fn is_built(&self) -> bool {
        self.built_at > 0
    }

    pub fn required_redundancy(&self) -> usize {
        self.storage_params.required_redundancy()
    }

    pub fn family(&self, family_id: u32) -> Option<&VirtualGroupFamily> {
        self.families.get(&family_id)
    }

    pub fn gvg(&self, gvg_id: u32) -> Option<&GlobalVirtualGroup> {
        self.families.values().find_map(|f| f.gvgs.get(&gvg_id))
    }

    pub fn gvgs(&self) -> impl Iterator<Item = &GlobalVirtualGroup> {
        self.families.values().flat_map(|f| f.gvgs.values())
    }

    /// Our GVGs in which `sp_id` serves as a secondary.
    pub fn gvgs_with_secondary(&self, sp_id: u32) -> Vec<u32> {
        self.gvgs()
            .filter(|g| g.contains_secondary(sp_id))
            .map(|g| g.id)
            .collect()
    }

    pub fn peer(&self, sp_id: u32) -> Option<&StorageProvider> {
        self.peers.get(&sp_id)
    }

    pub fn in_service_peers(&self) -> impl Iterator<Item = &StorageProvider> {
        self.peers.values().filter(|sp| sp.in_service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spnode_common::MemoryChain;

    fn sp(id: u32, in_service: bool) -> StorageProvider {
        StorageProvider {
            id,
            operator_address: format!("0xsp{}", id),
            endpoint: format!("http://sp{}", id),
            bls_public_key: vec![],
            in_service,
        }
    }

    #[tokio::test]
    async fn test_build_splits_self_from_peers() {
        let chain = MemoryChain::new(1);
        chain.add_sp(sp(1, true));
        chain.add_sp(sp(2, true));
        chain.add_sp(sp(3, false));
        chain.add_gvg(GlobalVirtualGroup {
            id: 7,
            family_id: 4,
            primary_sp_id: 1,
            secondary_sp_ids: vec![2, 3],
            secondary_endpoints: vec![],
            stored_size: 0,
            staking_storage_size: 100,
        });

        let snap = Snapshot::build(&chain, 1, 50).await.unwrap();
        assert!(snap.is_built());
        assert_eq!(snap.self_sp.as_ref().map(|s| s.id), Some(1));
        assert_eq!(snap.peers.len(), 2);
        assert_eq!(snap.in_service_peers().count(), 1);
        assert_eq!(snap.gvg(7).map(|g| g.family_id), Some(4));
        assert_eq!(snap.gvgs_with_secondary(3), vec![7]);
        assert!(snap.gvgs_with_secondary(9).is_empty());
    }

    #[tokio::test]
    async fn test_build_without_self_is_staled() {
        let chain = MemoryChain::new(1);
        chain.add_sp(sp(2, true));
        assert!(matches!(
            Snapshot::build(&chain, 1, 1).await,
            Err(VgmError::StaledMetadata(_))
        ));
    }

    #[tokio::test]
    async fn test_build_propagates_read_failure() {
        let chain = MemoryChain::new(1);
        chain.fail_reads(true);
        assert!(matches!(
            Snapshot::build(&chain, 1, 1).await,
            Err(VgmError::Topology(_))
        ));
    }

    #[test]
    fn test_default_is_unbuilt() {
        assert!(!Snapshot::default().is_built());
    }
}
