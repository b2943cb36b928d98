//! # Topology Types
//!
//! Storage providers, virtual-group families and global virtual groups as
//! seen by this node, plus the object and storage parameters that drive
//! replication.
//!
//! ## Relationships
//!
//! ```text
//! VirtualGroupFamily (primary SP = us)
//!   ├── GlobalVirtualGroup #1  [secondary_0, secondary_1, ..., secondary_n]
//!   ├── GlobalVirtualGroup #2  [...]
//!   └── ...
//! ```
//!
//! A secondary's position inside `secondary_sp_ids` is its redundancy
//! index. Positions are fixed for the life of the GVG and never reordered.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// A group stays writable while `used < USAGE_THRESHOLD_PERCENT% of staking`.
pub const USAGE_THRESHOLD_PERCENT: u128 = 95;

// ════════════════════════════════════════════════════════════════════════════
// STORAGE PROVIDER
// ════════════════════════════════════════════════════════════════════════════

/// A storage provider registered on chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageProvider {
    pub id: u32,
    pub operator_address: String,
    /// Base URL, e.g. `https://sp3.example.net`.
    pub endpoint: String,
    /// Compressed BLS12-381 G1 public key (48 bytes).
    #[serde(default)]
    pub bls_public_key: Vec<u8>,
    pub in_service: bool,
}

// ════════════════════════════════════════════════════════════════════════════
// GLOBAL VIRTUAL GROUP
// ════════════════════════════════════════════════════════════════════════════

/// One primary plus an ordered set of secondaries jointly storing a
/// redundancy group of objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVirtualGroup {
    pub id: u32,
    pub family_id: u32,
    pub primary_sp_id: u32,
    pub secondary_sp_ids: Vec<u32>,
    /// Resolved from the provider list when the topology snapshot is built.
    #[serde(default)]
    pub secondary_endpoints: Vec<String>,
    pub stored_size: u64,
    pub staking_storage_size: u64,
}

impl GlobalVirtualGroup {
    /// Whether new writes may still land on this group.
    pub fn below_usage_threshold(&self) -> bool {
        below_usage_threshold(self.stored_size, self.staking_storage_size)
    }

    /// Redundancy index of `sp_id`, if it is one of the secondaries.
    pub fn redundancy_index_of(&self, sp_id: u32) -> Option<usize> {
        self.secondary_sp_ids.iter().position(|id| *id == sp_id)
    }

    pub fn contains_secondary(&self, sp_id: u32) -> bool {
        self.redundancy_index_of(sp_id).is_some()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// VIRTUAL GROUP FAMILY
// ════════════════════════════════════════════════════════════════════════════

/// Collection of GVGs sharing one primary's capacity pool.
///
/// `used()` and `staking()` are aggregates over the member GVGs, so they
/// can never drift from the members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualGroupFamily {
    pub id: u32,
    pub primary_sp_id: u32,
    pub gvgs: BTreeMap<u32, GlobalVirtualGroup>,
}

impl VirtualGroupFamily {
    pub fn used(&self) -> u64 {
        self.gvgs.values().map(|g| g.stored_size).sum()
    }

    pub fn staking(&self) -> u64 {
        self.gvgs.values().map(|g| g.staking_storage_size).sum()
    }

    pub fn below_usage_threshold(&self) -> bool {
        below_usage_threshold(self.used(), self.staking())
    }
}

/// `used < 0.95 × staking`, evaluated in integer arithmetic so that the
/// boundary is exact. A zero-staking group is never eligible.
pub fn below_usage_threshold(used: u64, staking: u64) -> bool {
    if staking == 0 {
        return false;
    }
    (used as u128) * 100 < (staking as u128) * USAGE_THRESHOLD_PERCENT
}

// ════════════════════════════════════════════════════════════════════════════
// OBJECT & PARAMS
// ════════════════════════════════════════════════════════════════════════════

/// How an object's segments are spread across the secondaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundancyType {
    /// Each segment is split into data + parity shards, shard `i` to secondary `i`.
    ErasureCode,
    /// Every secondary receives every full segment.
    Replica,
}

/// Chain-level storage parameters relevant to replication.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageParams {
    pub max_segment_size: u64,
    pub redundant_data_chunk_num: u32,
    pub redundant_parity_chunk_num: u32,
}

impl StorageParams {
    /// Number of secondaries every GVG must have (data + parity).
    pub fn required_redundancy(&self) -> usize {
        (self.redundant_data_chunk_num + self.redundant_parity_chunk_num) as usize
    }
}

impl Default for StorageParams {
    fn default() -> Self {
        Self {
            max_segment_size: 16 * 1024 * 1024,
            redundant_data_chunk_num: 4,
            redundant_parity_chunk_num: 2,
        }
    }
}

/// Chain-level virtual group parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualGroupParams {
    /// Staking storage size added to a GVG by one top-up deposit.
    pub deposit_increment: u64,
    /// Staking storage size a freshly created GVG starts with.
    pub initial_staking_size: u64,
}

impl Default for VirtualGroupParams {
    fn default() -> Self {
        Self {
            deposit_increment: 1 << 30,
            initial_staking_size: 1 << 32,
        }
    }
}

/// The subset of on-chain object metadata the pipeline needs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: u64,
    pub bucket_id: u64,
    pub bucket_name: String,
    pub object_name: String,
    pub payload_size: u64,
    pub redundancy: RedundancyType,
    /// Root over the primary and per-index integrity hashes declared at creation.
    #[serde(default)]
    pub checksum_root: Vec<u8>,
    /// Family the bucket is bound to.
    pub bucket_vgf_id: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvg(id: u32, used: u64, staking: u64) -> GlobalVirtualGroup {
        GlobalVirtualGroup {
            id,
            family_id: 1,
            primary_sp_id: 1,
            secondary_sp_ids: vec![2, 3, 4],
            secondary_endpoints: vec![],
            stored_size: used,
            staking_storage_size: staking,
        }
    }

    #[test]
    fn test_threshold_exactly_95_percent_is_excluded() {
        assert!(!below_usage_threshold(9_500, 10_000));
    }

    #[test]
    fn test_threshold_94_99_percent_is_eligible() {
        assert!(below_usage_threshold(9_499, 10_000));
    }

    #[test]
    fn test_threshold_zero_staking_is_excluded() {
        assert!(!below_usage_threshold(0, 0));
    }

    #[test]
    fn test_threshold_no_overflow_at_u64_max() {
        assert!(!below_usage_threshold(u64::MAX, u64::MAX));
        assert!(below_usage_threshold(0, u64::MAX));
    }

    #[test]
    fn test_vgf_aggregates_follow_members() {
        let mut vgf = VirtualGroupFamily {
            id: 1,
            primary_sp_id: 1,
            gvgs: BTreeMap::new(),
        };
        vgf.gvgs.insert(1, gvg(1, 100, 1_000));
        vgf.gvgs.insert(2, gvg(2, 300, 1_000));
        assert_eq!(vgf.used(), 400);
        assert_eq!(vgf.staking(), 2_000);
        assert!(vgf.below_usage_threshold());
    }

    #[test]
    fn test_redundancy_index_of() {
        let g = gvg(1, 0, 1);
        assert_eq!(g.redundancy_index_of(3), Some(1));
        assert_eq!(g.redundancy_index_of(9), None);
        assert!(g.contains_secondary(4));
    }

    #[test]
    fn test_required_redundancy() {
        let p = StorageParams::default();
        assert_eq!(p.required_redundancy(), 6);
    }
}
