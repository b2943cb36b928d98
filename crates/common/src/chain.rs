//! # Chain Collaborators
//!
//! Narrow interfaces to the chain. Reads go through [`TopologySource`] and
//! feed the virtual group manager's refresh; writes go through [`Signer`],
//! which owns private keys and nonces.
//!
//! ```text
//!                   ┌──────────────────┐
//!   VGM refresh ───►│  TopologySource  │  list SPs / VGFs / GVGs, params, height
//!                   └──────────────────┘
//!                   ┌──────────────────┐
//!   manager/exec ──►│      Signer      │  create/delete GVG, deposit, seal, ...
//!                   └──────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::topology::{
    GlobalVirtualGroup, StorageParams, StorageProvider, VirtualGroupFamily, VirtualGroupParams,
};

pub type ChainResult<T> = Result<T, CollaboratorError>;

/// Read-only chain queries.
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn list_storage_providers(&self) -> ChainResult<Vec<StorageProvider>>;

    /// Families whose primary is `primary_sp_id`, with their member GVGs.
    async fn list_virtual_group_families(
        &self,
        primary_sp_id: u32,
    ) -> ChainResult<Vec<VirtualGroupFamily>>;

    /// Live state of one GVG, `None` if it no longer exists.
    async fn query_global_virtual_group(
        &self,
        gvg_id: u32,
    ) -> ChainResult<Option<GlobalVirtualGroup>>;

    async fn query_storage_params(&self) -> ChainResult<StorageParams>;

    async fn query_virtual_group_params(&self) -> ChainResult<VirtualGroupParams>;

    async fn current_block_height(&self) -> ChainResult<u64>;

    /// Whether the object is already sealed on chain.
    async fn is_object_sealed(&self, object_id: u64) -> ChainResult<bool>;
}

// ════════════════════════════════════════════════════════════════════════════
// SIGNER REQUESTS
// ════════════════════════════════════════════════════════════════════════════

/// Create a GVG; `family_id == 0` asks the chain to open a new family.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateGvgRequest {
    pub family_id: u32,
    pub secondary_sp_ids: Vec<u32>,
    pub deposit: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealObjectRequest {
    pub object_id: u64,
    pub bucket_name: String,
    pub object_name: String,
    pub gvg_id: u32,
    /// BLS aggregate over the secondaries' seal signatures.
    pub secondary_signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectUnsealRequest {
    pub object_id: u64,
    pub bucket_name: String,
    pub object_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMigrateBucketRequest {
    pub bucket_id: u64,
    pub bucket_name: String,
    pub gvg_family_id: u32,
    /// Source GVG id → destination GVG id.
    pub gvg_mappings: Vec<(u32, u32)>,
}

/// Transaction broadcaster.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Returns the new GVG id.
    async fn create_global_virtual_group(&self, req: CreateGvgRequest) -> ChainResult<u32>;

    async fn delete_global_virtual_group(&self, gvg_id: u32) -> ChainResult<()>;

    /// Increases the GVG's staking storage by depositing `amount`.
    async fn deposit(&self, gvg_id: u32, amount: u64) -> ChainResult<()>;

    async fn seal_object(&self, req: SealObjectRequest) -> ChainResult<()>;

    async fn reject_unseal_object(&self, req: RejectUnsealRequest) -> ChainResult<()>;

    async fn complete_migrate_bucket(&self, req: CompleteMigrateBucketRequest) -> ChainResult<()>;
}
