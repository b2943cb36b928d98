//! # Metadata Store
//!
//! Persistence collaborator for upload progress, replicate piece checksums,
//! GC checkpoints, audit events and migration progress. The SQL layer
//! behind it lives outside this workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::task::{TaskKey, TaskType};
use crate::topology::ObjectInfo;

pub type MetaResult<T> = Result<T, CollaboratorError>;

/// Upload pipeline state of one object as shown to the uploader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Uploading,
    UploadDone,
    Replicating,
    ReplicateDone,
    Sealing,
    Sealed,
    UploadFailed,
    ReplicateFailed,
    SealFailed,
}

impl UploadState {
    pub fn is_failed(&self) -> bool {
        matches!(
            self,
            UploadState::UploadFailed | UploadState::ReplicateFailed | UploadState::SealFailed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub object_id: u64,
    pub state: UploadState,
    /// Human-readable error, empty while healthy.
    pub error_description: String,
    pub update_time: u64,
}

/// Final outcome of a task, written once it leaves its queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Succeeded,
    Failed,
    Canceled,
}

/// Immutable audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub task_key: TaskKey,
    pub task_type: TaskType,
    pub object_id: Option<u64>,
    pub outcome: EventOutcome,
    pub logs: String,
    pub error: Option<String>,
    pub time: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcCheckpoint {
    pub task_type: TaskType,
    pub start: u64,
    pub end: u64,
    pub current: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketMigrationProgress {
    pub bucket_id: u64,
    pub state: String,
    pub migrated_gvgs: u32,
    pub total_gvgs: u32,
    pub migrated_bytes: u64,
    pub error: String,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ──── upload progress ────

    async fn insert_upload_progress(&self, progress: UploadProgress) -> MetaResult<()>;
    async fn update_upload_progress(&self, progress: UploadProgress) -> MetaResult<()>;
    async fn delete_upload_progress(&self, object_id: u64) -> MetaResult<()>;
    async fn get_upload_progress(&self, object_id: u64) -> MetaResult<Option<UploadProgress>>;

    // ──── replicate piece checksums ────

    async fn set_replicate_piece_checksum(
        &self,
        object_id: u64,
        segment_idx: u32,
        redundancy_idx: i32,
        checksum: Vec<u8>,
    ) -> MetaResult<()>;

    /// Checksums of one redundancy index, ordered by segment.
    async fn get_all_replicate_piece_checksums(
        &self,
        object_id: u64,
        redundancy_idx: i32,
        segment_count: u32,
    ) -> MetaResult<Vec<Vec<u8>>>;

    async fn delete_all_replicate_piece_checksums(&self, object_id: u64) -> MetaResult<()>;

    // ──── GC ────

    async fn set_gc_checkpoint(&self, checkpoint: GcCheckpoint) -> MetaResult<()>;
    async fn get_gc_checkpoint(&self, task_type: TaskType) -> MetaResult<Option<GcCheckpoint>>;

    // ──── audit ────

    async fn put_event(&self, event: AuditEvent) -> MetaResult<()>;

    // ──── recovery & migration ────

    async fn list_objects_by_gvg(&self, gvg_id: u32, limit: usize) -> MetaResult<Vec<ObjectInfo>>;

    async fn set_bucket_migration_progress(&self, progress: BucketMigrationProgress)
        -> MetaResult<()>;
    async fn get_bucket_migration_progress(
        &self,
        bucket_id: u64,
    ) -> MetaResult<Option<BucketMigrationProgress>>;
}
