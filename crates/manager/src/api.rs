//! Request and response types of the manager operations. Shared by the
//! in-process API and the HTTP RPC.

use serde::{Deserialize, Serialize};
use spnode_common::{ResourceLimit, TaskKey, TaskType, UploadState};

use crate::queues::QueueStats;

pub const DESC_IN_PROGRESS: &str = "in progress";
pub const DESC_EXCEEDED: &str = "exceeded retries, abandoned";
pub const DESC_SEALED: &str = "sealed";

pub fn error_description(reason: &str) -> String {
    format!("error: {}", reason)
}

/// Long-poll ask for work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Executor address recorded on the task.
    pub address: String,
    pub limit: ResourceLimit,
    /// Types the executor can run. Empty means all dispatchable types.
    #[serde(default)]
    pub task_types: Vec<TaskType>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub object_id: u64,
    pub state: UploadState,
    pub task_key: Option<TaskKey>,
    pub retry: u32,
    pub max_retry: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksStats {
    pub queues: Vec<QueueStats>,
    /// Dispatched tasks whose re-dispatch deadline has passed.
    pub backup_tasks: usize,
    pub recovery_failed: usize,
    pub migrating_buckets: usize,
    /// Quota held back for buckets migrating onto this SP.
    pub migration_quota_reserved: u64,
}

/// A secondary SP is leaving; move its redundancy index in our GVGs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapOutRequest {
    pub sp_id: u32,
    /// Successor chosen by the operator. Picked per GVG when absent.
    #[serde(default)]
    pub successor_sp_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreMigrateBucketRequest {
    pub bucket_id: u64,
    pub bucket_name: String,
    pub src_gvg_ids: Vec<u32>,
    /// Read quota reserved for the bucket until the migration settles.
    #[serde(default)]
    pub quota_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostMigrateBucketRequest {
    pub bucket_id: u64,
    pub success: bool,
}

/// Recover every piece of `redundancy_idx` in `gvg_id` onto this SP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverRequest {
    pub gvg_id: u32,
    pub redundancy_idx: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverProcess {
    pub gvg_id: u32,
    pub redundancy_idx: i32,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverFailedEntry {
    pub task_key: TaskKey,
    pub object_id: u64,
    pub segment_idx: u32,
    pub redundancy_idx: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverProcessView {
    pub process: Option<RecoverProcess>,
    pub pending: usize,
    pub failed: Vec<RecoverFailedEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickVgfResponse {
    pub vgf_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIdRequest {
    pub object_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketIdRequest {
    pub bucket_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetRecoveryResponse {
    pub cleared: usize,
}
