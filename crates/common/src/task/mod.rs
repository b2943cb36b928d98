//! # Task Model
//!
//! Every unit of work the manager schedules is a [`Task`]: a key, shared
//! scheduling metadata ([`TaskMeta`]) and a per-kind payload
//! ([`TaskPayload`]). The task kind is derived from the payload, so the two
//! can never disagree.
//!
//! ## Kinds
//!
//! | Kind | Key prefix | Data transfer |
//! |------|------------|---------------|
//! | Upload | `Uploading` | yes |
//! | ResumableUpload | `ResumableUploading` | yes |
//! | ReplicatePiece | `Replicating` | yes |
//! | SealObject | `Sealing` | no |
//! | ReceivePiece | `Receiving` | yes |
//! | GcObject | `GCObject` | no |
//! | GcZombiePiece | `GCZombiePiece` | no |
//! | GcMeta | `GCMeta` | no |
//! | GcStaleVersion | `GCStaleVersion` | no |
//! | GcBucketMigration | `GCBucketMigration` | no |
//! | RecoverPiece | `Recovering` | yes |
//! | MigrateGvg | `MigrateGVG` | no |
//! | Download | `Downloading` | yes |
//! | Challenge | `Challenging` | yes |
//!
//! ## Time & Retry Rules
//!
//! - `exceed_timeout(now)` ⇔ `update_time + timeout < now`
//! - `exceed_retry()` ⇔ `retry > max_retry`
//! - `expired(now)` ⇔ either of the above
//!
//! `retry` only ever grows, and only the scheduler bumps it on (re)dispatch.
//! All time checks take the caller's `now` and use saturating arithmetic.

pub mod policy;
pub mod queue;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::topology::{ObjectInfo, StorageParams};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// Maximum retained length of `TaskMeta::logs`, in bytes.
pub const MAX_TASK_LOG_LEN: usize = 2048;

/// Priority at or above which a task is `Medium`.
pub const MEDIUM_PRIORITY_THRESHOLD: i32 = 64;

/// Priority at or above which a task is `High`.
pub const HIGH_PRIORITY_THRESHOLD: i32 = 170;

/// Memory reserved for any task regardless of payload.
const BASE_TASK_MEMORY: u64 = 1024 * 1024;

/// `not_available_sp_idx` value meaning "no secondary failed".
pub const NO_FAILED_SP: i32 = -1;

// ════════════════════════════════════════════════════════════════════════════
// TASK TYPE
// ════════════════════════════════════════════════════════════════════════════

/// Task kind discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Upload,
    ResumableUpload,
    ReplicatePiece,
    SealObject,
    ReceivePiece,
    GcObject,
    GcZombiePiece,
    GcMeta,
    GcStaleVersion,
    GcBucketMigration,
    RecoverPiece,
    MigrateGvg,
    Download,
    Challenge,
}

impl TaskType {
    pub const ALL: [TaskType; 14] = [
        TaskType::Upload,
        TaskType::ResumableUpload,
        TaskType::ReplicatePiece,
        TaskType::SealObject,
        TaskType::ReceivePiece,
        TaskType::GcObject,
        TaskType::GcZombiePiece,
        TaskType::GcMeta,
        TaskType::GcStaleVersion,
        TaskType::GcBucketMigration,
        TaskType::RecoverPiece,
        TaskType::MigrateGvg,
        TaskType::Download,
        TaskType::Challenge,
    ];

    /// Prefix used in every key of this kind.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            TaskType::Upload => "Uploading",
            TaskType::ResumableUpload => "ResumableUploading",
            TaskType::ReplicatePiece => "Replicating",
            TaskType::SealObject => "Sealing",
            TaskType::ReceivePiece => "Receiving",
            TaskType::GcObject => "GCObject",
            TaskType::GcZombiePiece => "GCZombiePiece",
            TaskType::GcMeta => "GCMeta",
            TaskType::GcStaleVersion => "GCStaleVersion",
            TaskType::GcBucketMigration => "GCBucketMigration",
            TaskType::RecoverPiece => "Recovering",
            TaskType::MigrateGvg => "MigrateGVG",
            TaskType::Download => "Downloading",
            TaskType::Challenge => "Challenging",
        }
    }

    /// snake_case name, as used in config tables and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            TaskType::Upload => "upload",
            TaskType::ResumableUpload => "resumable_upload",
            TaskType::ReplicatePiece => "replicate_piece",
            TaskType::SealObject => "seal_object",
            TaskType::ReceivePiece => "receive_piece",
            TaskType::GcObject => "gc_object",
            TaskType::GcZombiePiece => "gc_zombie_piece",
            TaskType::GcMeta => "gc_meta",
            TaskType::GcStaleVersion => "gc_stale_version",
            TaskType::GcBucketMigration => "gc_bucket_migration",
            TaskType::RecoverPiece => "recover_piece",
            TaskType::MigrateGvg => "migrate_gvg",
            TaskType::Download => "download",
            TaskType::Challenge => "challenge",
        }
    }

    pub fn from_name(name: &str) -> Option<TaskType> {
        TaskType::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Kinds whose timeout scales with the bytes they move.
    pub fn is_data_transfer(&self) -> bool {
        matches!(
            self,
            TaskType::Upload
                | TaskType::ResumableUpload
                | TaskType::ReplicatePiece
                | TaskType::ReceivePiece
                | TaskType::Download
                | TaskType::Challenge
                | TaskType::RecoverPiece
        )
    }

    pub fn is_gc(&self) -> bool {
        matches!(
            self,
            TaskType::GcObject
                | TaskType::GcZombiePiece
                | TaskType::GcMeta
                | TaskType::GcStaleVersion
                | TaskType::GcBucketMigration
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TASK KEY
// ════════════════════════════════════════════════════════════════════════════

/// Type-prefixed task identity, unique within one queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskKey(String);

impl TaskKey {
    pub fn from_raw(raw: impl Into<String>) -> Self {
        TaskKey(raw.into())
    }

    fn object_scoped(t: TaskType, object: &ObjectInfo) -> Self {
        TaskKey(format!(
            "{}-bucket:{}-object:{}-id:{}",
            t.key_prefix(),
            object.bucket_name,
            object.object_name,
            object.id
        ))
    }

    pub fn upload(object: &ObjectInfo) -> Self {
        Self::object_scoped(TaskType::Upload, object)
    }

    pub fn resumable_upload(object: &ObjectInfo) -> Self {
        Self::object_scoped(TaskType::ResumableUpload, object)
    }

    pub fn replicate_piece(object: &ObjectInfo) -> Self {
        Self::object_scoped(TaskType::ReplicatePiece, object)
    }

    pub fn seal_object(object: &ObjectInfo) -> Self {
        Self::object_scoped(TaskType::SealObject, object)
    }

    pub fn receive_piece(object: &ObjectInfo, redundancy_idx: i32) -> Self {
        TaskKey(format!(
            "{}-idx:{}",
            Self::object_scoped(TaskType::ReceivePiece, object).0,
            redundancy_idx
        ))
    }

    pub fn download(object: &ObjectInfo, low: u64, high: u64) -> Self {
        TaskKey(format!(
            "{}-low:{}-high:{}",
            Self::object_scoped(TaskType::Download, object).0,
            low,
            high
        ))
    }

    pub fn challenge(object: &ObjectInfo, segment_idx: u32, redundancy_idx: i32) -> Self {
        TaskKey(format!(
            "{}-segment:{}-idx:{}",
            Self::object_scoped(TaskType::Challenge, object).0,
            segment_idx,
            redundancy_idx
        ))
    }

    pub fn recover_piece(object: &ObjectInfo, segment_idx: u32, redundancy_idx: i32) -> Self {
        TaskKey(format!(
            "{}-segment:{}-idx:{}",
            Self::object_scoped(TaskType::RecoverPiece, object).0,
            segment_idx,
            redundancy_idx
        ))
    }

    pub fn gc_object(start_block: u64, end_block: u64) -> Self {
        TaskKey(format!(
            "{}-start:{}-end:{}",
            TaskType::GcObject.key_prefix(),
            start_block,
            end_block
        ))
    }

    pub fn gc_zombie_piece(start_id: u64, end_id: u64) -> Self {
        TaskKey(format!(
            "{}-start:{}-end:{}",
            TaskType::GcZombiePiece.key_prefix(),
            start_id,
            end_id
        ))
    }

    pub fn gc_meta(start_id: u64, end_id: u64) -> Self {
        TaskKey(format!(
            "{}-start:{}-end:{}",
            TaskType::GcMeta.key_prefix(),
            start_id,
            end_id
        ))
    }

    pub fn gc_stale_version(bucket_id: u64, object_id: u64) -> Self {
        TaskKey(format!(
            "{}-bucket:{}-object:{}",
            TaskType::GcStaleVersion.key_prefix(),
            bucket_id,
            object_id
        ))
    }

    pub fn gc_bucket_migration(bucket_id: u64) -> Self {
        TaskKey(format!(
            "{}-bucket:{}",
            TaskType::GcBucketMigration.key_prefix(),
            bucket_id
        ))
    }

    pub fn migrate_gvg(src_gvg_id: u32, bucket_id: u64, redundancy_idx: i32) -> Self {
        TaskKey(format!(
            "{}-src:{}-bucket:{}-idx:{}",
            TaskType::MigrateGvg.key_prefix(),
            src_gvg_id,
            bucket_id,
            redundancy_idx
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind encoded in the key prefix, if recognizable.
    pub fn task_type(&self) -> Option<TaskType> {
        let prefix = self.0.split('-').next()?;
        TaskType::ALL.iter().copied().find(|t| t.key_prefix() == prefix)
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// META
// ════════════════════════════════════════════════════════════════════════════

/// Error attached to a task reported back by an executor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    pub code: u32,
    pub message: String,
}

/// Scheduling metadata shared by every kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMeta {
    /// Executor address the task was last dispatched to; empty if never.
    pub address: String,
    pub create_time: u64,
    pub update_time: u64,
    /// Seconds after `update_time` before the task counts as timed out.
    pub timeout: u64,
    pub retry: u32,
    pub max_retry: u32,
    pub priority: i32,
    pub logs: String,
    pub error: Option<TaskErrorInfo>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
}

/// Resources a task needs, or an executor offers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimit {
    pub memory_bytes: u64,
    pub tasks: u32,
}

impl ResourceLimit {
    pub fn unlimited() -> Self {
        Self {
            memory_bytes: u64::MAX,
            tasks: u32::MAX,
        }
    }

    /// Whether `need` fits inside this limit.
    pub fn covers(&self, need: &ResourceLimit) -> bool {
        self.memory_bytes >= need.memory_bytes && self.tasks >= need.tasks
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PAYLOADS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumableUploadPayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub offset: u64,
    /// Set by the executor once the final chunk has landed.
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatePiecePayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub gvg_id: u32,
    pub secondary_sp_ids: Vec<u32>,
    pub secondary_endpoints: Vec<String>,
    /// One BLS partial signature per redundancy index, filled by the executor.
    pub secondary_signatures: Vec<Vec<u8>>,
    /// Redundancy index of the secondary that failed, `NO_FAILED_SP` if none.
    pub not_available_sp_idx: i32,
    /// Whether the combined replicate+seal transaction succeeded.
    pub sealed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealObjectPayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub gvg_id: u32,
    pub secondary_sp_ids: Vec<u32>,
    pub secondary_signatures: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivePiecePayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub gvg_id: u32,
    pub redundancy_idx: i32,
    pub piece_size: u64,
    pub piece_checksum: Vec<u8>,
    pub sealed: bool,
}

/// Half-open progress cursor `[start, end)` shared by the GC kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcRange {
    pub start: u64,
    pub end: u64,
    /// Next position still to be processed.
    pub current: u64,
}

impl GcRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            current: start,
        }
    }

    pub fn finished(&self) -> bool {
        self.current >= self.end
    }

    /// Moves the cursor forward, never backward and never past `end`.
    pub fn advance_to(&mut self, position: u64) {
        self.current = self.current.max(position.min(self.end));
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcObjectPayload {
    /// Block height range.
    pub range: GcRange,
    pub last_deleted_object_id: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcZombiePiecePayload {
    /// Object id range.
    pub range: GcRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcMetaPayload {
    /// Metadata record id range.
    pub range: GcRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcStaleVersionPayload {
    pub bucket_id: u64,
    pub object_id: u64,
    /// Version number range.
    pub range: GcRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcBucketMigrationPayload {
    pub bucket_id: u64,
    /// Index range over the bucket's source GVGs.
    pub range: GcRange,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverPiecePayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub segment_idx: u32,
    /// Redundancy index, or `-1` when recovering the primary's segment.
    pub redundancy_idx: i32,
    pub piece_size: u64,
    pub recovered: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrateGvgPayload {
    pub src_gvg_id: u32,
    pub dest_gvg_id: u32,
    /// Successor SP taking over `redundancy_idx` on a swap-out, 0 for bucket migration.
    #[serde(default)]
    pub dest_sp_id: u32,
    /// Bucket being migrated, 0 for a swap-out.
    pub bucket_id: u64,
    pub redundancy_idx: i32,
    pub last_migrated_object_id: u64,
    pub finished: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub low: u64,
    pub high: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengePayload {
    pub object: ObjectInfo,
    pub params: StorageParams,
    pub segment_idx: u32,
    pub redundancy_idx: i32,
    pub integrity_hash: Vec<u8>,
    pub piece_hashes: Vec<Vec<u8>>,
}

/// Per-kind task body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum TaskPayload {
    Upload(UploadPayload),
    ResumableUpload(ResumableUploadPayload),
    ReplicatePiece(ReplicatePiecePayload),
    SealObject(SealObjectPayload),
    ReceivePiece(ReceivePiecePayload),
    GcObject(GcObjectPayload),
    GcZombiePiece(GcZombiePiecePayload),
    GcMeta(GcMetaPayload),
    GcStaleVersion(GcStaleVersionPayload),
    GcBucketMigration(GcBucketMigrationPayload),
    RecoverPiece(RecoverPiecePayload),
    MigrateGvg(MigrateGvgPayload),
    Download(DownloadPayload),
    Challenge(ChallengePayload),
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Upload(_) => TaskType::Upload,
            TaskPayload::ResumableUpload(_) => TaskType::ResumableUpload,
            TaskPayload::ReplicatePiece(_) => TaskType::ReplicatePiece,
            TaskPayload::SealObject(_) => TaskType::SealObject,
            TaskPayload::ReceivePiece(_) => TaskType::ReceivePiece,
            TaskPayload::GcObject(_) => TaskType::GcObject,
            TaskPayload::GcZombiePiece(_) => TaskType::GcZombiePiece,
            TaskPayload::GcMeta(_) => TaskType::GcMeta,
            TaskPayload::GcStaleVersion(_) => TaskType::GcStaleVersion,
            TaskPayload::GcBucketMigration(_) => TaskType::GcBucketMigration,
            TaskPayload::RecoverPiece(_) => TaskType::RecoverPiece,
            TaskPayload::MigrateGvg(_) => TaskType::MigrateGvg,
            TaskPayload::Download(_) => TaskType::Download,
            TaskPayload::Challenge(_) => TaskType::Challenge,
        }
    }

    /// Object the task operates on, for object-scoped kinds.
    pub fn object(&self) -> Option<&ObjectInfo> {
        match self {
            TaskPayload::Upload(p) => Some(&p.object),
            TaskPayload::ResumableUpload(p) => Some(&p.object),
            TaskPayload::ReplicatePiece(p) => Some(&p.object),
            TaskPayload::SealObject(p) => Some(&p.object),
            TaskPayload::ReceivePiece(p) => Some(&p.object),
            TaskPayload::RecoverPiece(p) => Some(&p.object),
            TaskPayload::Download(p) => Some(&p.object),
            TaskPayload::Challenge(p) => Some(&p.object),
            TaskPayload::GcObject(_)
            | TaskPayload::GcZombiePiece(_)
            | TaskPayload::GcMeta(_)
            | TaskPayload::GcStaleVersion(_)
            | TaskPayload::GcBucketMigration(_)
            | TaskPayload::MigrateGvg(_) => None,
        }
    }

    /// Bytes the task moves over the network. Zero for control-plane kinds.
    pub fn transfer_size(&self) -> u64 {
        match self {
            TaskPayload::Upload(p) => p.object.payload_size,
            TaskPayload::ResumableUpload(p) => p.object.payload_size,
            TaskPayload::ReplicatePiece(p) => p.object.payload_size,
            TaskPayload::ReceivePiece(p) => p.piece_size,
            TaskPayload::RecoverPiece(p) => p.piece_size,
            TaskPayload::Download(p) => p.high.saturating_sub(p.low).saturating_add(1),
            TaskPayload::Challenge(p) => p.params.max_segment_size.min(p.object.payload_size),
            TaskPayload::SealObject(_)
            | TaskPayload::GcObject(_)
            | TaskPayload::GcZombiePiece(_)
            | TaskPayload::GcMeta(_)
            | TaskPayload::GcStaleVersion(_)
            | TaskPayload::GcBucketMigration(_)
            | TaskPayload::MigrateGvg(_) => 0,
        }
    }

    fn max_segment_size(&self) -> Option<u64> {
        match self {
            TaskPayload::Upload(p) => Some(p.params.max_segment_size),
            TaskPayload::ResumableUpload(p) => Some(p.params.max_segment_size),
            TaskPayload::ReplicatePiece(p) => Some(p.params.max_segment_size),
            TaskPayload::ReceivePiece(p) => Some(p.params.max_segment_size),
            TaskPayload::RecoverPiece(p) => Some(p.params.max_segment_size),
            TaskPayload::Download(p) => Some(p.params.max_segment_size),
            TaskPayload::Challenge(p) => Some(p.params.max_segment_size),
            _ => None,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TASK
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub key: TaskKey,
    pub meta: TaskMeta,
    pub payload: TaskPayload,
}

impl Task {
    /// Creates a task with zeroed scheduling fields. Timeout, retry budget
    /// and priority are filled in by `TaskPolicy::apply`.
    pub fn new(key: TaskKey, payload: TaskPayload, now: u64) -> Self {
        Self {
            key,
            meta: TaskMeta {
                create_time: now,
                update_time: now,
                ..TaskMeta::default()
            },
            payload,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    pub fn exceed_timeout(&self, now: u64) -> bool {
        self.meta.update_time.saturating_add(self.meta.timeout) < now
    }

    pub fn exceed_retry(&self) -> bool {
        self.meta.retry > self.meta.max_retry
    }

    pub fn expired(&self, now: u64) -> bool {
        self.exceed_timeout(now) || self.exceed_retry()
    }

    pub fn inc_retry(&mut self) {
        self.meta.retry = self.meta.retry.saturating_add(1);
    }

    /// Whether the task was handed to an executor at least once.
    pub fn dispatched(&self) -> bool {
        !self.meta.address.is_empty()
    }

    pub fn error(&self) -> Option<&TaskErrorInfo> {
        self.meta.error.as_ref()
    }

    pub fn set_error(&mut self, code: u32, message: impl Into<String>) {
        self.meta.error = Some(TaskErrorInfo {
            code,
            message: message.into(),
        });
    }

    pub fn clear_error(&mut self) {
        self.meta.error = None;
    }

    /// Appends one log line, dropping the oldest bytes beyond `MAX_TASK_LOG_LEN`.
    pub fn append_log(&mut self, line: &str) {
        let logs = &mut self.meta.logs;
        if !logs.is_empty() {
            logs.push_str("; ");
        }
        logs.push_str(line);
        if logs.len() > MAX_TASK_LOG_LEN {
            let mut cut = logs.len() - MAX_TASK_LOG_LEN;
            while !logs.is_char_boundary(cut) {
                cut += 1;
            }
            logs.drain(..cut);
        }
    }

    pub fn priority_level(&self) -> PriorityLevel {
        priority_level(self.meta.priority)
    }

    /// Resources an executor must offer to run this task.
    ///
    /// Data-transfer kinds hold at most one segment (twice for replication:
    /// segment plus encoded shards) in memory at a time.
    pub fn estimate_limit(&self) -> ResourceLimit {
        let task_type = self.task_type();
        let memory_bytes = if task_type.is_data_transfer() {
            let window = match self.payload.max_segment_size() {
                Some(segment) if segment > 0 => self.payload.transfer_size().min(segment),
                _ => self.payload.transfer_size(),
            };
            let factor = if task_type == TaskType::ReplicatePiece { 2 } else { 1 };
            BASE_TASK_MEMORY.saturating_add(window.saturating_mul(factor))
        } else {
            BASE_TASK_MEMORY
        };
        ResourceLimit {
            memory_bytes,
            tasks: 1,
        }
    }

    pub fn object(&self) -> Option<&ObjectInfo> {
        self.payload.object()
    }
}

pub fn priority_level(priority: i32) -> PriorityLevel {
    if priority >= HIGH_PRIORITY_THRESHOLD {
        PriorityLevel::High
    } else if priority >= MEDIUM_PRIORITY_THRESHOLD {
        PriorityLevel::Medium
    } else {
        PriorityLevel::Low
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ════════════════════════════════════════════════════════════════════════════

/// Fixtures shared by the unit tests of this crate and, through the
/// `test-util` feature, by the tests of dependent crates.
#[cfg(any(test, feature = "test-util"))]
pub mod fixtures {
    use super::*;
    use crate::topology::RedundancyType;

    pub fn object(id: u64, payload_size: u64) -> ObjectInfo {
        ObjectInfo {
            id,
            bucket_id: 1,
            bucket_name: "bucket".to_string(),
            object_name: format!("object-{}", id),
            payload_size,
            redundancy: RedundancyType::ErasureCode,
            checksum_root: vec![0u8; 32],
            bucket_vgf_id: 1,
        }
    }

    pub fn upload_task(id: u64, payload_size: u64, now: u64) -> Task {
        let object = object(id, payload_size);
        Task::new(
            TaskKey::upload(&object),
            TaskPayload::Upload(UploadPayload {
                object,
                params: StorageParams::default(),
            }),
            now,
        )
    }

    pub fn gc_meta_task(start: u64, end: u64, now: u64) -> Task {
        Task::new(
            TaskKey::gc_meta(start, end),
            TaskPayload::GcMeta(GcMetaPayload {
                range: GcRange::new(start, end),
            }),
            now,
        )
    }
}
