//! # spnode Common Crate
//!
//! Shared building blocks of the storage-provider node.
//!
//! ## Modules
//! - `task`: task model, per-type policy and the priority task queue
//! - `topology`: storage providers, virtual group families, GVGs, params
//! - `chain`: `TopologySource` and `Signer` collaborator traits
//! - `metadata`: `MetadataStore` collaborator trait and its records
//! - `mock`: in-memory implementations of the collaborator traits
//! - `config`: TOML configuration
//! - `clock`: injectable time source
//! - `error`: shared error types
//!
//! ## Pipeline
//! ```text
//!  upload ─► Manager ─► VGM pick GVG ─► ReplicatePiece ─► Executor
//!                ▲                                           │
//!                └────────────── report (sealed?) ◄──────────┘
//! ```

pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod metadata;
pub mod mock;
pub mod task;
pub mod topology;

pub use chain::{
    ChainResult, CompleteMigrateBucketRequest, CreateGvgRequest, RejectUnsealRequest,
    SealObjectRequest, Signer, TopologySource,
};
pub use clock::{now_unix_secs, Clock, ManualClock, SystemClock};
pub use config::{load_from_file, Config, ConfigError, ExecutorConfig, ManagerConfig, NodeConfig, VgmConfig};
pub use error::{CollaboratorError, QueueError};
pub use metadata::{
    AuditEvent, BucketMigrationProgress, EventOutcome, GcCheckpoint, MetaResult, MetadataStore,
    UploadProgress, UploadState,
};
pub use mock::{MemoryChain, MemoryMetadataStore, SignerCall};
pub use task::policy::{PolicyConfig, TaskPolicy, TypeOverride};
pub use task::queue::TaskQueue;
pub use task::{
    ChallengePayload, DownloadPayload, GcBucketMigrationPayload, GcMetaPayload, GcObjectPayload,
    GcRange, GcStaleVersionPayload, GcZombiePiecePayload, MigrateGvgPayload, PriorityLevel,
    ReceivePiecePayload, RecoverPiecePayload, ReplicatePiecePayload, ResourceLimit,
    ResumableUploadPayload, SealObjectPayload, Task, TaskErrorInfo, TaskKey, TaskMeta,
    TaskPayload, TaskType, UploadPayload, NO_FAILED_SP,
};
pub use topology::{
    below_usage_threshold, GlobalVirtualGroup, ObjectInfo, RedundancyType, StorageParams,
    StorageProvider, VirtualGroupFamily, VirtualGroupParams,
};
