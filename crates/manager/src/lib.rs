//! # spnode Task Manager
//!
//! Central scheduler of the storage-provider node. Front ends begin tasks,
//! executors ask for work and report back, and the manager decides what
//! comes next for every object.
//!
//! ```text
//!  Upload ──► ReplicatePiece ──┬── sealed by executor ──► done
//!                              └── not sealed ──► SealObject ──► done
//! ```
//!
//! ## Modules
//!
//! | Module | Content |
//! |--------|---------|
//! | `manager` | `Manager`, begin, dispatch, reconcile and background loops |
//! | `report` | per-type report handling, retry and terminal failure |
//! | `gc` | GC-object, GC-zombie and GC-meta generators |
//! | `ops` | progress queries, swap-out, bucket migration, recovery |
//! | `queues` | one bounded `TaskQueue` per task type |
//! | `side_effect` | async persistence of progress, events and chain calls |
//! | `metrics` | counters and Prometheus export |
//! | `api` | request and response types |
//! | `rpc` | HTTP server and client |

pub mod api;
pub mod error;
pub mod gc;
pub mod manager;
pub mod metrics;
pub mod ops;
pub mod queues;
pub mod report;
pub mod rpc;
pub mod side_effect;

pub use api::{
    BucketIdRequest, DispatchRequest, ObjectIdRequest, PickVgfResponse, PostMigrateBucketRequest,
    PreMigrateBucketRequest, RecoverFailedEntry, RecoverProcess, RecoverProcessView,
    RecoverRequest, ResetRecoveryResponse, SwapOutRequest, TaskProgress, TasksStats,
};
pub use error::{ErrorBody, ManagerError, Result};
pub use manager::Manager;
pub use metrics::ManagerMetrics;
pub use queues::{QueueStats, TaskQueues, DISPATCHABLE};
pub use rpc::{ClientError, ManagerClient, RpcState};
pub use side_effect::{SideEffect, SideEffects};
