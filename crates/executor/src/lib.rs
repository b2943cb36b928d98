//! # spnode Executor
//!
//! Runs the data-moving tasks the manager hands out.
//!
//! ## Modules
//!
//! | Module | Content |
//! |--------|---------|
//! | `replicate` | push pieces to secondaries, collect and verify signatures, combined seal |
//! | `seal` | fallback seal from stored signatures |
//! | `receiver` | piece receiver protocol, HTTP client and secondary-side service |
//! | `worker` | `TaskSource` and the ask / execute / report loop |
//! | `metrics` | executor counters |
//! | `error` | `ExecutorError` |

pub mod error;
pub mod metrics;
pub mod receiver;
pub mod replicate;
pub mod seal;
pub mod worker;

#[cfg(test)]
pub(crate) mod testkit;

pub use error::{ExecutorError, Result};
pub use metrics::ExecutorMetrics;
pub use receiver::{
    receiver_router, DoneReceipt, DoneReplicateRequest, HttpReceiverClient, PieceReceipt,
    PieceReceiver, ReceiverClient, ReplicatePieceRequest,
};
pub use replicate::ReplicateExecutor;
pub use seal::SealExecutor;
pub use worker::{TaskSource, Worker, SUPPORTED};
