//! # Executor Error Types
//!
//! ```text
//! ExecutorError
//! ├── InvalidTask(String)              ← payload does not match the handler
//! ├── Storage(StorageError)            ← local piece read or EC failure
//! ├── Push{redundancy_idx, ..}         ← a secondary refused or timed out
//! ├── Done{redundancy_idx, ..}         ← done call to a secondary failed
//! ├── Signature{redundancy_idx, ..}    ← partial signature did not verify
//! ├── Aggregate(SigningError)
//! ├── Metadata(CollaboratorError)
//! ├── Chain(CollaboratorError)
//! ├── Seal(CollaboratorError)
//! ├── Receiver(String)                 ← receiver-side failure
//! └── Canceled
//! ```
//!
//! Errors that blame one secondary expose its index via
//! [`ExecutorError::failed_index`]; the manager freezes that SP and re-picks.

use spnode_common::CollaboratorError;
use spnode_storage::StorageError;
use spnode_tss::SigningError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("push to secondary {redundancy_idx} failed: {message}")]
    Push { redundancy_idx: usize, message: String },

    #[error("done call to secondary {redundancy_idx} failed: {message}")]
    Done { redundancy_idx: usize, message: String },

    #[error("signature of secondary {redundancy_idx} rejected: {source}")]
    Signature {
        redundancy_idx: usize,
        source: SigningError,
    },

    #[error("aggregation failed: {0}")]
    Aggregate(SigningError),

    #[error("metadata: {0}")]
    Metadata(CollaboratorError),

    #[error("chain: {0}")]
    Chain(CollaboratorError),

    #[error("seal: {0}")]
    Seal(CollaboratorError),

    #[error("receiver: {0}")]
    Receiver(String),

    #[error("canceled")]
    Canceled,
}

impl ExecutorError {
    pub fn code(&self) -> u32 {
        match self {
            ExecutorError::InvalidTask(_) => 70001,
            ExecutorError::Storage(e) => e.code(),
            ExecutorError::Push { .. } => 70002,
            ExecutorError::Done { .. } => 70003,
            ExecutorError::Signature { source, .. } => source.code(),
            ExecutorError::Aggregate(e) => e.code(),
            ExecutorError::Metadata(e) | ExecutorError::Chain(e) | ExecutorError::Seal(e) => e.code(),
            ExecutorError::Receiver(_) => 70004,
            ExecutorError::Canceled => 70005,
        }
    }

    /// Redundancy index of the secondary this failure is attributed to.
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            ExecutorError::Push { redundancy_idx, .. }
            | ExecutorError::Done { redundancy_idx, .. }
            | ExecutorError::Signature { redundancy_idx, .. } => Some(*redundancy_idx),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
