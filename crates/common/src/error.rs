//! # Shared Error Types
//!
//! | Type | Raised by |
//! |------|-----------|
//! | `QueueError` | `TaskQueue::push` and friends |
//! | `CollaboratorError` | chain / signer / metadata collaborators |
//!
//! Every error exposes a stable numeric `code()` so that failures crossing
//! the RPC boundary keep their identity.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskKey;

// ════════════════════════════════════════════════════════════════════════════
// QUEUE ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Failures of a task queue operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// A task with the same key is already queued. Idempotency signal,
    /// safe to ignore at the caller.
    #[error("task repeated: {0}")]
    Repeated(TaskKey),

    /// The queue is at capacity even after retiring exhausted tasks.
    #[error("queue {queue} exceeded capacity {capacity}")]
    Exceeded { queue: String, capacity: usize },
}

impl QueueError {
    pub fn code(&self) -> u32 {
        match self {
            QueueError::Repeated(_) => 20001,
            QueueError::Exceeded { .. } => 20002,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COLLABORATOR ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Failures reported by an external collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollaboratorError {
    /// Chain / topology read failed.
    #[error("chain query failed: {0}")]
    Chain(String),

    /// Transaction construction or broadcast failed.
    #[error("signer failed: {0}")]
    Signer(String),

    /// Metadata store read or write failed.
    #[error("metadata store failed: {0}")]
    Metadata(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl CollaboratorError {
    pub fn code(&self) -> u32 {
        match self {
            CollaboratorError::Chain(_) => 30001,
            CollaboratorError::Signer(_) => 30002,
            CollaboratorError::Metadata(_) => 30003,
            CollaboratorError::NotFound(_) => 30004,
        }
    }
}
