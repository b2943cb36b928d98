//! # Manager Error Types
//!
//! ```text
//! ManagerError
//! ├── Dangling(String)        ← precondition failed, never enqueued
//! ├── Queue(QueueError)       ← repeated key or queue at capacity
//! ├── Canceled(TaskKey)       ← reported task no longer queued
//! ├── Placement(VgmError)     ← VGM could not place or create resources
//! ├── Metadata(..)            ← metadata store call failed
//! ├── Chain(..)               ← topology read or signer write failed
//! ├── NotFound(String)
//! └── InvalidRequest(String)
//! ```
//!
//! Codes are stable and travel in the RPC envelope.

use serde::{Deserialize, Serialize};
use spnode_common::{CollaboratorError, QueueError, TaskKey};
use spnode_vgmgr::VgmError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManagerError {
    #[error("dangling task: {0}")]
    Dangling(String),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("task canceled: {0}")]
    Canceled(TaskKey),

    #[error(transparent)]
    Placement(#[from] VgmError),

    #[error("metadata: {0}")]
    Metadata(CollaboratorError),

    #[error("chain: {0}")]
    Chain(CollaboratorError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ManagerError {
    pub fn code(&self) -> u32 {
        match self {
            ManagerError::Dangling(_) => 10001,
            ManagerError::Queue(e) => e.code(),
            ManagerError::Canceled(_) => 10002,
            ManagerError::Placement(e) => e.code(),
            ManagerError::Metadata(e) | ManagerError::Chain(e) => e.code(),
            ManagerError::NotFound(_) => 10003,
            ManagerError::InvalidRequest(_) => 10004,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Wire form of an application error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, ManagerError>;
