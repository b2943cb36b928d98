//! # VGM Error Types
//!
//! ```text
//! VgmError
//! ├── FailedPickVgf            ← no eligible family, caller creates one on chain
//! ├── FailedPickGvg            ← no eligible GVG in the family, caller stakes a new one
//! ├── FailedPickDestSp         ← no eligible destination SP
//! ├── StaledMetadata           ← snapshot never built or references a vanished entity
//! ├── InsufficientCandidates   ← not enough SPs to fill a GVG
//! ├── Topology(..)             ← chain read failed
//! └── Signer(..)               ← chain write failed
//! ```

use spnode_common::CollaboratorError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VgmError {
    #[error("failed to pick virtual group family")]
    FailedPickVgf,

    #[error("failed to pick global virtual group in family {family_id}")]
    FailedPickGvg { family_id: u32 },

    #[error("failed to pick destination storage provider")]
    FailedPickDestSp,

    #[error("staled metadata: {0}")]
    StaledMetadata(String),

    #[error("insufficient secondary candidates: have {available}, need {required}")]
    InsufficientCandidates { available: usize, required: usize },

    #[error("topology source: {0}")]
    Topology(CollaboratorError),

    #[error("signer: {0}")]
    Signer(CollaboratorError),
}

impl VgmError {
    pub fn code(&self) -> u32 {
        match self {
            VgmError::FailedPickVgf => 40001,
            VgmError::FailedPickGvg { .. } => 40002,
            VgmError::FailedPickDestSp => 40003,
            VgmError::StaledMetadata(_) => 40004,
            VgmError::InsufficientCandidates { .. } => 40005,
            VgmError::Topology(_) => 40006,
            VgmError::Signer(_) => 40007,
        }
    }

    /// Placement failures that on-chain resource creation can resolve.
    pub fn is_placement(&self) -> bool {
        matches!(
            self,
            VgmError::FailedPickVgf | VgmError::FailedPickGvg { .. } | VgmError::FailedPickDestSp
        )
    }
}

pub type Result<T> = std::result::Result<T, VgmError>;
