//! # Signing Error Types
//!
//! ```text
//! SigningError
//! ├── InvalidSecretKey          ← key material rejected by blst
//! ├── InvalidPublicKey(String)  ← bad encoding or not in G1 subgroup
//! ├── InvalidSignature(String)  ← bad encoding or not in G2 subgroup
//! ├── VerificationFailed{index} ← partial at `index` does not verify
//! ├── LengthMismatch            ← keys and signatures disagree in count
//! ├── Empty                     ← nothing to aggregate
//! └── Aggregation(String)       ← blst aggregation failure
//! ```

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// The partial signature at redundancy index `index` failed verification.
    #[error("signature verification failed at index {index}")]
    VerificationFailed { index: usize },

    #[error("length mismatch: {keys} keys, {signatures} signatures")]
    LengthMismatch { keys: usize, signatures: usize },

    #[error("no signatures to aggregate")]
    Empty,

    #[error("aggregation failed: {0}")]
    Aggregation(String),
}

impl SigningError {
    pub fn code(&self) -> u32 {
        match self {
            SigningError::InvalidSecretKey => 60001,
            SigningError::InvalidPublicKey(_) => 60002,
            SigningError::InvalidSignature(_) => 60003,
            SigningError::VerificationFailed { .. } => 60004,
            SigningError::LengthMismatch { .. } => 60005,
            SigningError::Empty => 60006,
            SigningError::Aggregation(_) => 60007,
        }
    }

    /// Redundancy index blamed for the failure, if any.
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            SigningError::VerificationFailed { index } => Some(*index),
            _ => None,
        }
    }
}
