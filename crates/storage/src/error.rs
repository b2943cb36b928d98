use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(String),

    #[error("piece not found: {0}")]
    NotFound(String),

    #[error("invalid piece key: {0}")]
    InvalidKey(String),

    #[error("invalid range [{start}, {end}) for piece of {size} bytes")]
    InvalidRange { start: u64, end: u64, size: u64 },

    #[error("erasure coding failed: {0}")]
    Coding(String),
}

impl StorageError {
    pub fn code(&self) -> u32 {
        match self {
            StorageError::Io(_) => 50001,
            StorageError::NotFound(_) => 50002,
            StorageError::InvalidKey(_) => 50003,
            StorageError::InvalidRange { .. } => 50004,
            StorageError::Coding(_) => 50005,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
