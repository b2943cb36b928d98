use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::RwLock;

use crate::error::{Result, StorageError};

/// Blob store for pieces, keyed by piece key.
///
/// `get_piece` returns the half-open byte range `[start, end)`; `end` is
/// clamped to the piece size, so `get_piece(key, 0, u64::MAX)` reads all.
pub trait PieceStore: Debug + Send + Sync + 'static {
    fn get_piece(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>>;
    fn put_piece(&self, key: &str, data: &[u8]) -> Result<()>;
    fn delete_piece(&self, key: &str) -> Result<()>;
    fn has_piece(&self, key: &str) -> Result<bool>;

    fn get_whole_piece(&self, key: &str) -> Result<Vec<u8>> {
        self.get_piece(key, 0, u64::MAX)
    }
}

pub(crate) fn slice_range(key: &str, data: &[u8], start: u64, end: u64) -> Result<Vec<u8>> {
    let size = data.len() as u64;
    let end = end.min(size);
    if start > end {
        return Err(StorageError::InvalidRange { start, end, size });
    }
    if key.is_empty() {
        return Err(StorageError::InvalidKey(String::new()));
    }
    Ok(data[start as usize..end as usize].to_vec())
}

/// In-memory piece store.
#[derive(Debug, Default)]
pub struct MemoryPieceStore {
    pieces: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pieces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PieceStore for MemoryPieceStore {
    fn get_piece(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let pieces = self.pieces.read();
        let data = pieces
            .get(key)
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        slice_range(key, data, start, end)
    }

    fn put_piece(&self, key: &str, data: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(String::new()));
        }
        self.pieces.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete_piece(&self, key: &str) -> Result<()> {
        self.pieces.write().remove(key);
        Ok(())
    }

    fn has_piece(&self, key: &str) -> Result<bool> {
        Ok(self.pieces.read().contains_key(key))
    }
}
