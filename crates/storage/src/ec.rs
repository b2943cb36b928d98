//! Erasure coding.
//!
//! A segment is zero-padded to `data * shard_size` bytes and split into
//! `data` data shards plus `parity` parity shards. Shard `i` goes to the
//! secondary at redundancy index `i`.

use reed_solomon_erasure::galois_8::ReedSolomon;

use crate::error::{Result, StorageError};
use crate::piece::ec_piece_size;

pub trait ErasureCoder: Send + Sync {
    fn data_shards(&self) -> usize;
    fn parity_shards(&self) -> usize;

    fn total_shards(&self) -> usize {
        self.data_shards() + self.parity_shards()
    }

    /// Split `segment` into `total_shards()` equally sized shards.
    fn encode(&self, segment: &[u8]) -> Result<Vec<Vec<u8>>>;

    /// Rebuild the original segment from any `data_shards()` shards.
    fn decode(&self, shards: Vec<Option<Vec<u8>>>, segment_size: usize) -> Result<Vec<u8>>;
}

pub struct ReedSolomonCoder {
    rs: ReedSolomon,
    data: usize,
    parity: usize,
}

impl ReedSolomonCoder {
    pub fn new(data: usize, parity: usize) -> Result<Self> {
        let rs = ReedSolomon::new(data, parity).map_err(|e| StorageError::Coding(format!("{:?}", e)))?;
        Ok(Self { rs, data, parity })
    }
}

impl std::fmt::Debug for ReedSolomonCoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReedSolomonCoder")
            .field("data", &self.data)
            .field("parity", &self.parity)
            .finish()
    }
}

impl ErasureCoder for ReedSolomonCoder {
    fn data_shards(&self) -> usize {
        self.data
    }

    fn parity_shards(&self) -> usize {
        self.parity
    }

    fn encode(&self, segment: &[u8]) -> Result<Vec<Vec<u8>>> {
        // Shards must be non-empty even for an empty segment.
        let shard_size = (ec_piece_size(segment.len() as u64, self.data as u32) as usize).max(1);
        let mut shards: Vec<Vec<u8>> = (0..self.data + self.parity)
            .map(|i| {
                let start = (i * shard_size).min(segment.len());
                let end = ((i + 1) * shard_size).min(segment.len());
                let mut shard = if i < self.data {
                    segment[start..end].to_vec()
                } else {
                    Vec::new()
                };
                shard.resize(shard_size, 0);
                shard
            })
            .collect();
        self.rs
            .encode(&mut shards)
            .map_err(|e| StorageError::Coding(format!("{:?}", e)))?;
        Ok(shards)
    }

    fn decode(&self, mut shards: Vec<Option<Vec<u8>>>, segment_size: usize) -> Result<Vec<u8>> {
        if shards.len() != self.data + self.parity {
            return Err(StorageError::Coding(format!(
                "expected {} shards, got {}",
                self.data + self.parity,
                shards.len()
            )));
        }
        self.rs
            .reconstruct_data(&mut shards)
            .map_err(|e| StorageError::Coding(format!("{:?}", e)))?;
        let mut out = Vec::with_capacity(segment_size);
        for shard in shards.into_iter().take(self.data) {
            let shard = shard.ok_or_else(|| StorageError::Coding("missing data shard".to_string()))?;
            out.extend_from_slice(&shard);
        }
        out.truncate(segment_size);
        Ok(out)
    }
}
