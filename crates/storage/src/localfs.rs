use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::checksum::piece_checksum;
use crate::error::{Result, StorageError};
use crate::store::{slice_range, PieceStore};

/// Local filesystem piece store.
///
/// Layout: `<base>/pieces/<shard>/<key>` where `<shard>` is the first two
/// hex chars of the key's sha3 digest.
#[derive(Debug)]
pub struct LocalFsPieceStore {
    pieces_dir: PathBuf,
    tmp_seq: AtomicU64,
}

impl LocalFsPieceStore {
    /// Create a store rooted at `base_dir`, creating `base_dir/pieces` if missing.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let pieces_dir = base_dir.as_ref().join("pieces");
        fs::create_dir_all(&pieces_dir)?;
        Ok(Self {
            pieces_dir,
            tmp_seq: AtomicU64::new(0),
        })
    }

    fn piece_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        let shard = hex::encode(&piece_checksum(key.as_bytes())[..1]);
        Ok(self.pieces_dir.join(shard).join(key))
    }

    /// Write to a temp file next to `dest`, fsync, then rename over it.
    fn atomic_write(&self, dest: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = dest.with_extension(format!("tmp.{}.{}", std::process::id(), seq));
        {
            let mut f = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, dest) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

impl PieceStore for LocalFsPieceStore {
    fn get_piece(&self, key: &str, start: u64, end: u64) -> Result<Vec<u8>> {
        let path = self.piece_path(key)?;
        if !path.exists() {
            return Err(StorageError::NotFound(key.to_string()));
        }
        let mut f = File::open(&path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        slice_range(key, &buf, start, end)
    }

    /// Overwrites an existing piece: a retried replication must be able to
    /// replace a partially written one.
    fn put_piece(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.piece_path(key)?;
        self.atomic_write(&path, data)?;
        debug!(piece_key = key, size = data.len(), "piece stored");
        Ok(())
    }

    fn delete_piece(&self, key: &str) -> Result<()> {
        let path = self.piece_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn has_piece(&self, key: &str) -> Result<bool> {
        Ok(self.piece_path(key)?.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::piece::{segment_count, segment_piece_key, segment_size};
    use tempfile::TempDir;

    #[test]
    fn test_localfs_put_get_has() {
        let tmp = TempDir::new().expect("tmpdir");
        let store = LocalFsPieceStore::new(tmp.path()).expect("new store");

        let data = b"this is a test piece";
        assert!(!store.has_piece("42_s0").expect("has check"));
        store.put_piece("42_s0", data).expect("put");
        assert!(store.has_piece("42_s0").expect("has after put"));
        let got = store.get_whole_piece("42_s0").expect("get");
        assert_eq!(got.as_slice(), data);
        assert_eq!(store.get_piece("42_s0", 5, 7).expect("range"), b"is".to_vec());
    }

    #[test]
    fn test_localfs_put_overwrites() {
        let tmp = TempDir::new().expect("tmpdir");
        let store = LocalFsPieceStore::new(tmp.path()).expect("new store");
        store.put_piece("k", b"v1").expect("put1");
        store.put_piece("k", b"v2").expect("put2");
        assert_eq!(store.get_whole_piece("k").expect("get"), b"v2".to_vec());
    }

    #[test]
    fn test_localfs_rejects_path_traversal() {
        let tmp = TempDir::new().expect("tmpdir");
        let store = LocalFsPieceStore::new(tmp.path()).expect("new store");
        for bad in ["", "../x", "a/b", ".hidden"] {
            assert!(matches!(
                store.put_piece(bad, b"x"),
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn test_localfs_delete_is_idempotent() {
        let tmp = TempDir::new().expect("tmpdir");
        let store = LocalFsPieceStore::new(tmp.path()).expect("new store");
        store.put_piece("k", b"v").expect("put");
        store.delete_piece("k").expect("delete");
        store.delete_piece("k").expect("delete again");
        assert!(matches!(store.get_whole_piece("k"), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_segments_stored_and_read_back() {
        let tmp = TempDir::new().expect("tmpdir");
        let store = LocalFsPieceStore::new(tmp.path()).expect("new store");
        let payload: Vec<u8> = (0..5 * 1024 + 10).map(|i| (i % 251) as u8).collect();
        let max_seg = 1024;
        let n = segment_count(payload.len() as u64, max_seg);
        assert_eq!(n, 6);
        let mut offset = 0usize;
        for i in 0..n {
            let len = segment_size(payload.len() as u64, max_seg, i) as usize;
            store
                .put_piece(&segment_piece_key(7, i), &payload[offset..offset + len])
                .expect("put segment");
            offset += len;
        }
        let mut joined = Vec::new();
        for i in 0..n {
            joined.extend(store.get_whole_piece(&segment_piece_key(7, i)).expect("get"));
        }
        assert_eq!(joined, payload);
    }
}
