//! spnode-storage
//!
//! Local piece persistence and the byte-level primitives replication needs:
//! piece keys and segment math, erasure coding, piece checksums.
//!
//! ## Modules
//! - `store`: `PieceStore` trait and the in-memory store
//! - `localfs`: filesystem-backed store
//! - `piece`: piece keys and segment arithmetic
//! - `ec`: `ErasureCoder` trait and Reed–Solomon implementation
//! - `checksum`: sha3-256 piece checksums and integrity hashes

pub mod checksum;
pub mod ec;
pub mod error;
pub mod localfs;
pub mod piece;
pub mod store;

pub use crate::checksum::{integrity_hash, piece_checksum};
pub use crate::ec::{ErasureCoder, ReedSolomonCoder};
pub use crate::error::StorageError;
pub use crate::localfs::LocalFsPieceStore;
pub use crate::piece::{ec_piece_key, ec_piece_size, segment_count, segment_piece_key, segment_size};
pub use crate::store::{MemoryPieceStore, PieceStore};
