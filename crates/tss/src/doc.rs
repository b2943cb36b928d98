//! Seal sign document.
//!
//! Every secondary of a GVG signs the same 32-byte document:
//!
//! ```text
//! sha3_256( SEAL_DOMAIN || chain_id_be8 || gvg_id_be4 || object_id_be8 || checksum_root )
//! ```

use sha3::{Digest, Sha3_256};

pub const SEAL_DOMAIN: &[u8] = b"spnode-seal-object-v1";

pub fn seal_sign_doc(chain_id: u64, gvg_id: u32, object_id: u64, checksum_root: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(SEAL_DOMAIN);
    hasher.update(chain_id.to_be_bytes());
    hasher.update(gvg_id.to_be_bytes());
    hasher.update(object_id.to_be_bytes());
    hasher.update(checksum_root);
    hasher.finalize().into()
}
