use sha3::{Digest, Sha3_256};

/// sha3-256 of one piece.
pub fn piece_checksum(data: &[u8]) -> Vec<u8> {
    Sha3_256::digest(data).to_vec()
}

/// sha3-256 over the concatenation of per-segment checksums, in segment order.
pub fn integrity_hash(checksums: &[Vec<u8>]) -> Vec<u8> {
    let mut hasher = Sha3_256::new();
    for c in checksums {
        hasher.update(c);
    }
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_piece_checksum_len_and_determinism() {
        let a = piece_checksum(b"abc");
        assert_eq!(a.len(), 32);
        assert_eq!(a, piece_checksum(b"abc"));
        assert_ne!(a, piece_checksum(b"abd"));
    }

    #[test]
    fn test_integrity_hash_is_order_sensitive() {
        let a = piece_checksum(b"a");
        let b = piece_checksum(b"b");
        assert_ne!(
            integrity_hash(&[a.clone(), b.clone()]),
            integrity_hash(&[b, a])
        );
    }
}
