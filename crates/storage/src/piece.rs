//! Piece keys and segment arithmetic.
//!
//! An object of `payload_size` bytes is cut into segments of at most
//! `max_segment_size` bytes; only the last one may be shorter. A 0-byte
//! object has no segments.
//!
//! | Piece | Key |
//! |-------|-----|
//! | whole segment | `<object_id>_s<segment>` |
//! | EC shard | `<object_id>_s<segment>_p<redundancy_idx>` |

pub fn segment_piece_key(object_id: u64, segment_idx: u32) -> String {
    format!("{}_s{}", object_id, segment_idx)
}

pub fn ec_piece_key(object_id: u64, segment_idx: u32, redundancy_idx: u32) -> String {
    format!("{}_s{}_p{}", object_id, segment_idx, redundancy_idx)
}

pub fn segment_count(payload_size: u64, max_segment_size: u64) -> u32 {
    if payload_size == 0 || max_segment_size == 0 {
        return 0;
    }
    payload_size.div_ceil(max_segment_size) as u32
}

/// Size of segment `segment_idx`; 0 if the index is past the end.
pub fn segment_size(payload_size: u64, max_segment_size: u64, segment_idx: u32) -> u64 {
    let count = segment_count(payload_size, max_segment_size);
    if segment_idx >= count {
        return 0;
    }
    if segment_idx + 1 < count {
        return max_segment_size;
    }
    payload_size - max_segment_size * (count as u64 - 1)
}

/// Size of each EC shard of a segment split over `data_chunks` data shards.
pub fn ec_piece_size(segment_size: u64, data_chunks: u32) -> u64 {
    if segment_size == 0 || data_chunks == 0 {
        return 0;
    }
    segment_size.div_ceil(data_chunks as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(segment_piece_key(9, 2), "9_s2");
        assert_eq!(ec_piece_key(9, 2, 5), "9_s2_p5");
    }

    #[test]
    fn test_segment_count() {
        assert_eq!(segment_count(0, 16), 0);
        assert_eq!(segment_count(1, 16), 1);
        assert_eq!(segment_count(16, 16), 1);
        assert_eq!(segment_count(17, 16), 2);
        assert_eq!(segment_count(1 << 20, 16 << 20), 1);
        assert_eq!(segment_count(10, 0), 0);
    }

    #[test]
    fn test_segment_sizes_sum_to_payload() {
        for (payload, max) in [(1u64, 4u64), (16, 4), (17, 4), (1000, 7)] {
            let n = segment_count(payload, max);
            let total: u64 = (0..n).map(|i| segment_size(payload, max, i)).sum();
            assert_eq!(total, payload);
        }
        assert_eq!(segment_size(17, 4, 4), 1);
        assert_eq!(segment_size(17, 4, 5), 0);
    }

    #[test]
    fn test_ec_piece_size() {
        assert_eq!(ec_piece_size(16, 4), 4);
        assert_eq!(ec_piece_size(17, 4), 5);
        assert_eq!(ec_piece_size(0, 4), 0);
    }
}
