//! Weighted random selection by free-capacity fraction.
//!
//! Candidate weight is `(staking − used) / staking`, scaled to parts per
//! million so the draw stays in integer arithmetic. Only candidates below the
//! 95% usage threshold carry a weight at all.
//!
//! | used / staking | weight (ppm) |
//! |----------------|--------------|
//! | 0%             | 1_000_000    |
//! | 50%            | 500_000      |
//! | 94.99%         | 50_100       |
//! | ≥ 95%          | excluded     |

use rand::Rng;
use spnode_common::below_usage_threshold;

pub const WEIGHT_SCALE: u128 = 1_000_000;

/// Free-capacity weight, `None` when the candidate is not eligible.
pub fn free_capacity_weight(used: u64, staking: u64) -> Option<u64> {
    if !below_usage_threshold(used, staking) {
        return None;
    }
    let free = (staking - used) as u128;
    let w = free * WEIGHT_SCALE / staking as u128;
    Some((w as u64).max(1))
}

/// Draws one item with probability proportional to its weight.
pub fn pick_weighted<T, R: Rng + ?Sized>(candidates: Vec<(T, u64)>, rng: &mut R) -> Option<T> {
    let total: u64 = candidates.iter().map(|(_, w)| *w).sum();
    if total == 0 {
        return None;
    }
    let mut point = rng.gen_range(0..total);
    for (item, w) in candidates {
        if point < w {
            return Some(item);
        }
        point -= w;
    }
    None
}
