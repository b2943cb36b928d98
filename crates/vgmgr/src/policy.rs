//! Secondary SP selection for new GVGs.
//!
//! A policy partitions the eligible candidates into a preferred list and a
//! backup list. [`select_secondaries`] takes preferred SPs first, backfills
//! from backup and truncates to the exact required count.
//!
//! ```text
//!  candidates ──► policy.partition ──► [preferred..][backup..] ──► take(required)
//! ```

use std::collections::BTreeSet;

use rand::seq::SliceRandom;
use rand::RngCore;
use spnode_common::StorageProvider;

use crate::error::{Result, VgmError};

pub trait SpPickPolicy: Send + Sync {
    /// Splits `candidates` into (preferred, backup). Every candidate returned
    /// must come from the input.
    fn partition(
        &self,
        candidates: Vec<StorageProvider>,
        rng: &mut dyn RngCore,
    ) -> (Vec<StorageProvider>, Vec<StorageProvider>);
}

/// Every candidate is preferred, in random order.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomPolicy;

impl SpPickPolicy for RandomPolicy {
    fn partition(
        &self,
        mut candidates: Vec<StorageProvider>,
        rng: &mut dyn RngCore,
    ) -> (Vec<StorageProvider>, Vec<StorageProvider>) {
        candidates.shuffle(rng);
        (candidates, Vec::new())
    }
}

/// Operator-listed SPs first, everyone else as backup. Both lists shuffled.
#[derive(Debug, Default, Clone)]
pub struct PreferredPolicy {
    preferred: BTreeSet<u32>,
}

impl PreferredPolicy {
    pub fn new(preferred: impl IntoIterator<Item = u32>) -> Self {
        Self {
            preferred: preferred.into_iter().collect(),
        }
    }
}

impl SpPickPolicy for PreferredPolicy {
    fn partition(
        &self,
        candidates: Vec<StorageProvider>,
        rng: &mut dyn RngCore,
    ) -> (Vec<StorageProvider>, Vec<StorageProvider>) {
        let (mut preferred, mut backup): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|sp| self.preferred.contains(&sp.id));
        preferred.shuffle(rng);
        backup.shuffle(rng);
        (preferred, backup)
    }
}

/// Builds the secondary SP list of a new GVG.
pub fn select_secondaries(
    policy: &dyn SpPickPolicy,
    candidates: Vec<StorageProvider>,
    required: usize,
    rng: &mut dyn RngCore,
) -> Result<Vec<StorageProvider>> {
    let (preferred, backup) = policy.partition(candidates, rng);
    let available = preferred.len() + backup.len();
    if available < required {
        return Err(VgmError::InsufficientCandidates {
            available,
            required,
        });
    }
    let mut picked: Vec<StorageProvider> = Vec::with_capacity(required);
    for sp in preferred.into_iter().chain(backup) {
        if picked.len() == required {
            break;
        }
        if picked.iter().all(|p| p.id != sp.id) {
            picked.push(sp);
        }
    }
    if picked.len() < required {
        // The policy returned duplicates.
        return Err(VgmError::InsufficientCandidates {
            available: picked.len(),
            required,
        });
    }
    Ok(picked)
}
