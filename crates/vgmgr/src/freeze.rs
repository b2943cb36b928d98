//! Freeze pool: temporary exclusion of a just-failed secondary SP and of
//! our GVGs it serves in.
//!
//! ## Lifecycle
//!
//! ```text
//!  replicate failure at idx i ──► freeze(sp, gvgs, now)   expire_at = now + freeze_secs
//!                                          │
//!  release loop ──► release_expired(now, peers, required)
//!                        ├── drop entries with expire_at <= now
//!                        └── non-frozen peers < required ──► release the whole pool
//! ```
//!
//! Re-freezing an already frozen SP extends its cool-down and merges the GVG set.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreezeEntry {
    pub sp_id: u32,
    pub gvg_ids: BTreeSet<u32>,
    pub frozen_at: u64,
    pub expire_at: u64,
}

pub struct FreezeSpPool {
    freeze_secs: u64,
    entries: RwLock<HashMap<u32, FreezeEntry>>,
}

impl FreezeSpPool {
    pub fn new(freeze_secs: u64) -> Self {
        Self {
            freeze_secs,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn freeze_sp_and_gvgs(&self, sp_id: u32, gvg_ids: &[u32], now: u64) {
        let expire_at = now.saturating_add(self.freeze_secs);
        let mut entries = self.entries.write();
        let entry = entries.entry(sp_id).or_insert_with(|| FreezeEntry {
            sp_id,
            gvg_ids: BTreeSet::new(),
            frozen_at: now,
            expire_at,
        });
        entry.gvg_ids.extend(gvg_ids.iter().copied());
        entry.frozen_at = now;
        entry.expire_at = expire_at;
        info!(sp_id, gvgs = ?gvg_ids, expire_at, "froze secondary sp");
    }

    pub fn is_sp_frozen(&self, sp_id: u32) -> bool {
        self.entries.read().contains_key(&sp_id)
    }

    pub fn is_gvg_frozen(&self, gvg_id: u32) -> bool {
        self.entries
            .read()
            .values()
            .any(|e| e.gvg_ids.contains(&gvg_id))
    }

    pub fn frozen_sp_ids(&self) -> BTreeSet<u32> {
        self.entries.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn entry(&self, sp_id: u32) -> Option<FreezeEntry> {
        self.entries.read().get(&sp_id).cloned()
    }

    /// Drops expired entries, or the whole pool if fewer than `required` of
    /// the `peer_ids` would remain usable. Returns the number of released SPs.
    pub fn release_expired(&self, now: u64, peer_ids: &BTreeSet<u32>, required: usize) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expire_at > now);

        let frozen_peers = peer_ids.iter().filter(|id| entries.contains_key(id)).count();
        let usable = peer_ids.len() - frozen_peers;
        if !entries.is_empty() && usable < required {
            warn!(
                usable,
                required,
                frozen = entries.len(),
                "too few usable sps, releasing entire freeze pool"
            );
            entries.clear();
        }
        let released = before - entries.len();
        if released > 0 {
            info!(released, remaining = entries.len(), "released frozen sps");
        }
        released
    }
}
