//! GVG lifecycle: empty-GVG garbage collection and stake top-up.
//!
//! ## Empty GVG GC
//!
//! ```text
//!  refresh ──► observe(gvgs, now)   first time stored_size == 0 ──► remember now
//!                                   non-empty or vanished       ──► forget
//!  gc loop ──► due(now)             now - first_seen >= safe_delete_secs
//!          ──► query live GVG       still present and still empty ──► signer.delete
//!                                   otherwise                      ──► forget
//! ```
//!
//! ## Stake top-up
//!
//! A GVG at or above the usage threshold gets one `deposit(deposit_increment)`
//! spawned off the refresh path. At most one deposit per GVG is in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use spnode_common::{GlobalVirtualGroup, Signer, TopologySource};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, VgmError};

// ════════════════════════════════════════════════════════════════════════════
// EMPTY GVG TRACKER
// ════════════════════════════════════════════════════════════════════════════

pub struct EmptyGvgTracker {
    safe_delete_secs: u64,
    first_seen_empty: Mutex<HashMap<u32, u64>>,
}

impl EmptyGvgTracker {
    pub fn new(safe_delete_secs: u64) -> Self {
        Self {
            safe_delete_secs,
            first_seen_empty: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe<'a>(&self, gvgs: impl Iterator<Item = &'a GlobalVirtualGroup>, now: u64) {
        let mut seen = self.first_seen_empty.lock();
        let mut present = HashSet::new();
        for g in gvgs {
            present.insert(g.id);
            if g.stored_size == 0 {
                seen.entry(g.id).or_insert(now);
            } else {
                seen.remove(&g.id);
            }
        }
        seen.retain(|id, _| present.contains(id));
    }

    /// GVGs empty for at least the safe-delete period.
    pub fn due(&self, now: u64) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .first_seen_empty
            .lock()
            .iter()
            .filter(|(_, since)| now.saturating_sub(**since) >= self.safe_delete_secs)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn forget(&self, gvg_id: u32) {
        self.first_seen_empty.lock().remove(&gvg_id);
    }

    pub fn tracked(&self) -> usize {
        self.first_seen_empty.lock().len()
    }

    /// Deletes every due GVG that the live chain state confirms is still
    /// empty. Returns the ids deleted.
    pub async fn collect(
        &self,
        source: &dyn TopologySource,
        signer: &dyn Signer,
        now: u64,
    ) -> Result<Vec<u32>> {
        let mut deleted = Vec::new();
        for gvg_id in self.due(now) {
            let live = source
                .query_global_virtual_group(gvg_id)
                .await
                .map_err(VgmError::Topology)?;
            match live {
                Some(g) if g.stored_size == 0 => {
                    signer
                        .delete_global_virtual_group(gvg_id)
                        .await
                        .map_err(VgmError::Signer)?;
                    info!(gvg_id, "deleted empty gvg");
                    deleted.push(gvg_id);
                }
                Some(_) => debug!(gvg_id, "gvg no longer empty, keeping"),
                None => debug!(gvg_id, "gvg already gone"),
            }
            self.forget(gvg_id);
        }
        Ok(deleted)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STAKE TOP-UP
// ════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct StakeTopUp {
    in_flight: Mutex<HashSet<u32>>,
}

impl StakeTopUp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, gvg_id: u32) -> bool {
        self.in_flight.lock().contains(&gvg_id)
    }

    /// Spawns a deposit for `gvg_id` unless one is already running.
    pub fn spawn_deposit(
        self: &Arc<Self>,
        signer: Arc<dyn Signer>,
        gvg_id: u32,
        amount: u64,
    ) -> Option<JoinHandle<()>> {
        if !self.in_flight.lock().insert(gvg_id) {
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            match signer.deposit(gvg_id, amount).await {
                Ok(()) => info!(gvg_id, amount, "staked more storage for gvg"),
                Err(e) => warn!(gvg_id, error = %e, "stake top-up failed"),
            }
            this.in_flight.lock().remove(&gvg_id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spnode_common::{MemoryChain, SignerCall};

    fn gvg(id: u32, stored: u64) -> GlobalVirtualGroup {
        GlobalVirtualGroup {
            id,
            family_id: 1,
            primary_sp_id: 1,
            secondary_sp_ids: vec![2, 3],
            secondary_endpoints: vec![],
            stored_size: stored,
            staking_storage_size: 1_000,
        }
    }

    // ──── EMPTY GVG ────

    #[test]
    fn test_due_after_safe_period() {
        let t = EmptyGvgTracker::new(100);
        let gs = [gvg(1, 0), gvg(2, 5)];
        t.observe(gs.iter(), 1_000);
        assert_eq!(t.tracked(), 1);
        assert!(t.due(1_099).is_empty());
        assert_eq!(t.due(1_100), vec![1]);
    }

    #[test]
    fn test_first_seen_is_sticky() {
        let t = EmptyGvgTracker::new(100);
        t.observe([gvg(1, 0)].iter(), 1_000);
        t.observe([gvg(1, 0)].iter(), 1_050);
        assert_eq!(t.due(1_100), vec![1]);
    }

    #[test]
    fn test_refill_or_vanish_forgets() {
        let t = EmptyGvgTracker::new(100);
        t.observe([gvg(1, 0), gvg(2, 0)].iter(), 0);
        t.observe([gvg(1, 10)].iter(), 10);
        assert_eq!(t.tracked(), 0);
    }

    #[tokio::test]
    async fn test_collect_reverifies_live_state() {
        let chain = MemoryChain::new(1);
        chain.add_gvg(gvg(1, 0));
        chain.add_gvg(gvg(2, 0));
        let t = EmptyGvgTracker::new(100);
        t.observe([gvg(1, 0), gvg(2, 0)].iter(), 0);

        // gvg 2 filled up after the cached observation.
        chain.set_gvg_usage(2, 50, 1_000);
        let deleted = t.collect(&chain, &chain, 200).await.unwrap();
        assert_eq!(deleted, vec![1]);
        assert!(chain.gvg(1).is_none());
        assert!(chain.gvg(2).is_some());
        assert_eq!(t.tracked(), 0);
    }

    // ──── TOP-UP ────

    #[tokio::test]
    async fn test_top_up_deduplicated_while_in_flight() {
        let chain = Arc::new(MemoryChain::new(1));
        chain.add_gvg(gvg(1, 990));
        let top = Arc::new(StakeTopUp::new());
        let h = top.spawn_deposit(chain.clone(), 1, 500).unwrap();
        assert!(top.spawn_deposit(chain.clone(), 1, 500).is_none());
        h.await.unwrap();
        assert!(!top.is_in_flight(1));
        assert_eq!(chain.gvg(1).unwrap().staking_storage_size, 1_500);
        let deposits = chain
            .signer_calls()
            .into_iter()
            .filter(|c| matches!(c, SignerCall::Deposit { .. }))
            .count();
        assert_eq!(deposits, 1);
    }
}
