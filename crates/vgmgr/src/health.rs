//! Peer SP health checking.
//!
//! ## Probe Cycle
//!
//! ```text
//!  for every in-service peer (concurrently):
//!      attempt 1..=attempts:  GET <endpoint>/status  (per-attempt timeout)
//!          200 ──► healthy
//!          else ──► sleep(retry_delay), next attempt
//!      all attempts failed ──► candidate for unhealthy
//!
//!  apply: recoveries first, then flips to unhealthy while
//!         healthy_count - 1 >= required redundancy
//! ```
//!
//! An SP the checker has never seen is treated as healthy. GVG and VGF health
//! are derived on read:
//!
//! | Entity | Healthy iff |
//! |--------|-------------|
//! | SP     | not marked unhealthy |
//! | GVG    | every secondary SP healthy |
//! | VGF    | at least one member GVG healthy |

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::Client;
use spnode_common::{GlobalVirtualGroup, StorageProvider, VgmConfig, VirtualGroupFamily};
use tracing::{debug, info, warn};

// ════════════════════════════════════════════════════════════════════════════
// PROBE
// ════════════════════════════════════════════════════════════════════════════

/// One health probe attempt against an SP endpoint.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &str) -> bool;
}

/// `GET <endpoint>/status`, healthy on HTTP 200.
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, endpoint: &str) -> bool {
        let url = format!("{}/status", endpoint.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(%url, error = %e, "health probe transport error");
                false
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CHECKER
// ════════════════════════════════════════════════════════════════════════════

pub struct HealthChecker {
    probe: Arc<dyn HealthProbe>,
    attempts: u32,
    retry_delay: Duration,
    attempt_timeout: Duration,
    unhealthy: RwLock<HashSet<u32>>,
}

impl HealthChecker {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        attempts: u32,
        retry_delay: Duration,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            probe,
            attempts: attempts.max(1),
            retry_delay,
            attempt_timeout,
            unhealthy: RwLock::new(HashSet::new()),
        }
    }

    pub fn from_config(probe: Arc<dyn HealthProbe>, cfg: &VgmConfig) -> Self {
        Self::new(
            probe,
            cfg.health_check_attempts,
            Duration::from_millis(cfg.health_check_retry_delay_ms),
            Duration::from_millis(cfg.health_check_timeout_ms),
        )
    }

    /// Probes one SP with bounded retries.
    pub async fn check_sp(&self, sp: &StorageProvider) -> bool {
        for attempt in 1..=self.attempts {
            let ok = tokio::time::timeout(self.attempt_timeout, self.probe.probe(&sp.endpoint))
                .await
                .unwrap_or(false);
            if ok {
                return true;
            }
            debug!(sp_id = sp.id, attempt, "health probe failed");
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        false
    }

    /// Probes every peer and applies the results under the redundancy floor.
    pub async fn run_once(&self, peers: &[StorageProvider], required: usize) {
        let results = join_all(peers.iter().map(|sp| async move { (sp.id, self.check_sp(sp).await) })).await;
        self.apply(&results, required);
    }

    /// Applies probe results. Recoveries are applied before failures so that
    /// a recovering SP can make room for a failing one.
    pub fn apply(&self, results: &[(u32, bool)], required: usize) {
        let mut unhealthy = self.unhealthy.write();
        for (sp_id, ok) in results {
            if *ok && unhealthy.remove(sp_id) {
                info!(sp_id = *sp_id, "sp recovered");
            }
        }

        let mut healthy_count = results
            .iter()
            .filter(|(id, _)| !unhealthy.contains(id))
            .count();
        for (sp_id, ok) in results {
            if *ok || unhealthy.contains(sp_id) {
                continue;
            }
            if healthy_count > required {
                unhealthy.insert(*sp_id);
                healthy_count -= 1;
                warn!(sp_id = *sp_id, healthy_count, "sp marked unhealthy");
            } else {
                warn!(
                    sp_id = *sp_id,
                    healthy_count,
                    required,
                    "sp failed health check, kept healthy to hold redundancy floor"
                );
            }
        }
    }

    pub fn is_sp_healthy(&self, sp_id: u32) -> bool {
        !self.unhealthy.read().contains(&sp_id)
    }

    pub fn is_gvg_healthy(&self, gvg: &GlobalVirtualGroup) -> bool {
        let unhealthy = self.unhealthy.read();
        gvg.secondary_sp_ids.iter().all(|id| !unhealthy.contains(id))
    }

    pub fn is_vgf_healthy(&self, vgf: &VirtualGroupFamily) -> bool {
        vgf.gvgs.values().any(|g| self.is_gvg_healthy(g))
    }

    pub fn unhealthy_sp_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.unhealthy.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    /// Scripted probe: per endpoint, a queue of outcomes, then `default`.
    struct MockProbe {
        scripts: Mutex<HashMap<String, Vec<bool>>>,
        default: bool,
        calls: AtomicU32,
    }

    impl MockProbe {
        fn new(default: bool) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                default,
                calls: AtomicU32::new(0),
            }
        }

        fn script(&self, endpoint: &str, outcomes: Vec<bool>) {
            self.scripts.lock().insert(endpoint.to_string(), outcomes);
        }
    }

    #[async_trait]
    impl HealthProbe for MockProbe {
        async fn probe(&self, endpoint: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(endpoint) {
                Some(q) if !q.is_empty() => q.remove(0),
                _ => self.default,
            }
        }
    }

    fn sp(id: u32) -> StorageProvider {
        StorageProvider {
            id,
            operator_address: String::new(),
            endpoint: format!("http://sp{}", id),
            bls_public_key: vec![],
            in_service: true,
        }
    }

    fn checker(probe: Arc<MockProbe>) -> HealthChecker {
        HealthChecker::new(probe, 3, Duration::from_millis(1), Duration::from_millis(200))
    }

    fn gvg(secondaries: Vec<u32>) -> GlobalVirtualGroup {
        GlobalVirtualGroup {
            id: 1,
            family_id: 1,
            primary_sp_id: 1,
            secondary_sp_ids: secondaries,
            secondary_endpoints: vec![],
            stored_size: 0,
            staking_storage_size: 1,
        }
    }

    // ──── PROBING ────

    #[tokio::test]
    async fn test_retry_then_healthy() {
        let probe = Arc::new(MockProbe::new(true));
        probe.script("http://sp2", vec![false, false, true]);
        let hc = checker(probe.clone());
        assert!(hc.check_sp(&sp(2)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let probe = Arc::new(MockProbe::new(false));
        let hc = checker(probe.clone());
        assert!(!hc.check_sp(&sp(2)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    // ──── FLOOR ────

    #[tokio::test]
    async fn test_unhealthy_flip_respects_floor() {
        let probe = Arc::new(MockProbe::new(false));
        probe.script("http://sp2", vec![true; 3]);
        probe.script("http://sp3", vec![true; 3]);
        let hc = checker(probe);
        let peers: Vec<_> = (2..=5).map(sp).collect();
        // 2 healthy, 2 failing, 3 required: only one failure may flip.
        hc.run_once(&peers, 3).await;
        assert_eq!(hc.unhealthy_sp_ids().len(), 1);
    }

    #[test]
    fn test_recovery_applied_before_failures() {
        let hc = checker(Arc::new(MockProbe::new(true)));
        hc.apply(&[(2, false), (3, true), (4, true)], 2);
        assert_eq!(hc.unhealthy_sp_ids(), vec![2]);
        // 2 recovers while 3 fails: floor of 2 still allows the flip.
        hc.apply(&[(2, true), (3, false), (4, true)], 2);
        assert!(hc.is_sp_healthy(2));
        assert!(!hc.is_sp_healthy(3));
    }

    // ──── DERIVED ────

    #[test]
    fn test_gvg_and_vgf_health_derived() {
        let hc = checker(Arc::new(MockProbe::new(true)));
        hc.apply(&[(2, false), (3, true), (4, true), (5, true)], 1);
        let bad = gvg(vec![2, 3]);
        let mut good = gvg(vec![3, 4]);
        good.id = 2;
        assert!(!hc.is_gvg_healthy(&bad));
        assert!(hc.is_gvg_healthy(&good));

        let mut vgf = VirtualGroupFamily {
            id: 1,
            primary_sp_id: 1,
            gvgs: Default::default(),
        };
        vgf.gvgs.insert(1, bad);
        assert!(!hc.is_vgf_healthy(&vgf));
        vgf.gvgs.insert(2, good);
        assert!(hc.is_vgf_healthy(&vgf));
    }

    #[test]
    fn test_unknown_sp_is_healthy() {
        let hc = checker(Arc::new(MockProbe::new(true)));
        assert!(hc.is_sp_healthy(99));
    }
}
