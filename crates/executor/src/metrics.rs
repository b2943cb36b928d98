//! Executor counters, exported in Prometheus text format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ExecutorMetrics {
    pub tasks_received: AtomicU64,
    pub tasks_succeeded: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub pieces_pushed: AtomicU64,
    pub push_retries: AtomicU64,
    pub signatures_rejected: AtomicU64,
    pub objects_sealed: AtomicU64,
    /// Combined replicate+seal transactions that failed and left sealing
    /// to a seal task.
    pub seal_fallbacks: AtomicU64,
}

impl ExecutorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &AtomicU64); 8] = [
            ("tasks_received_total", &self.tasks_received),
            ("tasks_succeeded_total", &self.tasks_succeeded),
            ("tasks_failed_total", &self.tasks_failed),
            ("pieces_pushed_total", &self.pieces_pushed),
            ("push_retries_total", &self.push_retries),
            ("signatures_rejected_total", &self.signatures_rejected),
            ("objects_sealed_total", &self.objects_sealed),
            ("seal_fallbacks_total", &self.seal_fallbacks),
        ];
        let mut out = String::new();
        for (name, counter) in counters {
            let _ = writeln!(out, "# TYPE spnode_executor_{} counter", name);
            let _ = writeln!(out, "spnode_executor_{} {}", name, Self::get(counter));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_lists_every_counter() {
        let m = ExecutorMetrics::new();
        ExecutorMetrics::inc(&m.pieces_pushed);
        ExecutorMetrics::inc(&m.pieces_pushed);
        let text = m.to_prometheus();
        assert!(text.contains("spnode_executor_pieces_pushed_total 2"));
        assert!(text.contains("spnode_executor_seal_fallbacks_total 0"));
        assert_eq!(text.lines().count(), 16);
    }
}
