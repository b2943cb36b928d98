//! Manager counters.
//!
//! All fields are `AtomicU64` counters, read with `SeqCst` when exported.
//! Gauges (queue lengths) are appended by [`ManagerMetrics::to_prometheus`]
//! from the caller-supplied queue stats.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::queues::QueueStats;

#[derive(Debug, Default)]
pub struct ManagerMetrics {
    pub tasks_begun: AtomicU64,
    pub tasks_dispatched: AtomicU64,
    pub tasks_redispatched: AtomicU64,
    pub reports_succeeded: AtomicU64,
    pub reports_failed: AtomicU64,
    pub tasks_retried: AtomicU64,
    pub tasks_terminal: AtomicU64,
    pub tasks_canceled: AtomicU64,
    pub replicate_tasks_created: AtomicU64,
    pub seal_tasks_created: AtomicU64,
    pub objects_sealed: AtomicU64,
    pub sps_frozen: AtomicU64,
    pub gc_tasks_generated: AtomicU64,
    pub downloads_done: AtomicU64,
    pub challenges_done: AtomicU64,
    pub side_effect_failures: AtomicU64,
}

impl ManagerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }

    fn counters(&self) -> [(&'static str, &'static str, &AtomicU64); 16] {
        [
            ("tasks_begun_total", "Tasks accepted by begin-task", &self.tasks_begun),
            ("tasks_dispatched_total", "Tasks handed to executors", &self.tasks_dispatched),
            ("tasks_redispatched_total", "Dispatches of tasks already in flight", &self.tasks_redispatched),
            ("reports_succeeded_total", "Successful task reports", &self.reports_succeeded),
            ("reports_failed_total", "Failed task reports", &self.reports_failed),
            ("tasks_retried_total", "Failed tasks re-queued for retry", &self.tasks_retried),
            ("tasks_terminal_total", "Tasks abandoned after exhausting retries", &self.tasks_terminal),
            ("tasks_canceled_total", "Reports for tasks no longer queued", &self.tasks_canceled),
            ("replicate_tasks_created_total", "Replicate tasks synthesized from uploads", &self.replicate_tasks_created),
            ("seal_tasks_created_total", "Fallback seal tasks", &self.seal_tasks_created),
            ("objects_sealed_total", "Objects sealed on chain", &self.objects_sealed),
            ("sps_frozen_total", "Secondary SPs frozen after replicate failures", &self.sps_frozen),
            ("gc_tasks_generated_total", "GC tasks generated by background loops", &self.gc_tasks_generated),
            ("downloads_done_total", "Completed download tasks", &self.downloads_done),
            ("challenges_done_total", "Completed challenge tasks", &self.challenges_done),
            ("side_effect_failures_total", "Failed persistence side effects", &self.side_effect_failures),
        ]
    }

    /// Prometheus text exposition of every counter plus per-queue gauges.
    #[must_use]
    pub fn to_prometheus(&self, queues: &[QueueStats]) -> String {
        let mut out = String::new();
        for (name, help, counter) in self.counters() {
            let _ = writeln!(out, "# HELP spnode_manager_{} {}", name, help);
            let _ = writeln!(out, "# TYPE spnode_manager_{} counter", name);
            let _ = writeln!(out, "spnode_manager_{} {}", name, Self::get(counter));
        }
        out.push_str("# HELP spnode_manager_queue_length Tasks currently queued\n");
        out.push_str("# TYPE spnode_manager_queue_length gauge\n");
        for q in queues {
            let _ = writeln!(out, "spnode_manager_queue_length{{queue=\"{}\"}} {}", q.task_type, q.len);
        }
        out
    }
}
