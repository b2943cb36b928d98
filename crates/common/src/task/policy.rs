//! # Per-Type Task Policy
//!
//! Timeout, retry budget and priority are computed per kind, never stored
//! as per-instance constants.
//!
//! ```text
//! effective = clamp(raw, min, max)
//!
//! raw timeout (data transfer)  = payload_size / (estimated_throughput + 1) / min_speed
//! raw timeout (fixed latency)  = operator-configured duration
//! ```
//!
//! Priority is a constant per kind unless `[manager.policy.overrides.<kind>]`
//! sets one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Task, TaskType};

// ════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

/// Default divisor of the data-transfer timeout formula (bytes per second).
pub const DEFAULT_MIN_SPEED: u64 = 100 * 1024;

/// Default throughput estimate of the data-transfer timeout formula.
pub const DEFAULT_ESTIMATED_THROUGHPUT: u64 = 9;

// ════════════════════════════════════════════════════════════════════════════
// CLAMP RANGE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClampRange<T> {
    pub min: T,
    pub max: T,
}

impl<T: Ord + Copy> ClampRange<T> {
    pub const fn new(min: T, max: T) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, raw: T) -> T {
        raw.max(self.min).min(self.max)
    }
}

/// Built-in policy for one kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeDefaults {
    pub timeout: ClampRange<u64>,
    /// Raw timeout of fixed-latency kinds; unused for data-transfer kinds.
    pub fixed_timeout: u64,
    pub max_retry: ClampRange<u32>,
    pub raw_max_retry: u32,
    pub priority: i32,
}

pub fn defaults_for(task_type: TaskType) -> TypeDefaults {
    let t = |min, max, fixed, rmin, rmax, raw_retry, priority| TypeDefaults {
        timeout: ClampRange::new(min, max),
        fixed_timeout: fixed,
        max_retry: ClampRange::new(rmin, rmax),
        raw_max_retry: raw_retry,
        priority,
    };
    match task_type {
        TaskType::Upload => t(60, 600, 0, 0, 3, 0, 255),
        TaskType::ResumableUpload => t(60, 600, 0, 0, 3, 0, 255),
        TaskType::ReplicatePiece => t(90, 900, 0, 1, 6, 3, 200),
        TaskType::SealObject => t(30, 300, 120, 1, 10, 6, 220),
        TaskType::ReceivePiece => t(30, 600, 0, 0, 6, 3, 120),
        TaskType::GcObject => t(60, 3_600, 300, 0, 5, 3, 16),
        TaskType::GcZombiePiece => t(60, 3_600, 300, 0, 5, 3, 16),
        TaskType::GcMeta => t(60, 3_600, 300, 0, 5, 3, 16),
        TaskType::GcStaleVersion => t(60, 3_600, 300, 0, 5, 3, 16),
        TaskType::GcBucketMigration => t(60, 3_600, 600, 0, 5, 3, 32),
        TaskType::RecoverPiece => t(30, 600, 0, 1, 6, 3, 100),
        TaskType::MigrateGvg => t(60, 3_600, 600, 1, 10, 3, 120),
        TaskType::Download => t(10, 300, 0, 0, 3, 0, 230),
        TaskType::Challenge => t(10, 300, 0, 0, 3, 0, 180),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CONFIG
// ════════════════════════════════════════════════════════════════════════════

/// Operator overrides for one kind. Every value is still clamped.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeOverride {
    /// Raw timeout for fixed-latency kinds, seconds.
    pub timeout: Option<u64>,
    pub max_retry: Option<u32>,
    pub priority: Option<i32>,
}

/// `[manager.policy]` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub estimated_throughput: u64,
    pub min_speed: u64,
    /// Keyed by `TaskType::name()`.
    pub overrides: BTreeMap<String, TypeOverride>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            estimated_throughput: DEFAULT_ESTIMATED_THROUGHPUT,
            min_speed: DEFAULT_MIN_SPEED,
            overrides: BTreeMap::new(),
        }
    }
}

impl PolicyConfig {
    /// Returns the first problem found, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_speed == 0 {
            return Err("manager.policy.min_speed must be > 0".to_string());
        }
        for name in self.overrides.keys() {
            if TaskType::from_name(name).is_none() {
                return Err(format!("manager.policy.overrides: unknown task type '{}'", name));
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// POLICY
// ════════════════════════════════════════════════════════════════════════════

/// Resolved policy used by the manager when a task enters a queue.
#[derive(Clone, Debug)]
pub struct TaskPolicy {
    config: PolicyConfig,
}

impl TaskPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    fn override_for(&self, task_type: TaskType) -> Option<&TypeOverride> {
        self.config.overrides.get(task_type.name())
    }

    /// Effective timeout in seconds for a task of `task_type` moving `payload_size` bytes.
    pub fn timeout(&self, task_type: TaskType, payload_size: u64) -> u64 {
        let d = defaults_for(task_type);
        let raw = if task_type.is_data_transfer() {
            payload_size / self.config.estimated_throughput.saturating_add(1) / self.config.min_speed.max(1)
        } else {
            self.override_for(task_type)
                .and_then(|o| o.timeout)
                .unwrap_or(d.fixed_timeout)
        };
        d.timeout.clamp(raw)
    }

    pub fn max_retry(&self, task_type: TaskType) -> u32 {
        let d = defaults_for(task_type);
        let raw = self
            .override_for(task_type)
            .and_then(|o| o.max_retry)
            .unwrap_or(d.raw_max_retry);
        d.max_retry.clamp(raw)
    }

    pub fn priority(&self, task_type: TaskType) -> i32 {
        self.override_for(task_type)
            .and_then(|o| o.priority)
            .unwrap_or_else(|| defaults_for(task_type).priority)
    }

    /// Stamps timeout, retry budget and priority onto `task`.
    pub fn apply(&self, task: &mut Task) {
        let task_type = task.task_type();
        task.meta.timeout = self.timeout(task_type, task.payload.transfer_size());
        task.meta.max_retry = self.max_retry(task_type);
        task.meta.priority = self.priority(task_type);
    }
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}
