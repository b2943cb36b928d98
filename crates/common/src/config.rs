//! Config loader using TOML and serde.
//!
//! One file, four sections. Every field has a default, so an empty file is
//! a valid config:
//!
//! ```toml
//! [node]
//! sp_id = 1
//! rpc_addr = "127.0.0.1:9333"
//!
//! [manager]
//! redispatch_grace_secs = 30
//!
//! [manager.policy.overrides.seal_object]
//! timeout = 180
//!
//! [vgm]
//! refresh_interval_secs = 5
//!
//! [executor]
//! push_attempts = 3
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::policy::PolicyConfig;
use crate::task::TaskType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub manager: ManagerConfig,
    pub vgm: VgmConfig,
    pub executor: ExecutorConfig,
}

// ════════════════════════════════════════════════════════════════════════════
// NODE
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's storage provider id.
    pub sp_id: u32,
    pub operator_address: String,
    pub chain_id: u64,
    /// Where the local piece store keeps its files.
    pub data_dir: String,
    /// Bind address of the manager RPC server.
    pub rpc_addr: String,
    /// Base URL executors use to reach the manager.
    pub manager_endpoint: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            sp_id: 1,
            operator_address: String::new(),
            chain_id: 1,
            data_dir: "./data".to_string(),
            rpc_addr: "127.0.0.1:9333".to_string(),
            manager_endpoint: "http://127.0.0.1:9333".to_string(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// MANAGER
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub upload_queue_cap: usize,
    pub resumable_upload_queue_cap: usize,
    pub replicate_queue_cap: usize,
    pub seal_queue_cap: usize,
    pub receive_queue_cap: usize,
    pub gc_object_queue_cap: usize,
    pub gc_zombie_queue_cap: usize,
    pub gc_meta_queue_cap: usize,
    pub gc_stale_version_queue_cap: usize,
    pub gc_bucket_migration_queue_cap: usize,
    pub recover_queue_cap: usize,
    pub migrate_gvg_queue_cap: usize,
    pub download_queue_cap: usize,
    pub challenge_queue_cap: usize,

    /// Extra seconds past a dispatched task's own timeout before it may be
    /// handed to another executor.
    pub redispatch_grace_secs: u64,
    /// Poll tick of a blocked `dispatch_task`, milliseconds.
    pub dispatch_poll_ms: u64,
    /// Period of the re-dispatch reconciler.
    pub reconcile_interval_secs: u64,

    pub enable_gc_object: bool,
    pub gc_object_interval_secs: u64,
    /// Block heights covered by one GC-object task.
    pub gc_object_block_interval: u64,
    /// Blocks behind the chain head a GC-object task stays.
    pub gc_object_safe_distance: u64,
    pub enable_gc_zombie: bool,
    pub gc_zombie_interval_secs: u64,
    pub enable_gc_meta: bool,
    pub gc_meta_interval_secs: u64,
    /// Ids covered by one GC-zombie / GC-meta task.
    pub gc_batch_size: u64,
    /// Ids one GC-zombie / GC-meta sweep walks before restarting from 0.
    pub gc_sweep_span: u64,

    /// Bound of the async persistence side-effect queue.
    pub side_effect_queue_cap: usize,

    pub policy: PolicyConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            upload_queue_cap: 1024,
            resumable_upload_queue_cap: 1024,
            replicate_queue_cap: 1024,
            seal_queue_cap: 1024,
            receive_queue_cap: 1024,
            gc_object_queue_cap: 4,
            gc_zombie_queue_cap: 4,
            gc_meta_queue_cap: 4,
            gc_stale_version_queue_cap: 64,
            gc_bucket_migration_queue_cap: 64,
            recover_queue_cap: 1024,
            migrate_gvg_queue_cap: 256,
            download_queue_cap: 1024,
            challenge_queue_cap: 1024,
            redispatch_grace_secs: 30,
            dispatch_poll_ms: 500,
            reconcile_interval_secs: 10,
            enable_gc_object: true,
            gc_object_interval_secs: 60,
            gc_object_block_interval: 1_000,
            gc_object_safe_distance: 1_000,
            enable_gc_zombie: true,
            gc_zombie_interval_secs: 600,
            enable_gc_meta: true,
            gc_meta_interval_secs: 600,
            gc_batch_size: 1_000,
            gc_sweep_span: 1_000_000,
            side_effect_queue_cap: 1024,
            policy: PolicyConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn queue_cap(&self, task_type: TaskType) -> usize {
        match task_type {
            TaskType::Upload => self.upload_queue_cap,
            TaskType::ResumableUpload => self.resumable_upload_queue_cap,
            TaskType::ReplicatePiece => self.replicate_queue_cap,
            TaskType::SealObject => self.seal_queue_cap,
            TaskType::ReceivePiece => self.receive_queue_cap,
            TaskType::GcObject => self.gc_object_queue_cap,
            TaskType::GcZombiePiece => self.gc_zombie_queue_cap,
            TaskType::GcMeta => self.gc_meta_queue_cap,
            TaskType::GcStaleVersion => self.gc_stale_version_queue_cap,
            TaskType::GcBucketMigration => self.gc_bucket_migration_queue_cap,
            TaskType::RecoverPiece => self.recover_queue_cap,
            TaskType::MigrateGvg => self.migrate_gvg_queue_cap,
            TaskType::Download => self.download_queue_cap,
            TaskType::Challenge => self.challenge_queue_cap,
        }
    }

    pub fn dispatch_poll(&self) -> Duration {
        Duration::from_millis(self.dispatch_poll_ms)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// VGM
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VgmConfig {
    pub refresh_interval_secs: u64,

    pub enable_health_check: bool,
    pub health_check_interval_secs: u64,
    pub health_check_attempts: u32,
    pub health_check_retry_delay_ms: u64,
    pub health_check_timeout_ms: u64,

    pub freeze_secs: u64,
    pub freeze_release_interval_secs: u64,

    pub enable_empty_gvg_gc: bool,
    pub empty_gvg_safe_delete_secs: u64,
    pub gvg_gc_interval_secs: u64,

    pub enable_stake_top_up: bool,

    /// SP ids never chosen as secondaries.
    pub sp_black_list: Vec<u32>,
}

impl Default for VgmConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 5,
            enable_health_check: true,
            health_check_interval_secs: 60,
            health_check_attempts: 3,
            health_check_retry_delay_ms: 1_000,
            health_check_timeout_ms: 3_000,
            freeze_secs: 300,
            freeze_release_interval_secs: 60,
            enable_empty_gvg_gc: true,
            empty_gvg_safe_delete_secs: 24 * 60 * 60,
            gvg_gc_interval_secs: 600,
            enable_stake_top_up: true,
            sp_black_list: Vec::new(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// EXECUTOR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name the manager records as the task's `address`.
    pub address: String,
    pub max_memory_bytes: u64,
    pub max_tasks: u32,
    pub worker_count: usize,
    /// Pause between empty asks, milliseconds.
    pub ask_interval_ms: u64,

    pub push_attempts: u32,
    pub push_retry_delay_ms: u64,
    pub push_timeout_ms: u64,
    pub done_timeout_ms: u64,

    pub seal_attempts: u32,
    pub seal_retry_delay_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            address: "executor-0".to_string(),
            max_memory_bytes: 2 << 30,
            max_tasks: 16,
            worker_count: 4,
            ask_interval_ms: 1_000,
            push_attempts: 3,
            push_retry_delay_ms: 1_000,
            push_timeout_ms: 30_000,
            done_timeout_ms: 10_000,
            seal_attempts: 3,
            seal_retry_delay_ms: 2_000,
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LOAD & VALIDATE
// ════════════════════════════════════════════════════════════════════════════

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |m: &str| Err(ConfigError::Invalid(m.to_string()));
        if self.node.sp_id == 0 {
            return invalid("node.sp_id must be > 0");
        }
        for t in TaskType::ALL {
            if self.manager.queue_cap(t) == 0 {
                return Err(ConfigError::Invalid(format!(
                    "manager: {} queue capacity must be > 0",
                    t
                )));
            }
        }
        if self.manager.dispatch_poll_ms == 0 {
            return invalid("manager.dispatch_poll_ms must be > 0");
        }
        if self.manager.gc_batch_size == 0 || self.manager.gc_object_block_interval == 0 {
            return invalid("manager gc batch sizes must be > 0");
        }
        if self.manager.side_effect_queue_cap == 0 {
            return invalid("manager.side_effect_queue_cap must be > 0");
        }
        self.manager.policy.validate().map_err(ConfigError::Invalid)?;
        if self.vgm.refresh_interval_secs == 0 {
            return invalid("vgm.refresh_interval_secs must be > 0");
        }
        if self.vgm.health_check_attempts == 0 {
            return invalid("vgm.health_check_attempts must be > 0");
        }
        if self.executor.push_attempts == 0 || self.executor.seal_attempts == 0 {
            return invalid("executor attempts must be > 0");
        }
        if self.executor.worker_count == 0 {
            return invalid("executor.worker_count must be > 0");
        }
        Ok(())
    }
}

/// Load and validate config from a TOML file path.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg: Config = toml::from_str(&s)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let def = Config::default();
        assert!(def.validate().is_ok());
        assert_eq!(def.vgm.refresh_interval_secs, 5);
        assert_eq!(def.vgm.empty_gvg_safe_delete_secs, 86_400);
        assert_eq!(def.executor.push_attempts, 3);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let cfg: Config = toml::from_str("").expect("parse");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_load_from_file_partial_sections() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            [node]
            sp_id = 7
            rpc_addr = "0.0.0.0:9400"

            [manager]
            replicate_queue_cap = 8
            redispatch_grace_secs = 5

            [manager.policy.overrides.seal_object]
            timeout = 200
            priority = 1

            [vgm]
            sp_black_list = [3, 4]
        "#;
        write!(tmp, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.node.sp_id, 7);
        assert_eq!(cfg.node.chain_id, 1);
        assert_eq!(cfg.manager.queue_cap(TaskType::ReplicatePiece), 8);
        assert_eq!(cfg.manager.queue_cap(TaskType::Upload), 1024);
        assert_eq!(cfg.vgm.sp_black_list, vec![3, 4]);
        let seal = &cfg.manager.policy.overrides["seal_object"];
        assert_eq!(seal.timeout, Some(200));
        assert_eq!(seal.max_retry, None);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        write!(tmp, "[manager]\nupload_queue_cap = 0\n").expect("write");
        assert!(matches!(load_from_file(tmp.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_rejects_unknown_policy_type() {
        let mut tmp = tempfile::NamedTempFile::new().expect("temp file");
        write!(tmp, "[manager.policy.overrides.nope]\npriority = 3\n").expect("write");
        assert!(matches!(load_from_file(tmp.path()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            load_from_file("/definitely/not/here.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
