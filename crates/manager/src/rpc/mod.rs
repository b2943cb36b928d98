//! # Manager RPC
//!
//! JSON over HTTP. Every response is an [`Envelope`] with HTTP 200;
//! application errors travel inside it and are handed back to the caller
//! as-is. Transport, status and decode failures surface on the client as
//! `ClientError::RpcUnknown`.
//!
//! | Route | Method | Body | Data |
//! |-------|--------|------|------|
//! | `/v1/begin-task` | POST | `Task` | `Ack` |
//! | `/v1/ask-task` | POST | `AskTaskRequest` | `AskTaskResponse` |
//! | `/v1/report-task` | POST | `Task` | `Ack` |
//! | `/v1/pick-vgf` | POST | - | `PickVgfResponse` |
//! | `/v1/notify-migrate-swap-out` | POST | `SwapOutRequest` | `Vec<TaskKey>` |
//! | `/v1/tasks-stats` | GET | - | `TasksStats` |
//! | `/v1/task-progress` | POST | `ObjectIdRequest` | `TaskProgress` |
//! | `/v1/notify-pre-migrate-bucket` | POST | `PreMigrateBucketRequest` | `BucketMigrationProgress` |
//! | `/v1/notify-post-migrate-bucket` | POST | `PostMigrateBucketRequest` | `BucketMigrationProgress` |
//! | `/v1/reset-recovery-failed-list` | POST | - | `ResetRecoveryResponse` |
//! | `/v1/trigger-recover` | POST | `RecoverRequest` | `RecoverProcess` |
//! | `/v1/recover-process` | GET | - | `RecoverProcessView` |
//! | `/v1/bucket-migration-progress` | POST | `BucketIdRequest` | `BucketMigrationProgress` |
//! | `/metrics` | GET | - | Prometheus text |
//! | `/status` | GET | - | `ok` |

pub mod client;
pub mod server;

use serde::{Deserialize, Serialize};
use spnode_common::Task;

use crate::api::DispatchRequest;
use crate::error::ErrorBody;

pub use client::{ClientError, ManagerClient};
pub use server::{router, RpcState};

pub mod paths {
    pub const BEGIN_TASK: &str = "/v1/begin-task";
    pub const ASK_TASK: &str = "/v1/ask-task";
    pub const REPORT_TASK: &str = "/v1/report-task";
    pub const PICK_VGF: &str = "/v1/pick-vgf";
    pub const NOTIFY_MIGRATE_SWAP_OUT: &str = "/v1/notify-migrate-swap-out";
    pub const TASKS_STATS: &str = "/v1/tasks-stats";
    pub const TASK_PROGRESS: &str = "/v1/task-progress";
    pub const NOTIFY_PRE_MIGRATE_BUCKET: &str = "/v1/notify-pre-migrate-bucket";
    pub const NOTIFY_POST_MIGRATE_BUCKET: &str = "/v1/notify-post-migrate-bucket";
    pub const RESET_RECOVERY_FAILED_LIST: &str = "/v1/reset-recovery-failed-list";
    pub const TRIGGER_RECOVER: &str = "/v1/trigger-recover";
    pub const RECOVER_PROCESS: &str = "/v1/recover-process";
    pub const BUCKET_MIGRATION_PROGRESS: &str = "/v1/bucket-migration-progress";
    pub const METRICS: &str = "/metrics";
    pub const STATUS: &str = "/status";
}

/// Response wrapper. Exactly one of `error` and `data` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            error: None,
            data: Some(data),
        }
    }

    pub fn err(error: ErrorBody) -> Self {
        Self {
            error: Some(error),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskTaskRequest {
    #[serde(flatten)]
    pub dispatch: DispatchRequest,
    /// Long-poll budget, capped by the server.
    #[serde(default)]
    pub wait_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskTaskResponse {
    /// `None` when nothing became dispatchable within the wait.
    pub task: Option<Task>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_without_data_key() {
        let raw = r#"{"error":{"code":10003,"message":"not found: object 7"}}"#;
        let env: Envelope<AskTaskResponse> = serde_json::from_str(raw).unwrap();
        assert_eq!(env.data, None);
        assert_eq!(env.error.unwrap().code, 10003);
    }

    #[test]
    fn test_empty_ask_response_round_trip() {
        let env = Envelope::ok(AskTaskResponse { task: None });
        let raw = serde_json::to_string(&env).unwrap();
        assert!(!raw.contains("error"));
        let back: Envelope<AskTaskResponse> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, env);
    }
}
