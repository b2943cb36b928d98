//! HTTP client for the manager RPC, used by executors and operators.
//!
//! Application errors come back as [`ClientError::Remote`] with the server's
//! code untouched. Anything else (connect, timeout, non-200, bad JSON) is
//! [`ClientError::RpcUnknown`].

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spnode_common::{BucketMigrationProgress, Task, TaskKey};
use thiserror::Error;

use super::{paths, Ack, AskTaskRequest, AskTaskResponse, Envelope};
use crate::api::{
    BucketIdRequest, DispatchRequest, ObjectIdRequest, PickVgfResponse, PostMigrateBucketRequest,
    PreMigrateBucketRequest, RecoverProcess, RecoverProcessView, RecoverRequest,
    ResetRecoveryResponse, SwapOutRequest, TaskProgress, TasksStats,
};
use crate::error::ErrorBody;

pub const RPC_UNKNOWN_CODE: u32 = 10005;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("rpc unknown: {0}")]
    RpcUnknown(String),

    #[error("remote error {}: {}", .0.code, .0.message)]
    Remote(ErrorBody),
}

impl ClientError {
    pub fn code(&self) -> u32 {
        match self {
            ClientError::RpcUnknown(_) => RPC_UNKNOWN_CODE,
            ClientError::Remote(body) => body.code,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::RpcUnknown(e.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ManagerClient {
    base: String,
    client: Client,
    timeout: Duration,
}

impl ManagerClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(ManagerClient {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            timeout,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
        let status = resp.status();
        if !status.is_success() {
            let t = resp.text().await.unwrap_or_default();
            return Err(ClientError::RpcUnknown(format!("status {} {}", status, t)));
        }
        let envelope = resp.json::<Envelope<T>>().await?;
        match (envelope.error, envelope.data) {
            (Some(e), _) => Err(ClientError::Remote(e)),
            (None, Some(data)) => Ok(data),
            (None, None) => Err(ClientError::RpcUnknown("empty envelope".into())),
        }
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base, path);
        let resp = self.client.post(&url).json(body).send().await?;
        Self::decode(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let url = format!("{}{}", self.base, path);
        let resp = self.client.get(&url).send().await?;
        Self::decode(resp).await
    }

    pub async fn begin_task(&self, task: &Task) -> Result<(), ClientError> {
        self.post::<_, Ack>(paths::BEGIN_TASK, task).await.map(|_| ())
    }

    /// Long-polls for up to `wait`. The request timeout is stretched by the
    /// same amount so a full wait does not look like a transport failure.
    pub async fn ask_task(
        &self,
        req: &DispatchRequest,
        wait: Duration,
    ) -> Result<Option<Task>, ClientError> {
        let body = AskTaskRequest {
            dispatch: req.clone(),
            wait_ms: wait.as_millis() as u64,
        };
        let url = format!("{}{}", self.base, paths::ASK_TASK);
        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout + wait)
            .json(&body)
            .send()
            .await?;
        Self::decode::<AskTaskResponse>(resp).await.map(|r| r.task)
    }

    pub async fn report_task(&self, task: &Task) -> Result<(), ClientError> {
        self.post::<_, Ack>(paths::REPORT_TASK, task).await.map(|_| ())
    }

    pub async fn pick_virtual_group_family(&self) -> Result<u32, ClientError> {
        self.post::<_, PickVgfResponse>(paths::PICK_VGF, &serde_json::json!({}))
            .await
            .map(|r| r.vgf_id)
    }

    pub async fn notify_migrate_swap_out(
        &self,
        req: &SwapOutRequest,
    ) -> Result<Vec<TaskKey>, ClientError> {
        self.post(paths::NOTIFY_MIGRATE_SWAP_OUT, req).await
    }

    pub async fn query_tasks_stats(&self) -> Result<TasksStats, ClientError> {
        self.get(paths::TASKS_STATS).await
    }

    pub async fn query_task_progress(&self, object_id: u64) -> Result<TaskProgress, ClientError> {
        self.post(paths::TASK_PROGRESS, &ObjectIdRequest { object_id })
            .await
    }

    pub async fn notify_pre_migrate_bucket(
        &self,
        req: &PreMigrateBucketRequest,
    ) -> Result<BucketMigrationProgress, ClientError> {
        self.post(paths::NOTIFY_PRE_MIGRATE_BUCKET, req).await
    }

    pub async fn notify_post_migrate_bucket(
        &self,
        req: &PostMigrateBucketRequest,
    ) -> Result<BucketMigrationProgress, ClientError> {
        self.post(paths::NOTIFY_POST_MIGRATE_BUCKET, req).await
    }

    pub async fn reset_recovery_failed_list(&self) -> Result<usize, ClientError> {
        self.post::<_, ResetRecoveryResponse>(paths::RESET_RECOVERY_FAILED_LIST, &serde_json::json!({}))
            .await
            .map(|r| r.cleared)
    }

    pub async fn trigger_recover(&self, req: &RecoverRequest) -> Result<RecoverProcess, ClientError> {
        self.post(paths::TRIGGER_RECOVER, req).await
    }

    pub async fn query_recover_process(&self) -> Result<RecoverProcessView, ClientError> {
        self.get(paths::RECOVER_PROCESS).await
    }

    pub async fn query_bucket_migration_progress(
        &self,
        bucket_id: u64,
    ) -> Result<BucketMigrationProgress, ClientError> {
        self.post(paths::BUCKET_MIGRATION_PROGRESS, &BucketIdRequest { bucket_id })
            .await
    }
}
