//! axum handlers. One handler per route; each maps `ManagerError` into the
//! envelope and never fails at the HTTP level.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use spnode_common::{BucketMigrationProgress, Task, TaskKey};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{paths, Ack, AskTaskRequest, AskTaskResponse, Envelope};
use crate::api::{
    BucketIdRequest, ObjectIdRequest, PickVgfResponse, PostMigrateBucketRequest,
    PreMigrateBucketRequest, RecoverProcess, RecoverProcessView, RecoverRequest,
    ResetRecoveryResponse, SwapOutRequest, TaskProgress, TasksStats,
};
use crate::error::Result;
use crate::manager::Manager;

/// Longest an ask-task call may block.
pub const MAX_ASK_WAIT: Duration = Duration::from_secs(30);

pub struct RpcState {
    pub manager: Arc<Manager>,
    /// Fires on server shutdown; releases blocked ask-task calls.
    pub shutdown: CancellationToken,
}

type Shared = State<Arc<RpcState>>;

fn reply<T>(result: Result<T>) -> Json<Envelope<T>> {
    match result {
        Ok(data) => Json(Envelope::ok(data)),
        Err(e) => {
            debug!(code = e.code(), error = %e, "rpc returned application error");
            Json(Envelope::err(e.to_body()))
        }
    }
}

pub fn router(state: Arc<RpcState>) -> Router {
    Router::new()
        .route(paths::BEGIN_TASK, post(begin_task))
        .route(paths::ASK_TASK, post(ask_task))
        .route(paths::REPORT_TASK, post(report_task))
        .route(paths::PICK_VGF, post(pick_vgf))
        .route(paths::NOTIFY_MIGRATE_SWAP_OUT, post(notify_migrate_swap_out))
        .route(paths::TASKS_STATS, get(tasks_stats))
        .route(paths::TASK_PROGRESS, post(task_progress))
        .route(paths::NOTIFY_PRE_MIGRATE_BUCKET, post(notify_pre_migrate_bucket))
        .route(paths::NOTIFY_POST_MIGRATE_BUCKET, post(notify_post_migrate_bucket))
        .route(paths::RESET_RECOVERY_FAILED_LIST, post(reset_recovery_failed_list))
        .route(paths::TRIGGER_RECOVER, post(trigger_recover))
        .route(paths::RECOVER_PROCESS, get(recover_process))
        .route(paths::BUCKET_MIGRATION_PROGRESS, post(bucket_migration_progress))
        .route(paths::METRICS, get(metrics))
        .route(paths::STATUS, get(status))
        .with_state(state)
}

async fn begin_task(State(s): Shared, Json(task): Json<Task>) -> Json<Envelope<Ack>> {
    reply(s.manager.begin_task(task).await.map(|_| Ack { ok: true }))
}

async fn ask_task(State(s): Shared, Json(req): Json<AskTaskRequest>) -> Json<Envelope<AskTaskResponse>> {
    let wait = Duration::from_millis(req.wait_ms).min(MAX_ASK_WAIT);
    let task = tokio::time::timeout(wait, s.manager.dispatch_task(&s.shutdown, &req.dispatch))
        .await
        .ok()
        .flatten();
    Json(Envelope::ok(AskTaskResponse { task }))
}

async fn report_task(State(s): Shared, Json(task): Json<Task>) -> Json<Envelope<Ack>> {
    reply(s.manager.handle_report(task).await.map(|_| Ack { ok: true }))
}

async fn pick_vgf(State(s): Shared) -> Json<Envelope<PickVgfResponse>> {
    reply(
        s.manager
            .pick_virtual_group_family()
            .await
            .map(|vgf_id| PickVgfResponse { vgf_id }),
    )
}

async fn notify_migrate_swap_out(
    State(s): Shared,
    Json(req): Json<SwapOutRequest>,
) -> Json<Envelope<Vec<TaskKey>>> {
    reply(s.manager.notify_migrate_swap_out(&req))
}

async fn tasks_stats(State(s): Shared) -> Json<Envelope<TasksStats>> {
    Json(Envelope::ok(s.manager.query_tasks_stats()))
}

async fn task_progress(
    State(s): Shared,
    Json(req): Json<ObjectIdRequest>,
) -> Json<Envelope<TaskProgress>> {
    reply(s.manager.query_task_progress(req.object_id).await)
}

async fn notify_pre_migrate_bucket(
    State(s): Shared,
    Json(req): Json<PreMigrateBucketRequest>,
) -> Json<Envelope<BucketMigrationProgress>> {
    reply(s.manager.notify_pre_migrate_bucket_and_deduct_quota(&req).await)
}

async fn notify_post_migrate_bucket(
    State(s): Shared,
    Json(req): Json<PostMigrateBucketRequest>,
) -> Json<Envelope<BucketMigrationProgress>> {
    reply(s.manager.notify_post_migrate_bucket_and_recoup_quota(&req).await)
}

async fn reset_recovery_failed_list(State(s): Shared) -> Json<Envelope<ResetRecoveryResponse>> {
    let cleared = s.manager.reset_recovery_failed_list();
    Json(Envelope::ok(ResetRecoveryResponse { cleared }))
}

async fn trigger_recover(
    State(s): Shared,
    Json(req): Json<RecoverRequest>,
) -> Json<Envelope<RecoverProcess>> {
    reply(s.manager.trigger_recover_for_successor_sp(&req).await)
}

async fn recover_process(State(s): Shared) -> Json<Envelope<RecoverProcessView>> {
    Json(Envelope::ok(s.manager.query_recover_process()))
}

async fn bucket_migration_progress(
    State(s): Shared,
    Json(req): Json<BucketIdRequest>,
) -> Json<Envelope<BucketMigrationProgress>> {
    reply(s.manager.query_bucket_migration_progress(req.bucket_id).await)
}

async fn metrics(State(s): Shared) -> String {
    s.manager.metrics().to_prometheus(&s.manager.queues().stats())
}

async fn status() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests::{ask, harness};
    use crate::rpc::{ClientError, ManagerClient};
    use spnode_common::task::fixtures;
    use spnode_common::{TaskType, UploadState};

    async fn serve(manager: Arc<Manager>) -> (ManagerClient, CancellationToken) {
        let shutdown = CancellationToken::new();
        let state = Arc::new(RpcState {
            manager,
            shutdown: shutdown.clone(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, router(state))
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .unwrap();
        });
        let client = ManagerClient::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        (client, shutdown)
    }

    #[tokio::test]
    async fn test_upload_round_trip_over_http() {
        let h = harness().await;
        let (client, shutdown) = serve(Arc::clone(&h.manager)).await;

        client
            .begin_task(&fixtures::upload_task(5, 1024, 0))
            .await
            .unwrap();
        let progress = client.query_task_progress(5).await.unwrap();
        assert_eq!(progress.state, UploadState::Uploading);

        let mut upload = h.manager.queues().get(TaskType::Upload).scan().remove(0);
        upload.meta.address = "front".into();
        client.report_task(&upload).await.unwrap();

        let mut req = ask("exec-1");
        req.task_types = vec![TaskType::ReplicatePiece];
        let task = client
            .ask_task(&req, Duration::from_millis(500))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.task_type(), TaskType::ReplicatePiece);
        assert_eq!(task.meta.address, "exec-1");
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_ask_returns_none_after_wait() {
        let h = harness().await;
        let (client, shutdown) = serve(Arc::clone(&h.manager)).await;
        let task = client
            .ask_task(&ask("exec-1"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(task.is_none());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_application_errors_travel_in_envelope() {
        let h = harness().await;
        let (client, shutdown) = serve(Arc::clone(&h.manager)).await;

        let err = client.query_task_progress(404).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref b) if b.code == 10003));

        let task = fixtures::upload_task(6, 1024, 0);
        client.begin_task(&task).await.unwrap();
        let err = client.begin_task(&task).await.unwrap_err();
        assert!(matches!(err, ClientError::Remote(_)));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_stats_and_metrics_endpoints() {
        let h = harness().await;
        let (client, shutdown) = serve(Arc::clone(&h.manager)).await;
        client
            .begin_task(&fixtures::upload_task(7, 1024, 0))
            .await
            .unwrap();

        let stats = client.query_tasks_stats().await.unwrap();
        let uploads = stats
            .queues
            .iter()
            .find(|q| q.task_type == TaskType::Upload)
            .unwrap();
        assert_eq!(uploads.len, 1);

        let body = reqwest::get(format!("{}{}", client.base(), paths::METRICS))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("spnode_manager_tasks_begun_total 1"));
        shutdown.cancel();
    }
}
