//! Worker loop: ask the manager for work, run it, report the outcome.
//!
//! ```text
//!  loop {
//!     select! {
//!        shutdown  ──► stop
//!        ask(wait) ──► None ──► sleep(ask_interval)
//!                  └─► Some(task) ──► handler ──► report
//!     }
//!  }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use spnode_common::{ExecutorConfig, ResourceLimit, Task, TaskType};
use spnode_manager::{DispatchRequest, Manager, ManagerClient};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::metrics::ExecutorMetrics;
use crate::replicate::ReplicateExecutor;
use crate::seal::SealExecutor;

/// Task types this executor runs.
pub const SUPPORTED: [TaskType; 2] = [TaskType::ReplicatePiece, TaskType::SealObject];

/// Where tasks come from and where outcomes go.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn ask(&self, req: &DispatchRequest, wait: Duration) -> Result<Option<Task>>;
    async fn report(&self, task: &Task) -> Result<()>;
}

#[async_trait]
impl TaskSource for ManagerClient {
    async fn ask(&self, req: &DispatchRequest, wait: Duration) -> Result<Option<Task>> {
        Ok(self.ask_task(req, wait).await?)
    }

    async fn report(&self, task: &Task) -> Result<()> {
        Ok(self.report_task(task).await?)
    }
}

/// In-process manager, for single-binary deployments and tests.
#[async_trait]
impl TaskSource for Manager {
    async fn ask(&self, req: &DispatchRequest, wait: Duration) -> Result<Option<Task>> {
        let never = CancellationToken::new();
        Ok(tokio::time::timeout(wait, self.dispatch_task(&never, req))
            .await
            .ok()
            .flatten())
    }

    async fn report(&self, task: &Task) -> Result<()> {
        Ok(self.handle_report(task.clone()).await?)
    }
}

pub struct Worker {
    config: ExecutorConfig,
    source: Arc<dyn TaskSource>,
    replicate: Arc<ReplicateExecutor>,
    seal: Arc<SealExecutor>,
    metrics: Arc<ExecutorMetrics>,
}

impl Worker {
    pub fn new(
        config: ExecutorConfig,
        source: Arc<dyn TaskSource>,
        replicate: Arc<ReplicateExecutor>,
        seal: Arc<SealExecutor>,
        metrics: Arc<ExecutorMetrics>,
    ) -> Self {
        Self {
            config,
            source,
            replicate,
            seal,
            metrics,
        }
    }

    fn dispatch_request(&self) -> DispatchRequest {
        DispatchRequest {
            address: self.config.address.clone(),
            limit: ResourceLimit {
                memory_bytes: self.config.max_memory_bytes,
                tasks: self.config.max_tasks,
            },
            task_types: SUPPORTED.to_vec(),
        }
    }

    /// Spawns `worker_count` loops sharing this worker.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.worker_count.max(1))
            .map(|slot| {
                let worker = Arc::clone(&self);
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(slot, cancel).await })
            })
            .collect()
    }

    async fn run(&self, slot: usize, cancel: CancellationToken) {
        info!(slot, address = %self.config.address, "executor worker started");
        let idle = Duration::from_millis(self.config.ask_interval_ms);
        loop {
            let worked = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.run_once(&cancel) => r,
            };
            match worked {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(slot, error = %e, "executor iteration failed"),
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(idle) => {}
            }
        }
        info!(slot, "executor worker stopped");
    }

    /// Runs at most one task. Returns whether one was run.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<bool> {
        let req = self.dispatch_request();
        let Some(task) = self.source.ask(&req, idle_wait(&self.config)).await? else {
            return Ok(false);
        };
        ExecutorMetrics::inc(&self.metrics.tasks_received);
        debug!(task_key = %task.key, retry = task.meta.retry, "task received");

        let done = match task.task_type() {
            TaskType::ReplicatePiece => self.replicate.handle(task, cancel).await,
            TaskType::SealObject => self.seal.handle(task, cancel).await,
            other => {
                let mut task = task;
                let e = ExecutorError::InvalidTask(format!("executor does not run {}", other));
                task.set_error(e.code(), e.to_string());
                task
            }
        };
        if let Err(e) = self.source.report(&done).await {
            warn!(task_key = %done.key, error = %e, "report failed");
        }
        Ok(true)
    }
}

fn idle_wait(config: &ExecutorConfig) -> Duration {
    Duration::from_millis(config.ask_interval_ms.max(1))
}
