//! Seal executor: the fallback when the combined replicate+seal failed.
//!
//! Re-verifies the stored partial signatures in redundancy-index order,
//! aggregates them and retries the seal transaction a bounded number of
//! times. An object the chain already reports as sealed succeeds at once.

use std::sync::Arc;
use std::time::Duration;

use spnode_common::{
    ExecutorConfig, SealObjectPayload, SealObjectRequest, Signer, Task, TaskPayload, TopologySource,
};
use spnode_tss::{aggregate_signatures, seal_sign_doc, verify_partials_in_order, SigningError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{ExecutorError, Result};
use crate::metrics::ExecutorMetrics;
use crate::replicate::secondary_keys;

pub struct SealExecutor {
    config: ExecutorConfig,
    chain_id: u64,
    topology: Arc<dyn TopologySource>,
    signer: Arc<dyn Signer>,
    metrics: Arc<ExecutorMetrics>,
}

impl SealExecutor {
    pub fn new(
        config: ExecutorConfig,
        chain_id: u64,
        topology: Arc<dyn TopologySource>,
        signer: Arc<dyn Signer>,
        metrics: Arc<ExecutorMetrics>,
    ) -> Self {
        Self {
            config,
            chain_id,
            topology,
            signer,
            metrics,
        }
    }

    pub async fn handle(&self, mut task: Task, cancel: &CancellationToken) -> Task {
        let result = match &task.payload {
            TaskPayload::SealObject(payload) => self.execute(payload, cancel).await,
            other => Err(ExecutorError::InvalidTask(format!(
                "seal executor got {}",
                other.task_type()
            ))),
        };
        match result {
            Ok(()) => {
                task.clear_error();
                ExecutorMetrics::inc(&self.metrics.tasks_succeeded);
            }
            Err(e) => {
                warn!(task_key = %task.key, error = %e, "seal failed");
                task.set_error(e.code(), e.to_string());
                ExecutorMetrics::inc(&self.metrics.tasks_failed);
            }
        }
        task
    }

    pub async fn execute(&self, payload: &SealObjectPayload, cancel: &CancellationToken) -> Result<()> {
        let object_id = payload.object.id;
        let already = self
            .topology
            .is_object_sealed(object_id)
            .await
            .map_err(ExecutorError::Chain)?;
        if already {
            info!(object_id, "object already sealed");
            return Ok(());
        }

        let keys = secondary_keys(self.topology.as_ref(), &payload.secondary_sp_ids).await?;
        let doc = seal_sign_doc(
            self.chain_id,
            payload.gvg_id,
            object_id,
            &payload.object.checksum_root,
        );
        let partials = verify_partials_in_order(&keys, &payload.secondary_signatures, &doc)
            .map_err(|e| match e {
                SigningError::VerificationFailed { index } => {
                    ExecutorMetrics::inc(&self.metrics.signatures_rejected);
                    ExecutorError::Signature {
                        redundancy_idx: index,
                        source: e,
                    }
                }
                other => ExecutorError::InvalidTask(other.to_string()),
            })?;
        let aggregate = aggregate_signatures(&partials).map_err(ExecutorError::Aggregate)?;
        let req = SealObjectRequest {
            object_id,
            bucket_name: payload.object.bucket_name.clone(),
            object_name: payload.object.object_name.clone(),
            gvg_id: payload.gvg_id,
            secondary_signature: aggregate.to_bytes().to_vec(),
        };

        let attempts = self.config.seal_attempts.max(1);
        let delay = Duration::from_millis(self.config.seal_retry_delay_ms);
        let mut attempt = 1;
        loop {
            match self.signer.seal_object(req.clone()).await {
                Ok(()) => {
                    ExecutorMetrics::inc(&self.metrics.objects_sealed);
                    info!(object_id, gvg_id = payload.gvg_id, attempt, "object sealed");
                    return Ok(());
                }
                Err(e) if attempt >= attempts => return Err(ExecutorError::Seal(e)),
                Err(e) => {
                    warn!(object_id, attempt, error = %e, "seal attempt failed");
                    attempt += 1;
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
