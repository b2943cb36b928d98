//! # Replicate Executor
//!
//! Copies an object the primary holds locally onto the secondaries of the
//! picked GVG, then collects their seal signatures and tries to seal.
//!
//! ```text
//!  for each segment:                      (pushes unordered, bounded retry)
//!     local store ──► EC split / replica ──┬─► secondary 0
//!                                          ├─► secondary 1   first failure
//!                                          └─► secondary n   cancels the rest
//!  for i in 0..n (strict order):
//!     done(i) ──► partial_i ──► verify(pk_i) ──► accept
//!  aggregate ──► signer.seal_object ──► sealed = true | false
//! ```
//!
//! ## Failure attribution
//!
//! | Failure | `not_available_sp_idx` |
//! |---------|------------------------|
//! | push to `i` exhausted its attempts | `i` |
//! | done call to `i` failed | `i` |
//! | partial signature of `i` invalid | `i` |
//! | local read, EC, metadata | unchanged |
//! | combined seal failed | none, task succeeds with `sealed = false` |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use spnode_common::{
    ExecutorConfig, MetadataStore, RedundancyType, ReplicatePiecePayload, SealObjectRequest,
    Signer, Task, TaskPayload, TopologySource, NO_FAILED_SP,
};
use spnode_storage::{
    piece_checksum, segment_count, segment_piece_key, ErasureCoder, PieceStore, ReedSolomonCoder,
};
use spnode_tss::{
    aggregate_signatures, seal_sign_doc, verify_partial, BlsPublicKey, BlsSignature, SigningError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};
use crate::metrics::ExecutorMetrics;
use crate::receiver::{DoneReplicateRequest, ReceiverClient, ReplicatePieceRequest};

pub struct ReplicateExecutor {
    config: ExecutorConfig,
    chain_id: u64,
    store: Arc<dyn PieceStore>,
    receiver: Arc<dyn ReceiverClient>,
    metadata: Arc<dyn MetadataStore>,
    topology: Arc<dyn TopologySource>,
    signer: Arc<dyn Signer>,
    metrics: Arc<ExecutorMetrics>,
}

impl ReplicateExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        chain_id: u64,
        store: Arc<dyn PieceStore>,
        receiver: Arc<dyn ReceiverClient>,
        metadata: Arc<dyn MetadataStore>,
        topology: Arc<dyn TopologySource>,
        signer: Arc<dyn Signer>,
        metrics: Arc<ExecutorMetrics>,
    ) -> Self {
        Self {
            config,
            chain_id,
            store,
            receiver,
            metadata,
            topology,
            signer,
            metrics,
        }
    }

    /// Runs the task and writes the outcome into it, ready to be reported.
    pub async fn handle(&self, mut task: Task, cancel: &CancellationToken) -> Task {
        let result = match &mut task.payload {
            TaskPayload::ReplicatePiece(payload) => {
                payload.not_available_sp_idx = NO_FAILED_SP;
                self.execute(payload, cancel).await
            }
            other => Err(ExecutorError::InvalidTask(format!(
                "replicate executor got {}",
                other.task_type()
            ))),
        };
        match result {
            Ok(()) => {
                task.clear_error();
                ExecutorMetrics::inc(&self.metrics.tasks_succeeded);
            }
            Err(e) => {
                if let (Some(idx), TaskPayload::ReplicatePiece(p)) = (e.failed_index(), &mut task.payload) {
                    p.not_available_sp_idx = idx as i32;
                }
                warn!(task_key = %task.key, error = %e, "replicate failed");
                task.set_error(e.code(), e.to_string());
                ExecutorMetrics::inc(&self.metrics.tasks_failed);
            }
        }
        task
    }

    pub async fn execute(
        &self,
        payload: &mut ReplicatePiecePayload,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let n = payload.secondary_sp_ids.len();
        if n == 0 || payload.secondary_endpoints.len() != n {
            return Err(ExecutorError::InvalidTask(format!(
                "{} secondaries with {} endpoints",
                n,
                payload.secondary_endpoints.len()
            )));
        }
        let coder = match payload.object.redundancy {
            RedundancyType::ErasureCode => {
                let coder = ReedSolomonCoder::new(
                    payload.params.redundant_data_chunk_num as usize,
                    payload.params.redundant_parity_chunk_num as usize,
                )?;
                if coder.total_shards() != n {
                    return Err(ExecutorError::InvalidTask(format!(
                        "{} shards for {} secondaries",
                        coder.total_shards(),
                        n
                    )));
                }
                Some(coder)
            }
            RedundancyType::Replica => None,
        };

        let object_id = payload.object.id;
        let segments = segment_count(payload.object.payload_size, payload.params.max_segment_size);
        info!(object_id, gvg_id = payload.gvg_id, segments, secondaries = n, "replicating object");

        for segment_idx in 0..segments {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Canceled);
            }
            let segment = self
                .store
                .get_whole_piece(&segment_piece_key(object_id, segment_idx))?;
            let pieces = match &coder {
                Some(coder) => coder.encode(&segment)?,
                None => vec![segment; n],
            };
            let requests: Vec<ReplicatePieceRequest> = pieces
                .into_iter()
                .enumerate()
                .map(|(i, data)| ReplicatePieceRequest {
                    object_id,
                    gvg_id: payload.gvg_id,
                    segment_idx,
                    redundancy_idx: if coder.is_some() { i as i32 } else { -1 },
                    data,
                })
                .collect();

            let checksums = self
                .push_segment(&payload.secondary_endpoints, requests, cancel)
                .await?;
            for (i, checksum) in checksums.into_iter().enumerate() {
                self.metadata
                    .set_replicate_piece_checksum(object_id, segment_idx, i as i32, checksum)
                    .await
                    .map_err(ExecutorError::Metadata)?;
            }
            debug!(object_id, segment_idx, "segment replicated");
        }

        let partials = self.collect_signatures(payload, cancel).await?;
        payload.secondary_signatures = partials.iter().map(|s| s.to_bytes().to_vec()).collect();

        let aggregate = aggregate_signatures(&partials).map_err(ExecutorError::Aggregate)?;
        let req = SealObjectRequest {
            object_id,
            bucket_name: payload.object.bucket_name.clone(),
            object_name: payload.object.object_name.clone(),
            gvg_id: payload.gvg_id,
            secondary_signature: aggregate.to_bytes().to_vec(),
        };
        match self.signer.seal_object(req).await {
            Ok(()) => {
                payload.sealed = true;
                ExecutorMetrics::inc(&self.metrics.objects_sealed);
                info!(object_id, gvg_id = payload.gvg_id, "object replicated and sealed");
            }
            Err(e) => {
                payload.sealed = false;
                ExecutorMetrics::inc(&self.metrics.seal_fallbacks);
                warn!(object_id, error = %e, "combined seal failed, leaving it to a seal task");
            }
        }
        Ok(())
    }

    /// Pushes one segment's pieces to every secondary at once. Returns the
    /// checksums in redundancy-index order.
    async fn push_segment(
        &self,
        endpoints: &[String],
        requests: Vec<ReplicatePieceRequest>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<u8>>> {
        let siblings = cancel.child_token();
        let first_failure: Mutex<Option<usize>> = Mutex::new(None);

        let pushes = requests.iter().enumerate().map(|(i, req)| {
            let siblings = &siblings;
            let first_failure = &first_failure;
            async move {
                let result = self.push_with_retry(i, &endpoints[i], req, siblings).await;
                if result.is_err() && !siblings.is_cancelled() {
                    first_failure.lock().get_or_insert(i);
                    siblings.cancel();
                }
                result
            }
        });
        let results = join_all(pushes).await;

        if cancel.is_cancelled() {
            return Err(ExecutorError::Canceled);
        }
        let failed = *first_failure.lock();
        match failed {
            Some(i) => Err(results
                .into_iter()
                .nth(i)
                .and_then(Result::err)
                .unwrap_or(ExecutorError::Canceled)),
            None => results.into_iter().collect(),
        }
    }

    async fn push_with_retry(
        &self,
        redundancy_idx: usize,
        endpoint: &str,
        req: &ReplicatePieceRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let expected = piece_checksum(&req.data);
        let timeout = Duration::from_millis(self.config.push_timeout_ms);
        let delay = Duration::from_millis(self.config.push_retry_delay_ms);
        let attempts = self.config.push_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
                r = tokio::time::timeout(timeout, self.receiver.replicate_piece(endpoint, req)) => r,
            };
            match outcome {
                Ok(Ok(receipt)) if receipt.checksum == expected => {
                    ExecutorMetrics::inc(&self.metrics.pieces_pushed);
                    return Ok(receipt.checksum);
                }
                Ok(Ok(_)) => last_error = "checksum mismatch".to_string(),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", timeout),
            }
            debug!(
                object_id = req.object_id,
                segment_idx = req.segment_idx,
                redundancy_idx,
                attempt,
                error = %last_error,
                "piece push failed"
            );
            if attempt < attempts {
                ExecutorMetrics::inc(&self.metrics.push_retries);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        Err(ExecutorError::Push {
            redundancy_idx,
            message: format!("{} ({} attempts)", last_error, attempts),
        })
    }

    /// Asks every secondary for its partial signature, in index order, and
    /// verifies each before moving on to the next.
    async fn collect_signatures(
        &self,
        payload: &ReplicatePiecePayload,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlsSignature>> {
        let keys = secondary_keys(self.topology.as_ref(), &payload.secondary_sp_ids).await?;
        let doc = seal_sign_doc(
            self.chain_id,
            payload.gvg_id,
            payload.object.id,
            &payload.object.checksum_root,
        );
        let timeout = Duration::from_millis(self.config.done_timeout_ms);
        let mut partials = Vec::with_capacity(keys.len());

        for (i, endpoint) in payload.secondary_endpoints.iter().enumerate() {
            let req = DoneReplicateRequest {
                object_id: payload.object.id,
                gvg_id: payload.gvg_id,
                redundancy_idx: i as i32,
                checksum_root: payload.object.checksum_root.clone(),
            };
            let receipt = tokio::select! {
                _ = cancel.cancelled() => return Err(ExecutorError::Canceled),
                r = tokio::time::timeout(timeout, self.receiver.done_replicate(endpoint, &req)) => r,
            };
            let receipt = match receipt {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    return Err(ExecutorError::Done {
                        redundancy_idx: i,
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    return Err(ExecutorError::Done {
                        redundancy_idx: i,
                        message: format!("timed out after {:?}", timeout),
                    })
                }
            };
            let verified = BlsSignature::from_bytes(&receipt.signature)
                .ok()
                .filter(|sig| verify_partial(&keys[i], sig, &doc));
            match verified {
                Some(sig) => partials.push(sig),
                None => {
                    ExecutorMetrics::inc(&self.metrics.signatures_rejected);
                    return Err(ExecutorError::Signature {
                        redundancy_idx: i,
                        source: SigningError::VerificationFailed { index: i },
                    });
                }
            }
        }
        Ok(partials)
    }
}

/// Registered BLS keys of `sp_ids`, in the same order.
pub(crate) async fn secondary_keys(
    topology: &dyn TopologySource,
    sp_ids: &[u32],
) -> Result<Vec<BlsPublicKey>> {
    let sps = topology
        .list_storage_providers()
        .await
        .map_err(ExecutorError::Chain)?;
    let by_id: HashMap<u32, &[u8]> = sps
        .iter()
        .map(|sp| (sp.id, sp.bls_public_key.as_slice()))
        .collect();
    sp_ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let raw = by_id.get(id).copied().unwrap_or_default();
            BlsPublicKey::from_bytes(raw).map_err(|source| ExecutorError::Signature {
                redundancy_idx: i,
                source,
            })
        })
        .collect()
}
