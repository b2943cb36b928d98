//! Asynchronous persistence side effects.
//!
//! Report handling never waits on the metadata store or on best-effort chain
//! writes. Effects go onto a bounded channel drained by a single worker, in
//! submission order. A failed effect is logged and counted, never retried
//! and never surfaced to the reporter.
//!
//! ```text
//!  handle_report ──► SideEffects::submit ──► mpsc(cap) ──► worker ──► MetadataStore / Signer
//!  tests         ──► SideEffects::flush  ──► Flush(ack) ──► worker acks once everything before it ran
//! ```

use std::sync::Arc;

use spnode_common::{
    AuditEvent, BucketMigrationProgress, GcCheckpoint, MetadataStore, RejectUnsealRequest, Signer,
    UploadProgress,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics::ManagerMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    InsertProgress(UploadProgress),
    UpdateProgress(UploadProgress),
    PutEvent(AuditEvent),
    SetGcCheckpoint(GcCheckpoint),
    DeleteChecksums(u64),
    SetBucketMigrationProgress(BucketMigrationProgress),
    RejectUnseal(RejectUnsealRequest),
}

impl SideEffect {
    fn name(&self) -> &'static str {
        match self {
            SideEffect::InsertProgress(_) => "insert_progress",
            SideEffect::UpdateProgress(_) => "update_progress",
            SideEffect::PutEvent(_) => "put_event",
            SideEffect::SetGcCheckpoint(_) => "set_gc_checkpoint",
            SideEffect::DeleteChecksums(_) => "delete_checksums",
            SideEffect::SetBucketMigrationProgress(_) => "set_bucket_migration_progress",
            SideEffect::RejectUnseal(_) => "reject_unseal",
        }
    }
}

enum Command {
    Apply(SideEffect),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub struct SideEffects {
    tx: mpsc::Sender<Command>,
}

impl SideEffects {
    /// Starts the worker. Must be called inside a tokio runtime.
    pub fn spawn(
        capacity: usize,
        metadata: Arc<dyn MetadataStore>,
        signer: Arc<dyn Signer>,
        metrics: Arc<ManagerMetrics>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(rx, metadata, signer, metrics));
        (Self { tx }, handle)
    }

    /// Queues an effect, waiting for room when the queue is full.
    pub async fn submit(&self, effect: SideEffect) {
        let name = effect.name();
        if self.tx.send(Command::Apply(effect)).await.is_err() {
            warn!(effect = name, "side effect worker stopped, effect dropped");
        }
    }

    /// Resolves once every effect submitted before this call has been applied.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(ack_tx)).await.is_err() {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<Command>,
    metadata: Arc<dyn MetadataStore>,
    signer: Arc<dyn Signer>,
    metrics: Arc<ManagerMetrics>,
) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Apply(effect) => {
                let name = effect.name();
                let result = match effect {
                    SideEffect::InsertProgress(p) => metadata.insert_upload_progress(p).await,
                    SideEffect::UpdateProgress(p) => metadata.update_upload_progress(p).await,
                    SideEffect::PutEvent(e) => metadata.put_event(e).await,
                    SideEffect::SetGcCheckpoint(c) => metadata.set_gc_checkpoint(c).await,
                    SideEffect::DeleteChecksums(id) => {
                        metadata.delete_all_replicate_piece_checksums(id).await
                    }
                    SideEffect::SetBucketMigrationProgress(p) => {
                        metadata.set_bucket_migration_progress(p).await
                    }
                    SideEffect::RejectUnseal(req) => signer.reject_unseal_object(req).await,
                };
                match result {
                    Ok(()) => debug!(effect = name, "side effect applied"),
                    Err(e) => {
                        ManagerMetrics::inc(&metrics.side_effect_failures);
                        warn!(effect = name, error = %e, "side effect failed");
                    }
                }
            }
        }
    }
    debug!("side effect worker exiting");
}
