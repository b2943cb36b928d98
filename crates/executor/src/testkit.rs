//! Shared unit-test fixtures: a primary with `n` in-process secondaries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use spnode_common::task::fixtures;
use spnode_common::{
    ExecutorConfig, MemoryChain, MemoryMetadataStore, RedundancyType, ReplicatePiecePayload,
    StorageParams, StorageProvider, Task, TaskKey, TaskPayload, NO_FAILED_SP,
};
use spnode_storage::{segment_count, segment_piece_key, segment_size, MemoryPieceStore, PieceStore};
use spnode_tss::BlsSecretKey;

use crate::error::{ExecutorError, Result};
use crate::metrics::ExecutorMetrics;
use crate::receiver::{
    DoneReceipt, DoneReplicateRequest, PieceReceipt, PieceReceiver, ReceiverClient,
    ReplicatePieceRequest,
};
use crate::replicate::ReplicateExecutor;
use crate::seal::SealExecutor;

pub(crate) const CHAIN_ID: u64 = 1;
pub(crate) const GVG_ID: u32 = 10;

pub(crate) fn bls_key(seed: u8) -> BlsSecretKey {
    BlsSecretKey::from_seed(&[seed; 32]).unwrap()
}

pub(crate) fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        push_retry_delay_ms: 1,
        push_timeout_ms: 2_000,
        done_timeout_ms: 2_000,
        seal_retry_delay_ms: 1,
        ask_interval_ms: 10,
        ..ExecutorConfig::default()
    }
}

/// Routes calls by endpoint to in-process receivers, with failure injection.
pub(crate) struct LocalReceivers {
    by_endpoint: HashMap<String, usize>,
    receivers: Mutex<Vec<Arc<PieceReceiver>>>,
    push_failures: Mutex<HashMap<usize, u32>>,
    done_calls: AtomicUsize,
}

impl LocalReceivers {
    fn index(&self, endpoint: &str) -> Result<usize> {
        self.by_endpoint
            .get(endpoint)
            .copied()
            .ok_or_else(|| ExecutorError::Receiver(format!("unknown endpoint {}", endpoint)))
    }
}

#[async_trait]
impl ReceiverClient for LocalReceivers {
    async fn replicate_piece(&self, endpoint: &str, req: &ReplicatePieceRequest) -> Result<PieceReceipt> {
        let i = self.index(endpoint)?;
        if let Some(left) = self.push_failures.lock().get_mut(&i) {
            if *left > 0 {
                *left -= 1;
                return Err(ExecutorError::Receiver("connection reset".into()));
            }
        }
        let receiver = Arc::clone(&self.receivers.lock()[i]);
        receiver.receive(req)
    }

    async fn done_replicate(&self, endpoint: &str, req: &DoneReplicateRequest) -> Result<DoneReceipt> {
        self.done_calls.fetch_add(1, Ordering::SeqCst);
        let i = self.index(endpoint)?;
        let receiver = Arc::clone(&self.receivers.lock()[i]);
        receiver.done(req)
    }
}

pub(crate) struct Cluster {
    pub chain: Arc<MemoryChain>,
    pub store: Arc<MemoryMetadataStore>,
    pub pieces: Arc<MemoryPieceStore>,
    pub receiver_stores: Vec<Arc<MemoryPieceStore>>,
    pub receivers: Arc<LocalReceivers>,
    pub metrics: Arc<ExecutorMetrics>,
    pub replicate: ReplicateExecutor,
    pub seal: SealExecutor,
    secondaries: Vec<u32>,
}

impl Cluster {
    /// SP 1 is the primary; secondary `i` is SP `i + 2` signing with `bls_key(i + 1)`.
    pub fn new(n: usize) -> Self {
        let chain = Arc::new(MemoryChain::new(1));
        let mut by_endpoint = HashMap::new();
        let mut receivers = Vec::new();
        let mut receiver_stores = Vec::new();
        let mut secondaries = Vec::new();
        for i in 0..n {
            let id = i as u32 + 2;
            let key = bls_key(i as u8 + 1);
            let endpoint = format!("http://sp{}", id);
            chain.add_sp(StorageProvider {
                id,
                operator_address: format!("0xsp{}", id),
                endpoint: endpoint.clone(),
                bls_public_key: key.public_key().to_bytes().to_vec(),
                in_service: true,
            });
            let store = Arc::new(MemoryPieceStore::new());
            receivers.push(Arc::new(PieceReceiver::new(store.clone(), key, CHAIN_ID)));
            receiver_stores.push(store);
            by_endpoint.insert(endpoint, i);
            secondaries.push(id);
        }
        let receivers = Arc::new(LocalReceivers {
            by_endpoint,
            receivers: Mutex::new(receivers),
            push_failures: Mutex::new(HashMap::new()),
            done_calls: AtomicUsize::new(0),
        });
        let store = Arc::new(MemoryMetadataStore::new());
        let pieces = Arc::new(MemoryPieceStore::new());
        let metrics = Arc::new(ExecutorMetrics::new());
        let replicate = ReplicateExecutor::new(
            test_config(),
            CHAIN_ID,
            pieces.clone(),
            receivers.clone(),
            store.clone(),
            chain.clone(),
            chain.clone(),
            metrics.clone(),
        );
        let seal = SealExecutor::new(test_config(), CHAIN_ID, chain.clone(), chain.clone(), metrics.clone());
        Self {
            chain,
            store,
            pieces,
            receiver_stores,
            receivers,
            metrics,
            replicate,
            seal,
            secondaries,
        }
    }

    /// Secondary `i` fails its next `times` pushes.
    pub fn fail_pushes(&self, i: usize, times: u32) {
        self.receivers.push_failures.lock().insert(i, times);
    }

    pub fn replace_signing_key(&self, i: usize, key: BlsSecretKey) {
        let mut receivers = self.receivers.receivers.lock();
        let store: Arc<dyn PieceStore> = self.receiver_stores[i].clone();
        receivers[i] = Arc::new(PieceReceiver::new(store, key, CHAIN_ID));
    }

    pub fn done_calls(&self) -> usize {
        self.receivers.done_calls.load(Ordering::SeqCst)
    }

    /// Writes the object's segments to the primary store and returns its
    /// replicate task. Segments are 1 KiB; EC uses 4 data + 2 parity.
    pub fn replicate_task(&self, object_id: u64, payload_size: u64, redundancy: RedundancyType) -> Task {
        let mut object = fixtures::object(object_id, payload_size);
        object.redundancy = redundancy;
        let params = StorageParams {
            max_segment_size: 1024,
            redundant_data_chunk_num: 4,
            redundant_parity_chunk_num: 2,
        };
        for idx in 0..segment_count(payload_size, params.max_segment_size) {
            let size = segment_size(payload_size, params.max_segment_size, idx) as usize;
            let data: Vec<u8> = (0..size).map(|b| (b as u64 + object_id + idx as u64) as u8).collect();
            self.pieces
                .put_piece(&segment_piece_key(object_id, idx), &data)
                .unwrap();
        }
        Task::new(
            TaskKey::replicate_piece(&object),
            TaskPayload::ReplicatePiece(ReplicatePiecePayload {
                object,
                params,
                gvg_id: GVG_ID,
                secondary_sp_ids: self.secondaries.clone(),
                secondary_endpoints: self
                    .secondaries
                    .iter()
                    .map(|id| format!("http://sp{}", id))
                    .collect(),
                secondary_signatures: vec![],
                not_available_sp_idx: NO_FAILED_SP,
                sealed: false,
            }),
            0,
        )
    }

    pub fn replicate_payload(task: &Task) -> &ReplicatePiecePayload {
        match &task.payload {
            TaskPayload::ReplicatePiece(p) => p,
            other => panic!("expected replicate payload, got {}", other.task_type()),
        }
    }
}
