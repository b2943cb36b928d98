//! # Piece Receiver Protocol
//!
//! The primary pushes pieces to each secondary, then asks every secondary
//! in redundancy-index order for its seal signature.
//!
//! ```text
//!  primary                                  secondary[i]
//!    │ POST /replicate-piece {piece} ─────────► store, checksum
//!    │ ◄───────────────────────────── {checksum}
//!    │ ...all segments...
//!    │ POST /done-replicate {object, gvg} ────► sign seal doc
//!    │ ◄───────────────────────────── {signature}
//! ```
//!
//! Bytes travel hex-encoded inside JSON.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use spnode_storage::{ec_piece_key, piece_checksum, segment_piece_key, PieceStore};
use spnode_tss::{seal_sign_doc, sign, BlsSecretKey};
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, Result};

pub const REPLICATE_PIECE_PATH: &str = "/replicate-piece";
pub const DONE_REPLICATE_PATH: &str = "/done-replicate";

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatePieceRequest {
    pub object_id: u64,
    pub gvg_id: u32,
    pub segment_idx: u32,
    /// Target redundancy index; `-1` for a whole-segment replica.
    pub redundancy_idx: i32,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl ReplicatePieceRequest {
    /// Key the receiver stores this piece under.
    pub fn piece_key(&self) -> String {
        if self.redundancy_idx < 0 {
            segment_piece_key(self.object_id, self.segment_idx)
        } else {
            ec_piece_key(self.object_id, self.segment_idx, self.redundancy_idx as u32)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceReceipt {
    #[serde(with = "hex_bytes")]
    pub checksum: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneReplicateRequest {
    pub object_id: u64,
    pub gvg_id: u32,
    pub redundancy_idx: i32,
    #[serde(with = "hex_bytes")]
    pub checksum_root: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneReceipt {
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

/// Primary-side view of a secondary.
#[async_trait]
pub trait ReceiverClient: Send + Sync {
    async fn replicate_piece(&self, endpoint: &str, req: &ReplicatePieceRequest) -> Result<PieceReceipt>;

    async fn done_replicate(&self, endpoint: &str, req: &DoneReplicateRequest) -> Result<DoneReceipt>;
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Debug)]
pub struct HttpReceiverClient {
    client: Client,
}

impl HttpReceiverClient {
    pub fn new(timeout: Duration) -> std::result::Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
    ) -> std::result::Result<T, String> {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            let t = resp.text().await.unwrap_or_default();
            return Err(format!("{} {} {}", url, status, t));
        }
        resp.json::<T>().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ReceiverClient for HttpReceiverClient {
    async fn replicate_piece(&self, endpoint: &str, req: &ReplicatePieceRequest) -> Result<PieceReceipt> {
        self.post(endpoint, REPLICATE_PIECE_PATH, req)
            .await
            .map_err(ExecutorError::Receiver)
    }

    async fn done_replicate(&self, endpoint: &str, req: &DoneReplicateRequest) -> Result<DoneReceipt> {
        self.post(endpoint, DONE_REPLICATE_PATH, req)
            .await
            .map_err(ExecutorError::Receiver)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// RECEIVER (SECONDARY SIDE)
// ════════════════════════════════════════════════════════════════════════════

/// Stores pushed pieces and signs the seal document once the primary is done.
pub struct PieceReceiver {
    store: Arc<dyn PieceStore>,
    key: BlsSecretKey,
    chain_id: u64,
}

impl PieceReceiver {
    pub fn new(store: Arc<dyn PieceStore>, key: BlsSecretKey, chain_id: u64) -> Self {
        Self { store, key, chain_id }
    }

    pub fn store(&self) -> &Arc<dyn PieceStore> {
        &self.store
    }

    pub fn receive(&self, req: &ReplicatePieceRequest) -> Result<PieceReceipt> {
        let key = req.piece_key();
        self.store.put_piece(&key, &req.data)?;
        debug!(piece = %key, size = req.data.len(), "piece received");
        Ok(PieceReceipt {
            checksum: piece_checksum(&req.data),
        })
    }

    pub fn done(&self, req: &DoneReplicateRequest) -> Result<DoneReceipt> {
        let doc = seal_sign_doc(self.chain_id, req.gvg_id, req.object_id, &req.checksum_root);
        info!(object_id = req.object_id, gvg_id = req.gvg_id, "signed seal document");
        Ok(DoneReceipt {
            signature: sign(&self.key, &doc).to_bytes().to_vec(),
        })
    }
}

pub fn receiver_router(receiver: Arc<PieceReceiver>) -> Router {
    Router::new()
        .route(REPLICATE_PIECE_PATH, post(replicate_piece))
        .route(DONE_REPLICATE_PATH, post(done_replicate))
        .route("/status", get(|| async { "ok" }))
        .with_state(receiver)
}

async fn replicate_piece(
    State(r): State<Arc<PieceReceiver>>,
    Json(req): Json<ReplicatePieceRequest>,
) -> std::result::Result<Json<PieceReceipt>, (StatusCode, String)> {
    r.receive(&req).map(Json).map_err(|e| {
        warn!(object_id = req.object_id, error = %e, "piece rejected");
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

async fn done_replicate(
    State(r): State<Arc<PieceReceiver>>,
    Json(req): Json<DoneReplicateRequest>,
) -> std::result::Result<Json<DoneReceipt>, (StatusCode, String)> {
    r.done(&req)
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
