//! Executor process.
//!
//! `work` pulls replicate and seal tasks from a manager over RPC. `receive`
//! serves the secondary side of the piece protocol. Chain and metadata are
//! the in-memory collaborators, as in the standalone manager.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use spnode_common::{load_from_file, Config, MemoryChain, MemoryMetadataStore};
use spnode_executor::{
    receiver_router, ExecutorMetrics, HttpReceiverClient, PieceReceiver, ReplicateExecutor,
    SealExecutor, Worker,
};
use spnode_manager::ManagerClient;
use spnode_storage::LocalFsPieceStore;
use spnode_tss::BlsSecretKey;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "spnode replication executor")]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the manager for tasks and run them
    Work,
    /// Accept pieces from primaries and sign seal documents
    Receive {
        #[arg(long, default_value = "127.0.0.1:9433")]
        listen: SocketAddr,
        /// Hex-encoded 32-byte BLS secret key
        #[arg(long)]
        bls_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => {
            let config = Config::default();
            config.validate()?;
            config
        }
    };

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
        }
        shutdown.cancel();
    });

    match cli.command {
        Command::Work => work(config, cancel).await,
        Command::Receive { listen, bls_key } => receive(config, listen, &bls_key, cancel).await,
    }
}

async fn work(config: Config, cancel: CancellationToken) -> Result<()> {
    let store = Arc::new(LocalFsPieceStore::new(&config.node.data_dir).context("opening piece store")?);
    let chain = Arc::new(MemoryChain::new(config.node.sp_id));
    let metadata = Arc::new(MemoryMetadataStore::new());
    let metrics = Arc::new(ExecutorMetrics::new());
    let receiver = HttpReceiverClient::new(Duration::from_millis(config.executor.push_timeout_ms))
        .context("building receiver client")?;
    let manager = ManagerClient::new(
        config.node.manager_endpoint.clone(),
        Duration::from_millis(config.executor.push_timeout_ms),
    )
    .map_err(|e| anyhow!("building manager client: {}", e))?;

    let replicate = Arc::new(ReplicateExecutor::new(
        config.executor.clone(),
        config.node.chain_id,
        store,
        Arc::new(receiver),
        metadata,
        chain.clone(),
        chain.clone(),
        metrics.clone(),
    ));
    let seal = Arc::new(SealExecutor::new(
        config.executor.clone(),
        config.node.chain_id,
        chain.clone(),
        chain,
        metrics.clone(),
    ));
    let worker = Arc::new(Worker::new(
        config.executor.clone(),
        Arc::new(manager),
        replicate,
        seal,
        metrics,
    ));
    info!(
        manager = %config.node.manager_endpoint,
        workers = config.executor.worker_count,
        "executor started"
    );
    for handle in worker.start(cancel) {
        let _ = handle.await;
    }
    info!("executor stopped");
    Ok(())
}

async fn receive(config: Config, listen: SocketAddr, bls_key: &str, cancel: CancellationToken) -> Result<()> {
    let raw = hex::decode(bls_key.trim()).context("decoding bls key")?;
    let key = BlsSecretKey::from_bytes(&raw).map_err(|e| anyhow!("bls key: {}", e))?;
    let store = Arc::new(LocalFsPieceStore::new(&config.node.data_dir).context("opening piece store")?);
    let receiver = Arc::new(PieceReceiver::new(store, key, config.node.chain_id));

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!(addr = %listen, "piece receiver listening");
    axum::serve(listener, receiver_router(receiver))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("receiver server")?;
    Ok(())
}
