//! Standalone manager process.
//!
//! Runs the manager, the VGM loops and the RPC server against the in-memory
//! chain and metadata store. Production deployments embed `Manager` with
//! real collaborators instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use spnode_common::{load_from_file, Config, MemoryChain, MemoryMetadataStore, SystemClock};
use spnode_manager::rpc::{router, RpcState};
use spnode_manager::Manager;
use spnode_vgmgr::{HttpHealthProbe, VirtualGroupManager};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "spnode task manager")]
struct Cli {
    /// TOML config file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
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
    info!(sp_id = config.node.sp_id, rpc_addr = %config.node.rpc_addr, "starting manager");

    let chain = Arc::new(MemoryChain::new(config.node.sp_id));
    let store = Arc::new(MemoryMetadataStore::new());
    let clock = Arc::new(SystemClock);

    let probe = HttpHealthProbe::new(Duration::from_millis(config.vgm.health_check_timeout_ms))
        .context("building health probe client")?;
    let vgm = Arc::new(
        VirtualGroupManager::new(
            config.vgm.clone(),
            config.node.sp_id,
            chain.clone(),
            chain.clone(),
            clock.clone(),
        )
        .with_health_probe(Arc::new(probe)),
    );
    if let Err(e) = vgm.force_refresh().await {
        warn!(error = %e, "initial topology refresh failed");
    }

    let manager = Arc::new(Manager::new(
        config.manager.clone(),
        Arc::clone(&vgm),
        store,
        chain.clone(),
        chain,
        clock,
    ));

    let cancel = CancellationToken::new();
    let mut handles = Arc::clone(&vgm).start(cancel.clone());
    handles.extend(Arc::clone(&manager).start(cancel.clone()));

    let state = Arc::new(RpcState {
        manager,
        shutdown: cancel.clone(),
    });
    let listener = TcpListener::bind(&config.node.rpc_addr)
        .await
        .with_context(|| format!("binding {}", config.node.rpc_addr))?;
    info!(addr = %config.node.rpc_addr, "manager rpc listening");

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
        }
        shutdown.cancel();
    });

    let token = cancel.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
        .context("rpc server")?;

    for handle in handles {
        let _ = handle.await;
    }
    info!("manager stopped");
    Ok(())
}
