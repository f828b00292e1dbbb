use std::env;

use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use walraft::gather_metrics;
use walraft::observability::init_observability;
use walraft::NetworkError;
use walraft::NodeBuilder;
use walraft::RaftNodeConfig;
use walraft::RaftTypeConfig;
use walraft::Result;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    // Optional override file as first argument, on top of CONFIG_PATH and RAFT__ env vars
    let mut node_config = RaftNodeConfig::new()?;
    if let Some(path) = env::args().nth(1) {
        node_config = node_config.with_override_config(&path)?;
    }
    let node_config = node_config.validate()?;

    // Initializing Logs
    let _guard = init_observability(node_config.cluster.node_id, &node_config.cluster.log_dir)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    // Build Node
    let node = NodeBuilder::<RaftTypeConfig>::new(node_config, graceful_rx)
        .with_default_components()?
        .build()?
        .start_rpc_server()
        .await?
        .ready()?;

    info!("Application started. Waiting for SIGINT or SIGTERM...");
    // Listen on Shutdown Signal
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    // Start Node
    if let Err(e) = node.run().await {
        error!("node stops: {:?}", e);
    }

    debug!("final metrics:\n{}", gather_metrics());
    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(NetworkError::Io)?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(NetworkError::Io)?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        let error_str = format!("{:?}", e);
        error!("Failed to send shutdown signal: {}", error_str);
        NetworkError::SingalSendFailed(error_str)
    })?;

    info!("Shutdown completed");
    Ok(())
}
