mod executor;
mod judger;
mod languages;
mod queue;
mod runner;
mod server;
mod verdict;
mod worker;
mod workspace;

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::executor::{CodeExecutor, Executor};
use crate::queue::{JobQueue, SqsJobQueue};

const DEFAULT_HTTP_PORT: u16 = 5005;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("judge_worker=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    languages::init_languages()?;
    info!(
        "Loaded language configurations: {:?}",
        languages::get_supported_languages()
    );

    let executor = Arc::new(Executor::from_env());

    // Recover from a previous non-graceful shutdown
    match executor.sweep_stale_workspaces().await {
        Ok(0) => {}
        Ok(removed) => info!("Cleaned up {} stale job directories", removed),
        Err(e) => warn!("Error during cleanup of temp directory: {:#}", e),
    }

    let queue: Arc<dyn JobQueue> = Arc::new(SqsJobQueue::from_env().await?);

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_HTTP_PORT);
    let http_executor: Arc<dyn CodeExecutor> = executor.clone();
    let http = tokio::spawn(server::serve(http_executor, port, shutdown.clone()));

    worker::run(queue, executor, shutdown.clone()).await;

    // The worker loop only returns on shutdown, but make sure the HTTP
    // server drains either way.
    shutdown.cancel();
    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server terminated with error: {:#}", e),
        Err(e) => error!("HTTP server task failed: {}", e),
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            unix_signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        warn!("Received shutdown signal. Finishing current messages and shutting down...");
        shutdown.cancel();
    });
}
