use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use channelmirror::clients::{ProcessFetcher, ProcessTranscoder};
use channelmirror::{AdminService, ConcurrencyGate, Metrics, Pipeline, QueueService, RefreshService, RetentionService, Settings, Store};
use channelmirror::workers::{DownloadWorker, RefreshWorker};

/// Mirrors a configured set of external video channels into a local media
/// store, producing podcast-ready audio/video artifacts.
#[derive(Parser)]
#[command(name = "channelmirror")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ingestion engine for mirroring external channels into a local media store")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "channelmirror.toml")]
    config: PathBuf,

    /// Log level (overrides the config file's log_level)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run one refresh cycle for all enabled channels, then exit, without
    /// starting the long-running workers.
    #[arg(long)]
    refresh_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(&cli.config)?;
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("channelmirror={}", settings.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting channelmirror");

    let store = Store::connect(&settings.database_url).await?;
    info!("database connected and migrations applied");

    tokio::fs::create_dir_all(&settings.download_dir).await?;
    tokio::fs::create_dir_all(&settings.temp_dir).await?;

    let metrics = Metrics::new();
    let gate = Arc::new(ConcurrencyGate::new(settings.max_concurrent_downloads));
    let queue = QueueService::new(store.clone(), metrics.clone());
    let retention = RetentionService::new(store.clone(), metrics.clone());

    let fetcher = Arc::new(ProcessFetcher::new("yt-dlp".to_string()));
    let transcoder = Arc::new(ProcessTranscoder::new("ffmpeg".to_string(), "ffprobe".to_string()));

    let refresh = Arc::new(RefreshService::new(
        store.clone(),
        queue.clone(),
        fetcher.clone(),
        metrics.clone(),
    ));

    let cancel = CancellationToken::new();

    if cli.refresh_once {
        info!("running one-shot refresh cycle");
        let outcomes = refresh.refresh_all(&cancel).await?;
        for outcome in &outcomes {
            info!(
                channel_id = outcome.channel_id,
                videos_found = outcome.videos_found,
                episodes_queued = outcome.episodes_queued,
                error = ?outcome.error,
                "refresh-once channel result"
            );
        }
        return Ok(());
    }

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        fetcher.clone(),
        transcoder.clone(),
        gate.clone(),
        retention.clone(),
        metrics.clone(),
        settings.transcode.clone(),
        settings.download_dir.clone(),
        settings.temp_dir.clone(),
    ));

    let admin = Arc::new(AdminService::new(
        store.clone(),
        queue.clone(),
        refresh.clone(),
        gate.clone(),
        metrics.clone(),
        settings.download_dir.clone(),
    ));
    let _ = admin; // exposed for an eventual HTTP layer; unused by this binary today.

    let refresh_worker = RefreshWorker::new(refresh.clone(), settings.refresh_interval());
    let download_worker = DownloadWorker::new(queue.clone(), pipeline.clone(), settings.poll_interval());

    let refresh_cancel = cancel.clone();
    let refresh_handle = tokio::spawn(async move { refresh_worker.run(refresh_cancel).await });

    let download_cancel = cancel.clone();
    let download_handle = tokio::spawn(async move { download_worker.run(download_cancel).await });

    info!("workers started, waiting for shutdown signal");
    wait_for_shutdown_signal().await;
    info!("shutdown signal received, cancelling workers");
    cancel.cancel();

    const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);
    let shutdown = async {
        let _ = refresh_handle.await;
        let _ = download_handle.await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, shutdown).await.is_err() {
        tracing::warn!("workers did not stop within the grace window, exiting anyway");
    }

    info!("channelmirror stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
