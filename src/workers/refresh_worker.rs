//! Refresh worker (C10): a periodic ticker that runs one refresh cycle
//! immediately, then every `refresh_interval`, with an overlap guard so a
//! slow cycle never runs concurrently with itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients::Fetcher;
use crate::refresh::RefreshService;

pub struct RefreshWorker<F: Fetcher> {
    refresh: Arc<RefreshService<F>>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl<F: Fetcher + 'static> RefreshWorker<F> {
    pub fn new(refresh: Arc<RefreshService<F>>, interval: Duration) -> Self {
        Self {
            refresh,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs until `cancel` fires. `tokio::time::interval`'s first tick
    /// resolves immediately, so the first refresh cycle runs on start, then
    /// every `interval` after that.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("refresh worker starting");
        let mut ticker = interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle_if_idle(&cancel).await;
                }
                _ = cancel.cancelled() => {
                    info!("refresh worker received cancellation, waiting for in-flight cycle");
                    while self.running.load(Ordering::Acquire) {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    break;
                }
            }
        }
        info!("refresh worker stopped");
    }

    async fn run_cycle_if_idle(&self, cancel: &CancellationToken) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("refresh cycle still running, dropping this tick");
            return;
        }

        let result = self.refresh.refresh_all(cancel).await;
        self.running.store(false, Ordering::Release);

        match result {
            Ok(outcomes) => {
                let queued: usize = outcomes.iter().map(|o| o.episodes_queued).sum();
                info!(channels = outcomes.len(), episodes_queued = queued, "refresh cycle complete");
            }
            Err(e) => error!(error = %e, "refresh cycle failed"),
        }
    }
}
