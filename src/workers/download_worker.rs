//! Download worker (C11): claims retryable and pending queue items and
//! feeds them through the pipeline, one at a time from this worker's own
//! perspective — the pipeline itself is what bounds real concurrency via its
//! concurrency gate, not this loop.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::clients::{Fetcher, Transcoder};
use crate::errors::ErrorKind;
use crate::pipeline::Pipeline;
use crate::queue::QueueService;

pub struct DownloadWorker<F: Fetcher, T: Transcoder> {
    queue: QueueService,
    pipeline: Arc<Pipeline<F, T>>,
    poll_interval: Duration,
}

impl<F: Fetcher, T: Transcoder> DownloadWorker<F, T> {
    pub fn new(queue: QueueService, pipeline: Arc<Pipeline<F, T>>, poll_interval: Duration) -> Self {
        Self {
            queue,
            pipeline,
            poll_interval,
        }
    }

    /// Runs until `cancel` fires. Does not start a new item once cancel has
    /// been signalled; finishes any item already claimed.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("download worker starting");
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let processed = self.drain_retryable(&cancel).await;
            let processed = self.process_next_pending(&cancel).await || processed;

            if !processed {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
        info!("download worker stopped");
    }

    /// All retryable items due now, processed one at a time.
    async fn drain_retryable(&self, cancel: &CancellationToken) -> bool {
        let items = match self.queue.retryable_due().await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "failed to list retryable queue items");
                return false;
            }
        };
        if items.is_empty() {
            return false;
        }
        for item in items {
            if cancel.is_cancelled() {
                break;
            }
            self.process_item(&item.id, cancel).await;
        }
        true
    }

    /// The next pending item, if any.
    async fn process_next_pending(&self, cancel: &CancellationToken) -> bool {
        match self.queue.next_due().await {
            Ok(Some(item)) => {
                self.process_item(&item.id, cancel).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(error = %e, "failed to fetch next due queue item");
                false
            }
        }
    }

    async fn process_item(&self, queue_item_id: &str, cancel: &CancellationToken) {
        let claimed = match self.queue.claim(queue_item_id).await {
            Ok(item) => item,
            Err(e) if matches!(e.kind(), ErrorKind::Conflict) => {
                debug!(queue_item_id, "claim conflict, another worker took it");
                return;
            }
            Err(e) => {
                error!(queue_item_id, error = %e, "failed to claim queue item");
                return;
            }
        };

        let outcome = match self.pipeline.run(&claimed.episode_id, None, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(queue_item_id, error = %e, "pipeline returned a fatal error");
                if let Err(e2) = self
                    .queue
                    .mark_failed(queue_item_id, ErrorKind::Fatal, &e.to_string())
                    .await
                {
                    error!(queue_item_id, error = %e2, "failed to record pipeline fatal error");
                }
                return;
            }
        };

        if outcome.success {
            if let Err(e) = self.queue.mark_completed(queue_item_id).await {
                error!(queue_item_id, error = %e, "failed to mark queue item completed");
            }
        } else if outcome.error_kind == Some(ErrorKind::Cancelled) {
            if let Err(e) = self.queue.requeue_after_cancel(queue_item_id).await {
                error!(queue_item_id, error = %e, "failed to requeue cancelled queue item");
            }
        } else {
            let kind = outcome.error_kind.unwrap_or(ErrorKind::Unknown);
            let message = outcome.error.unwrap_or_else(|| "pipeline failed".to_string());
            if let Err(e) = self.queue.mark_failed(queue_item_id, kind, &message).await {
                error!(queue_item_id, error = %e, "failed to record queue item failure");
            }
        }

        if cancel.is_cancelled() {
            warn!("download worker observed cancellation mid-item; not starting another");
        }
    }
}
