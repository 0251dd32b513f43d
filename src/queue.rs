//! Queue service (C6): enqueue, claim, and the completion/failure
//! transitions, each backed by a single atomic store operation. This service
//! never holds a lock across external I/O — every method is one store call.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::{CoreResult, ErrorKind};
use crate::metrics::Metrics;
use crate::models::queue_item::DEFAULT_PRIORITY;
use crate::models::QueueItem;
use crate::store::Store;

#[derive(Clone)]
pub struct QueueService {
    store: Store,
    metrics: Arc<Metrics>,
}

impl QueueService {
    pub fn new(store: Store, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// `Conflict` if a non-terminal queue item already exists for the
    /// episode.
    pub async fn enqueue(&self, episode_id: &str, priority: i64) -> CoreResult<QueueItem> {
        let item = self
            .store
            .enqueue_queue_item(episode_id, priority)
            .await?;
        debug!(episode_id, queue_item_id = %item.id, priority, "enqueued queue item");
        Ok(item)
    }

    pub async fn enqueue_default_priority(&self, episode_id: &str) -> CoreResult<QueueItem> {
        self.enqueue(episode_id, DEFAULT_PRIORITY).await
    }

    /// Retrying items due now, ahead of pending items.
    pub async fn next_due(&self) -> CoreResult<Option<QueueItem>> {
        self.store.next_due_queue_item().await
    }

    /// All retrying items due now, for the download worker's retry drain.
    pub async fn retryable_due(&self) -> CoreResult<Vec<QueueItem>> {
        self.store.retryable_queue_items().await
    }

    pub async fn claim(&self, id: &str) -> CoreResult<QueueItem> {
        let item = self.store.claim_queue_item(id).await?;
        debug!(queue_item_id = %item.id, "claimed queue item");
        Ok(item)
    }

    pub async fn mark_completed(&self, id: &str) -> CoreResult<QueueItem> {
        let item = self.store.mark_queue_item_completed(id).await?;
        info!(queue_item_id = %item.id, episode_id = %item.episode_id, "queue item completed");
        self.metrics.record_completed();
        Ok(item)
    }

    pub async fn mark_failed(
        &self,
        id: &str,
        error_kind: ErrorKind,
        message: &str,
    ) -> CoreResult<QueueItem> {
        let item = self
            .store
            .mark_queue_item_failed(id, error_kind, message)
            .await?;
        if item.status.is_terminal() {
            warn!(queue_item_id = %item.id, episode_id = %item.episode_id, error = message, "queue item failed terminally");
            self.metrics.record_failed();
        } else {
            info!(
                queue_item_id = %item.id,
                episode_id = %item.episode_id,
                attempts = item.attempts,
                next_retry_at = ?item.next_retry_at,
                "queue item scheduled for retry"
            );
            self.metrics.record_retried();
        }
        Ok(item)
    }

    pub async fn cancel(&self, id: &str) -> CoreResult<()> {
        self.store.cancel_queue_item(id).await
    }

    /// The cancellation-specific transition: no attempt increment.
    pub async fn requeue_after_cancel(&self, id: &str) -> CoreResult<QueueItem> {
        let item = self.store.requeue_queue_item_after_cancel(id).await?;
        info!(queue_item_id = %item.id, episode_id = %item.episode_id, "queue item requeued after cancellation");
        Ok(item)
    }

    pub async fn queue_item_by_episode(&self, episode_id: &str) -> CoreResult<Option<QueueItem>> {
        self.store.queue_item_by_episode(episode_id).await
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
