//! Admin-facing operations (C12): the in-process surface an (out-of-scope)
//! HTTP layer would call directly — no wire format, no routing, no auth.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::Fetcher;
use crate::concurrency::ConcurrencyGate;
use crate::errors::{CoreError, CoreResult};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::models::{
    Channel, ChannelCreateRequest, ChannelUpdateRequest, Episode, QueueItem, QueueItemStatus,
};
use crate::models::queue_item::DEFAULT_PRIORITY;
use crate::queue::QueueService;
use crate::refresh::RefreshService;
use crate::store::Store;

pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Aggregate snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub queue_counts: std::collections::HashMap<QueueItemStatus, i64>,
    pub active_downloads: i64,
    pub metrics: MetricsSnapshot,
    pub storage_used_bytes: u64,
    pub storage_free_bytes: u64,
    pub storage_total_bytes: u64,
}

/// In-progress and recently failed queue items, for the admin queue view.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub in_progress: Vec<InProgressItem>,
    pub recent_failed: Vec<QueueItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InProgressItem {
    pub queue_item: QueueItem,
    pub episode_title: String,
    pub channel_title: String,
}

pub struct AdminService<F: Fetcher> {
    store: Store,
    queue: QueueService,
    refresh: Arc<RefreshService<F>>,
    gate: Arc<ConcurrencyGate>,
    metrics: Arc<Metrics>,
    download_dir: std::path::PathBuf,
    started_at: Instant,
}

impl<F: Fetcher> AdminService<F> {
    pub fn new(
        store: Store,
        queue: QueueService,
        refresh: Arc<RefreshService<F>>,
        gate: Arc<ConcurrencyGate>,
        metrics: Arc<Metrics>,
        download_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            store,
            queue,
            refresh,
            gate,
            metrics,
            download_dir,
            started_at: Instant::now(),
        }
    }

    pub async fn list_channels(&self) -> CoreResult<Vec<Channel>> {
        self.store.list_channels().await
    }

    pub async fn get_channel(&self, id: &str) -> CoreResult<Channel> {
        self.store
            .get_channel(id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", id))
    }

    pub async fn create_channel(&self, request: ChannelCreateRequest) -> CoreResult<Channel> {
        self.store.create_channel(request).await
    }

    pub async fn update_channel(
        &self,
        id: &str,
        request: ChannelUpdateRequest,
    ) -> CoreResult<Channel> {
        self.store.update_channel(id, request).await
    }

    /// Deletes a channel (cascading to its episodes/queue items at the
    /// database layer); `delete_files` additionally removes any artifacts on
    /// disk, best-effort.
    pub async fn delete_channel(&self, id: &str, delete_files: bool) -> CoreResult<()> {
        if delete_files {
            let episodes = self.store.episodes_by_channel(id, None).await?;
            for episode in episodes {
                self.delete_episode_files(&episode).await;
            }
        }
        self.store.delete_channel(id).await
    }

    pub async fn list_episodes(&self, channel_id: &str, limit: Option<i64>) -> CoreResult<Vec<Episode>> {
        self.store.episodes_by_channel(channel_id, limit).await
    }

    pub async fn get_episode(&self, id: &str) -> CoreResult<Episode> {
        self.store
            .get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// `delete_files` additionally removes artifacts on disk, best-effort.
    pub async fn delete_episode(&self, id: &str, delete_files: bool) -> CoreResult<()> {
        if delete_files {
            let episode = self.get_episode(id).await?;
            self.delete_episode_files(&episode).await;
        }
        self.store.delete_episode(id).await
    }

    async fn delete_episode_files(&self, episode: &Episode) {
        for path in [&episode.audio_path, &episode.video_path].into_iter().flatten() {
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!(episode_id = %episode.id, path, error = %e, "admin delete: failed to remove artifact");
            }
        }
    }

    /// Enqueues a refresh for one channel and returns immediately; the
    /// actual work runs on the refresh worker's next opportunity. The core
    /// has no background task queue of its own for admin-triggered work, so
    /// this spawns the cycle directly rather than blocking the caller.
    pub fn refresh(&self, channel_id: String, cancel: CancellationToken) {
        let refresh = self.refresh.clone();
        tokio::spawn(async move {
            if let Err(e) = refresh.refresh_channel(&channel_id, &cancel).await {
                tracing::warn!(channel_id, error = %e, "admin-triggered refresh failed");
            }
        });
    }

    pub fn refresh_all(&self, cancel: CancellationToken) {
        let refresh = self.refresh.clone();
        tokio::spawn(async move {
            if let Err(e) = refresh.refresh_all(&cancel).await {
                tracing::warn!(error = %e, "admin-triggered refresh_all failed");
            }
        });
    }

    /// Only valid from `failed`; resets retry state and enqueues a fresh
    /// queue item at the default priority.
    pub async fn retry_episode(&self, id: &str) -> CoreResult<Episode> {
        let episode = self.store.reset_episode_for_retry(id).await?;
        self.queue.enqueue(&episode.id, DEFAULT_PRIORITY).await?;
        info!(episode_id = %episode.id, "admin retried episode");
        Ok(episode)
    }

    /// Aggregate status snapshot.
    pub async fn get_status(&self) -> CoreResult<Status> {
        let queue_counts = self.store.count_queue_items_by_status().await?;
        let (storage_used_bytes, storage_free_bytes, storage_total_bytes) = disk_stats(&self.download_dir);

        Ok(Status {
            version: CRATE_VERSION,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            queue_counts,
            active_downloads: self.gate.active_count(),
            metrics: self.metrics.snapshot(),
            storage_used_bytes,
            storage_free_bytes,
            storage_total_bytes,
        })
    }

    /// In-progress items with episode/channel titles, plus recently failed
    /// items.
    pub async fn get_queue(&self) -> CoreResult<QueueSnapshot> {
        let in_progress = self
            .store
            .in_progress_queue_items_with_titles()
            .await?
            .into_iter()
            .map(|(queue_item, episode_title, channel_title)| InProgressItem {
                queue_item,
                episode_title,
                channel_title,
            })
            .collect();
        let recent_failed = self.store.recent_failed_queue_items(25).await?;
        Ok(QueueSnapshot {
            in_progress,
            recent_failed,
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

/// `(used, free, total)` bytes for the filesystem backing `download_dir`.
/// Falls back to zeros if the directory does not exist yet or no matching
/// disk is found — this is a best-effort status field, not a constraint the
/// rest of the system depends on.
fn disk_stats(download_dir: &Path) -> (u64, u64, u64) {
    use sysinfo::Disks;

    let canonical = std::fs::canonicalize(download_dir).unwrap_or_else(|_| download_dir.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let best = disks
        .iter()
        .filter(|disk| canonical.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len());

    match best {
        Some(disk) => {
            let total = disk.total_space();
            let free = disk.available_space();
            (total.saturating_sub(free), free, total)
        }
        None => (0, 0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_stats_on_missing_dir_does_not_panic() {
        let (used, free, total) = disk_stats(Path::new("/this/path/does/not/exist/hopefully"));
        assert!(used <= total);
        let _ = free;
    }
}
