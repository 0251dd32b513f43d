//! Refresh service (C7): turns a channel's current upstream listing into
//! newly inserted episodes and newly enqueued download work.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clients::Fetcher;
use crate::errors::{CoreError, CoreResult};
use crate::metrics::Metrics;
use crate::models::episode::EpisodeMetadata;
use crate::queue::QueueService;
use crate::store::Store;

/// Result of refreshing a single channel.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    pub channel_id: String,
    pub videos_found: usize,
    pub episodes_queued: usize,
    pub error: Option<String>,
}

pub struct RefreshService<F: Fetcher> {
    store: Store,
    queue: QueueService,
    fetcher: Arc<F>,
    metrics: Arc<Metrics>,
}

impl<F: Fetcher> RefreshService<F> {
    pub fn new(store: Store, queue: QueueService, fetcher: Arc<F>, metrics: Arc<Metrics>) -> Self {
        Self {
            store,
            queue,
            fetcher,
            metrics,
        }
    }

    /// Refreshes one channel. Never returns `Err` for per-channel failures —
    /// those are reported via [`RefreshOutcome::error`] so `refresh_all` can
    /// isolate them; it returns `Err` only if the channel row itself cannot
    /// be loaded.
    pub async fn refresh_channel(
        &self,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<RefreshOutcome> {
        let channel = self
            .store
            .get_channel(channel_id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", channel_id))?;

        if !channel.enabled {
            debug!(channel_id, "channel disabled, skipping refresh");
            return Ok(RefreshOutcome {
                channel_id: channel_id.to_string(),
                ..Default::default()
            });
        }

        let cap = (channel.keep_count * 2) as usize;
        let listed = match self
            .fetcher
            .list_channel_items(&channel.source_url, cancel)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                warn!(channel_id, error = %e, "refresh failed to list channel items");
                return Ok(RefreshOutcome {
                    channel_id: channel_id.to_string(),
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            }
        };
        let listed: Vec<_> = listed.into_iter().take(cap).collect();
        let videos_found = listed.len();

        let mut episodes_queued = 0usize;
        for item in &listed {
            if cancel.is_cancelled() {
                info!(
                    channel_id,
                    videos_found, episodes_queued, "channel refresh cancelled mid-cycle"
                );
                return Ok(RefreshOutcome {
                    channel_id: channel_id.to_string(),
                    videos_found,
                    episodes_queued,
                    error: None,
                });
            }
            if self
                .store
                .episode_by_external_id(&item.external_id)
                .await?
                .is_some()
            {
                continue;
            }

            let metadata = EpisodeMetadata {
                external_id: item.external_id.clone(),
                title: item.title.clone(),
                description: item.description.clone(),
                thumbnail_url: item.thumbnail_url.clone(),
                duration_seconds: item.duration_seconds,
                published_at: item.published_at,
            };
            let episode = self.store.create_episode(channel_id, &metadata).await?;

            match self.queue.enqueue_default_priority(&episode.id).await {
                Ok(_) => episodes_queued += 1,
                Err(CoreError::Conflict { message }) => {
                    info!(
                        channel_id,
                        episode_id = %episode.id,
                        message,
                        "skipped enqueue: queue item already exists (race with admin retry)"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.store.mark_channel_refreshed(channel_id).await?;
        self.metrics.record_episodes_discovered(episodes_queued as u64);

        info!(
            channel_id,
            videos_found, episodes_queued, "channel refresh complete"
        );
        Ok(RefreshOutcome {
            channel_id: channel_id.to_string(),
            videos_found,
            episodes_queued,
            error: None,
        })
    }

    /// Iterates enabled channels, isolating each channel's failure; does not
    /// suspend concurrent pipeline execution.
    pub async fn refresh_all(&self, cancel: &CancellationToken) -> CoreResult<Vec<RefreshOutcome>> {
        let channels = self.store.list_enabled_channels().await?;
        let mut outcomes = Vec::with_capacity(channels.len());
        for channel in channels {
            if cancel.is_cancelled() {
                info!("refresh_all cancelled, stopping before remaining channels");
                break;
            }
            match self.refresh_channel(&channel.id, cancel).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(channel_id = %channel.id, error = %e, "refresh_channel errored");
                    outcomes.push(RefreshOutcome {
                        channel_id: channel.id,
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }
        self.metrics.record_refresh_cycle();
        Ok(outcomes)
    }
}
