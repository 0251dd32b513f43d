use sqlx::Row;

use super::Store;
use crate::clock;
use crate::errors::{CoreError, CoreResult};
use crate::models::episode::EpisodeMetadata;
use crate::models::{Episode, EpisodeStatus};

impl Store {
    /// Inserts a new episode in `status = pending`.
    pub async fn create_episode(
        &self,
        channel_id: &str,
        metadata: &EpisodeMetadata,
    ) -> CoreResult<Episode> {
        let now = clock::now();
        let id = clock::new_id();

        sqlx::query(
            r#"
            INSERT INTO episodes (
                id, channel_id, external_id, title, description, thumbnail_url,
                duration_seconds, published_at, status, downloaded_at,
                audio_path, video_path, audio_size, video_size,
                retry_count, last_error, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, NULL, NULL, 0, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(channel_id)
        .bind(&metadata.external_id)
        .bind(&metadata.title)
        .bind(&metadata.description)
        .bind(&metadata.thumbnail_url)
        .bind(metadata.duration_seconds)
        .bind(metadata.published_at)
        .bind(EpisodeStatus::Pending.to_string())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_episode(&id)
            .await?
            .ok_or_else(|| CoreError::fatal("episode vanished immediately after insert"))
    }

    pub async fn get_episode(&self, id: &str) -> CoreResult<Option<Episode>> {
        let episode = sqlx::query_as::<_, Episode>("SELECT * FROM episodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(episode)
    }

    pub async fn episode_by_external_id(&self, external_id: &str) -> CoreResult<Option<Episode>> {
        let episode =
            sqlx::query_as::<_, Episode>("SELECT * FROM episodes WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(episode)
    }

    pub async fn episodes_by_channel(
        &self,
        channel_id: &str,
        limit: Option<i64>,
    ) -> CoreResult<Vec<Episode>> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT * FROM episodes
            WHERE channel_id = ?
            ORDER BY published_at DESC, created_at DESC
            LIMIT ?
            "#,
        )
        .bind(channel_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?;
        Ok(episodes)
    }

    /// Completed episodes for `channel_id` beyond the `keep_count`-th most
    /// recent (by `published_at desc`) — the over-retention set.
    pub async fn completed_episodes_beyond_keep_count(
        &self,
        channel_id: &str,
        keep_count: i64,
    ) -> CoreResult<Vec<Episode>> {
        let episodes = sqlx::query_as::<_, Episode>(
            r#"
            SELECT * FROM episodes
            WHERE channel_id = ? AND status = ?
            ORDER BY published_at DESC, created_at DESC
            LIMIT -1 OFFSET ?
            "#,
        )
        .bind(channel_id)
        .bind(EpisodeStatus::Completed.to_string())
        .bind(keep_count)
        .fetch_all(&self.pool)
        .await?;
        Ok(episodes)
    }

    /// Atomic CAS: `status = from -> to`, bumping `updated_at`. Fails with
    /// `Conflict` if the precondition does not hold.
    pub async fn transition_episode_status(
        &self,
        id: &str,
        from: EpisodeStatus,
        to: EpisodeStatus,
    ) -> CoreResult<Episode> {
        let now = clock::now();
        let result = sqlx::query("UPDATE episodes SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.to_string())
            .bind(now)
            .bind(id)
            .bind(from.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "episode {id} is not in status {from} (expected for transition to {to})"
            )));
        }
        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// Atomic CAS starting a download attempt: `pending|failed -> downloading`.
    /// A reclaimed retry re-enters from `failed` (the previous attempt's
    /// terminal status), a fresh discovery or admin retry enters from
    /// `pending`. Fails with `Conflict` if the episode is in neither status.
    pub async fn begin_episode_download(&self, id: &str) -> CoreResult<Episode> {
        let now = clock::now();
        let result = sqlx::query(
            "UPDATE episodes SET status = ?, updated_at = ? WHERE id = ? AND status IN (?, ?)",
        )
        .bind(EpisodeStatus::Downloading.to_string())
        .bind(now)
        .bind(id)
        .bind(EpisodeStatus::Pending.to_string())
        .bind(EpisodeStatus::Failed.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "episode {id} is not in status pending or failed"
            )));
        }
        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// One transaction: sets the produced artifact(s), marks the episode
    /// `completed`, and clears `last_error`.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_episode(
        &self,
        id: &str,
        audio_path: Option<&str>,
        audio_size: Option<i64>,
        video_path: Option<&str>,
        video_size: Option<i64>,
    ) -> CoreResult<Episode> {
        let now = clock::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            UPDATE episodes SET
                status = ?, downloaded_at = ?, audio_path = ?, audio_size = ?,
                video_path = ?, video_size = ?, last_error = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(EpisodeStatus::Completed.to_string())
        .bind(now)
        .bind(audio_path)
        .bind(audio_size)
        .bind(video_path)
        .bind(video_size)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// Marks an episode `failed`, bumping `retry_count` and storing the
    /// error message. Called on any pipeline error short of finalization.
    pub async fn mark_episode_failed(&self, id: &str, message: &str) -> CoreResult<Episode> {
        let now = clock::now();
        sqlx::query(
            r#"
            UPDATE episodes SET
                status = ?, retry_count = retry_count + 1, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(EpisodeStatus::Failed.to_string())
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// Returns an episode to `pending` without touching `retry_count`.
    /// Used on the cancellation path.
    pub async fn reset_episode_to_pending(&self, id: &str) -> CoreResult<Episode> {
        let now = clock::now();
        sqlx::query("UPDATE episodes SET status = ?, updated_at = ? WHERE id = ?")
            .bind(EpisodeStatus::Pending.to_string())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// Soft-deletes a completed episode for retention: clears paths and
    /// sizes, sets `status = deleted`. Never touches non-completed rows or
    /// cascades — the caller already filtered to the over-retention set.
    pub async fn mark_episode_deleted_by_retention(&self, id: &str) -> CoreResult<Episode> {
        let now = clock::now();
        sqlx::query(
            r#"
            UPDATE episodes SET
                status = ?, audio_path = NULL, video_path = NULL,
                audio_size = NULL, video_size = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(EpisodeStatus::Deleted.to_string())
        .bind(now)
        .bind(id)
        .bind(EpisodeStatus::Completed.to_string())
        .execute(&self.pool)
        .await?;
        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// Resets an episode for a fresh admin-initiated retry: only valid from
    /// `failed`.
    pub async fn reset_episode_for_retry(&self, id: &str) -> CoreResult<Episode> {
        let now = clock::now();
        let result = sqlx::query(
            r#"
            UPDATE episodes SET
                status = ?, retry_count = 0, last_error = NULL, updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(EpisodeStatus::Pending.to_string())
        .bind(now)
        .bind(id)
        .bind(EpisodeStatus::Failed.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "episode {id} is not in status failed"
            )));
        }
        self.get_episode(id)
            .await?
            .ok_or_else(|| CoreError::not_found("episode", id))
    }

    /// Hard delete, used only by the admin surface.
    pub async fn delete_episode(&self, id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM episodes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("episode", id));
        }
        Ok(())
    }

    pub async fn count_episodes_by_status(
        &self,
        channel_id: Option<&str>,
        status: EpisodeStatus,
    ) -> CoreResult<i64> {
        let row = match channel_id {
            Some(cid) => {
                sqlx::query("SELECT COUNT(*) AS n FROM episodes WHERE channel_id = ? AND status = ?")
                    .bind(cid)
                    .bind(status.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM episodes WHERE status = ?")
                    .bind(status.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.try_get::<i64, _>("n")?)
    }
}
