use sqlx::Row;

use super::Store;
use crate::clock;
use crate::errors::{CoreError, CoreResult};
use crate::models::{Channel, ChannelCreateRequest, ChannelUpdateRequest};

impl Store {
    pub async fn create_channel(&self, request: ChannelCreateRequest) -> CoreResult<Channel> {
        request.validate()?;
        let now = clock::now();
        let id = clock::new_id();

        sqlx::query(
            r#"
            INSERT INTO channels (
                id, source_url, title, description, thumbnail_url,
                keep_count, format, enabled, last_refresh_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&request.source_url)
        .bind(&request.title)
        .bind(&request.description)
        .bind(&request.thumbnail_url)
        .bind(request.keep_count)
        .bind(request.format.to_string())
        .bind(request.enabled)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_channel(&id)
            .await?
            .ok_or_else(|| CoreError::fatal("channel vanished immediately after insert"))
    }

    pub async fn get_channel(&self, id: &str) -> CoreResult<Option<Channel>> {
        let channel = sqlx::query_as::<_, Channel>("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(channel)
    }

    pub async fn list_channels(&self) -> CoreResult<Vec<Channel>> {
        let channels =
            sqlx::query_as::<_, Channel>("SELECT * FROM channels ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(channels)
    }

    pub async fn list_enabled_channels(&self) -> CoreResult<Vec<Channel>> {
        let channels = sqlx::query_as::<_, Channel>(
            "SELECT * FROM channels WHERE enabled = TRUE ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(channels)
    }

    pub async fn update_channel(
        &self,
        id: &str,
        request: ChannelUpdateRequest,
    ) -> CoreResult<Channel> {
        request.validate()?;
        let current = self
            .get_channel(id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", id))?;

        let title = request.title.unwrap_or(current.title);
        let description = request.description.unwrap_or(current.description);
        let thumbnail_url = request.thumbnail_url.unwrap_or(current.thumbnail_url);
        let keep_count = request.keep_count.unwrap_or(current.keep_count);
        let format = request.format.unwrap_or(current.format);
        let enabled = request.enabled.unwrap_or(current.enabled);
        let now = clock::now();

        sqlx::query(
            r#"
            UPDATE channels SET
                title = ?, description = ?, thumbnail_url = ?,
                keep_count = ?, format = ?, enabled = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&title)
        .bind(&description)
        .bind(&thumbnail_url)
        .bind(keep_count)
        .bind(format.to_string())
        .bind(enabled)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_channel(id)
            .await?
            .ok_or_else(|| CoreError::not_found("channel", id))
    }

    pub async fn mark_channel_refreshed(&self, id: &str) -> CoreResult<()> {
        let now = clock::now();
        sqlx::query("UPDATE channels SET last_refresh_at = ?, updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Deletes a channel, cascading to its episodes and queue items via the
    /// foreign key. `delete_files` is honored by the caller (admin layer)
    /// before this call — the store only removes rows.
    pub async fn delete_channel(&self, id: &str) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM channels WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("channel", id));
        }
        Ok(())
    }

    pub async fn count_channels(&self) -> CoreResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM channels")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")?)
    }
}
