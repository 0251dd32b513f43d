use std::collections::HashMap;

use sqlx::Row;

use super::Store;
use crate::clock;
use crate::errors::{CoreError, CoreResult, ErrorKind};
use crate::models::queue_item::DEFAULT_MAX_ATTEMPTS;
use crate::models::{QueueItem, QueueItemStatus};
use crate::retry;

impl Store {
    /// `Conflict` if a non-terminal queue item already exists for the
    /// episode — enforced by the partial unique index on `episode_id`.
    pub async fn enqueue_queue_item(
        &self,
        episode_id: &str,
        priority: i64,
    ) -> CoreResult<QueueItem> {
        let now = clock::now();
        let id = clock::new_id();

        sqlx::query(
            r#"
            INSERT INTO queue_items (
                id, episode_id, priority, status, attempts, max_attempts,
                last_error, next_retry_at, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 0, ?, NULL, NULL, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(episode_id)
        .bind(priority)
        .bind(QueueItemStatus::Pending.to_string())
        .bind(DEFAULT_MAX_ATTEMPTS)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_queue_item(&id)
            .await?
            .ok_or_else(|| CoreError::fatal("queue item vanished immediately after insert"))
    }

    pub async fn get_queue_item(&self, id: &str) -> CoreResult<Option<QueueItem>> {
        let item = sqlx::query_as::<_, QueueItem>("SELECT * FROM queue_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// The most recently created queue item for `episode_id`, of any status.
    pub async fn queue_item_by_episode(&self, episode_id: &str) -> CoreResult<Option<QueueItem>> {
        let item = sqlx::query_as::<_, QueueItem>(
            "SELECT * FROM queue_items WHERE episode_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(episode_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// First `retrying` item due now (order `priority, next_retry_at, id`),
    /// otherwise the first `pending` item (order `priority, created_at, id`).
    pub async fn next_due_queue_item(&self) -> CoreResult<Option<QueueItem>> {
        let now = clock::now();
        if let Some(item) = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM queue_items
            WHERE status = ? AND next_retry_at <= ?
            ORDER BY priority ASC, next_retry_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(QueueItemStatus::Retrying.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        {
            return Ok(Some(item));
        }

        let item = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM queue_items
            WHERE status = ?
            ORDER BY priority ASC, created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(QueueItemStatus::Pending.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(item)
    }

    /// All `retrying` items due now, in the same order `next_due` would
    /// prefer them.
    pub async fn retryable_queue_items(&self) -> CoreResult<Vec<QueueItem>> {
        let now = clock::now();
        let items = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM queue_items
            WHERE status = ? AND next_retry_at <= ?
            ORDER BY priority ASC, next_retry_at ASC, id ASC
            "#,
        )
        .bind(QueueItemStatus::Retrying.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Atomic CAS: `pending|retrying -> in_progress`.
    pub async fn claim_queue_item(&self, id: &str) -> CoreResult<QueueItem> {
        let now = clock::now();
        let result = sqlx::query(
            r#"
            UPDATE queue_items SET status = ?, updated_at = ?
            WHERE id = ? AND status IN (?, ?)
            "#,
        )
        .bind(QueueItemStatus::InProgress.to_string())
        .bind(now)
        .bind(id)
        .bind(QueueItemStatus::Pending.to_string())
        .bind(QueueItemStatus::Retrying.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "queue item {id} is not claimable (already claimed or terminal)"
            )));
        }
        self.get_queue_item(id)
            .await?
            .ok_or_else(|| CoreError::not_found("queue_item", id))
    }

    /// Requires prior state `in_progress`; a second caller observes
    /// `Conflict`.
    pub async fn mark_queue_item_completed(&self, id: &str) -> CoreResult<QueueItem> {
        let now = clock::now();
        let result = sqlx::query("UPDATE queue_items SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(QueueItemStatus::Completed.to_string())
            .bind(now)
            .bind(id)
            .bind(QueueItemStatus::InProgress.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "queue item {id} is not in_progress"
            )));
        }
        self.get_queue_item(id)
            .await?
            .ok_or_else(|| CoreError::not_found("queue_item", id))
    }

    /// Consults the retry policy and applies the resulting transition in
    /// one statement.
    pub async fn mark_queue_item_failed(
        &self,
        id: &str,
        error_kind: ErrorKind,
        message: &str,
    ) -> CoreResult<QueueItem> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT attempts, max_attempts FROM queue_items WHERE id = ? AND status = ?")
            .bind(id)
            .bind(QueueItemStatus::InProgress.to_string())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::conflict(format!("queue item {id} is not in_progress")))?;

        let attempts: i64 = row.try_get("attempts")?;
        let max_attempts: i64 = row.try_get("max_attempts")?;
        let new_attempts = attempts + 1;
        let decision = retry::decide(new_attempts, max_attempts, error_kind);
        let now = clock::now();

        if decision.retryable {
            let next_retry_at = now
                + chrono::Duration::from_std(decision.delay.unwrap_or_default())
                    .unwrap_or(chrono::Duration::zero());
            sqlx::query(
                r#"
                UPDATE queue_items SET
                    status = ?, attempts = ?, next_retry_at = ?, last_error = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(QueueItemStatus::Retrying.to_string())
            .bind(new_attempts)
            .bind(next_retry_at)
            .bind(message)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE queue_items SET
                    status = ?, attempts = ?, next_retry_at = NULL, last_error = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(QueueItemStatus::Failed.to_string())
            .bind(new_attempts)
            .bind(message)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        self.get_queue_item(id)
            .await?
            .ok_or_else(|| CoreError::not_found("queue_item", id))
    }

    /// Sets `cancelled` if non-terminal; idempotent no-op if already
    /// terminal.
    pub async fn cancel_queue_item(&self, id: &str) -> CoreResult<()> {
        let now = clock::now();
        sqlx::query(
            r#"
            UPDATE queue_items SET status = ?, updated_at = ?
            WHERE id = ? AND status NOT IN (?, ?, ?)
            "#,
        )
        .bind(QueueItemStatus::Cancelled.to_string())
        .bind(now)
        .bind(id)
        .bind(QueueItemStatus::Completed.to_string())
        .bind(QueueItemStatus::Failed.to_string())
        .bind(QueueItemStatus::Cancelled.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The cancellation-specific transition: `in_progress -> pending` (or
    /// back to `retrying` with its prior `next_retry_at`), with no attempt
    /// increment.
    pub async fn requeue_queue_item_after_cancel(&self, id: &str) -> CoreResult<QueueItem> {
        let now = clock::now();
        let result = sqlx::query(
            r#"
            UPDATE queue_items SET
                status = CASE WHEN next_retry_at IS NOT NULL THEN ? ELSE ? END,
                updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(QueueItemStatus::Retrying.to_string())
        .bind(QueueItemStatus::Pending.to_string())
        .bind(now)
        .bind(id)
        .bind(QueueItemStatus::InProgress.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::conflict(format!(
                "queue item {id} is not in_progress"
            )));
        }
        self.get_queue_item(id)
            .await?
            .ok_or_else(|| CoreError::not_found("queue_item", id))
    }

    pub async fn count_queue_items_by_status(&self) -> CoreResult<HashMap<QueueItemStatus, i64>> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM queue_items GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let status_str: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            let status = match status_str.as_str() {
                "pending" => QueueItemStatus::Pending,
                "in_progress" => QueueItemStatus::InProgress,
                "completed" => QueueItemStatus::Completed,
                "retrying" => QueueItemStatus::Retrying,
                "failed" => QueueItemStatus::Failed,
                "cancelled" => QueueItemStatus::Cancelled,
                other => {
                    return Err(CoreError::fatal(format!(
                        "unrecognized queue item status in database: {other}"
                    )))
                }
            };
            counts.insert(status, n);
        }
        Ok(counts)
    }

    /// In-progress queue items joined with episode/channel titles, for the
    /// admin queue snapshot.
    pub async fn in_progress_queue_items_with_titles(
        &self,
    ) -> CoreResult<Vec<(QueueItem, String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT q.*, e.title AS episode_title, c.title AS channel_title
            FROM queue_items q
            JOIN episodes e ON e.id = q.episode_id
            JOIN channels c ON c.id = e.channel_id
            WHERE q.status = ?
            ORDER BY q.updated_at ASC
            "#,
        )
        .bind(QueueItemStatus::InProgress.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let item = QueueItem {
                id: row.try_get("id")?,
                episode_id: row.try_get("episode_id")?,
                priority: row.try_get("priority")?,
                status: QueueItemStatus::InProgress,
                attempts: row.try_get("attempts")?,
                max_attempts: row.try_get("max_attempts")?,
                last_error: row.try_get("last_error")?,
                next_retry_at: row.try_get("next_retry_at")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            };
            let episode_title: String = row.try_get("episode_title")?;
            let channel_title: String = row.try_get("channel_title")?;
            out.push((item, episode_title, channel_title));
        }
        Ok(out)
    }

    /// Recent failed items with error messages, for the admin queue
    /// snapshot.
    pub async fn recent_failed_queue_items(&self, limit: i64) -> CoreResult<Vec<QueueItem>> {
        let items = sqlx::query_as::<_, QueueItem>(
            r#"
            SELECT * FROM queue_items
            WHERE status = ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(QueueItemStatus::Failed.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}
