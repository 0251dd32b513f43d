use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`QueueItem`].
///
/// `Completed`, `Failed` and `Cancelled` are terminal: no further transition
/// ever changes their status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    InProgress,
    Completed,
    Retrying,
    Failed,
    Cancelled,
}

impl QueueItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Retrying => "retrying",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Scheduled download work for an episode.
///
/// At most one non-terminal `QueueItem` exists per episode at any time —
/// enforced by a unique index on `episode_id` filtered to non-terminal rows
/// at the store layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueItem {
    pub id: String,
    pub episode_id: String,
    pub priority: i64,
    pub status: QueueItemStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The default priority used by refresh-discovered and admin-retried items.
pub const DEFAULT_PRIORITY: i64 = 5;

/// The default retry ceiling for a freshly enqueued item (the retry policy
/// governs the delay once attempts accrue; this is the `max_attempts` a
/// queue item is born with).
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;
