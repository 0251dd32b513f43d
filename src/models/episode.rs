use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`Episode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
    Deleted,
}

impl std::fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// One item discovered on a channel.
///
/// `status = completed` implies at least one of `audio_path`/`video_path` is
/// set, `downloaded_at` is set, and the file existed on disk at write time;
/// the pipeline's finalization step is the only place that invariant is
/// upheld.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Episode {
    pub id: String,
    pub channel_id: String,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
    pub status: EpisodeStatus,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub audio_path: Option<String>,
    pub video_path: Option<String>,
    pub audio_size: Option<i64>,
    pub video_size: Option<i64>,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Episode {
    /// True once the completed-status artifact invariant is satisfiable from
    /// the row alone (the pipeline's idempotence check still stats the file).
    pub fn has_artifact(&self) -> bool {
        self.audio_path.is_some() || self.video_path.is_some()
    }
}

/// The shape of one item as reported by the fetcher, reused here so the
/// refresh service can compare against existing rows without a second type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<DateTime<Utc>>,
}
