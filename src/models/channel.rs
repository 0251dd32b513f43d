use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target artifact shape for a channel's episodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "lowercase")]
pub enum ChannelFormat {
    Audio,
    Video,
    Both,
}

impl std::fmt::Display for ChannelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Both => "both",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ChannelFormat {
    type Err = crate::errors::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            "both" => Ok(Self::Both),
            other => Err(crate::errors::CoreError::validation(format!(
                "unknown channel format '{other}'"
            ))),
        }
    }
}

/// A source to mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Channel {
    pub id: String,
    pub source_url: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub keep_count: i64,
    pub format: ChannelFormat,
    pub enabled: bool,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Admin-supplied fields when creating a channel.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelCreateRequest {
    pub source_url: String,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    pub keep_count: i64,
    pub format: ChannelFormat,
    pub enabled: bool,
}

impl ChannelCreateRequest {
    /// Validates the constrained fields: `keep_count` must fall in 1..1000.
    pub fn validate(&self) -> Result<(), crate::errors::CoreError> {
        if !(1..=1000).contains(&self.keep_count) {
            return Err(crate::errors::CoreError::validation(format!(
                "keep_count must be between 1 and 1000, got {}",
                self.keep_count
            )));
        }
        if self.source_url.trim().is_empty() {
            return Err(crate::errors::CoreError::validation(
                "source_url must not be empty",
            ));
        }
        url::Url::parse(&self.source_url)
            .map_err(|e| crate::errors::CoreError::validation(format!("invalid source_url: {e}")))?;
        Ok(())
    }
}

/// Admin-supplied fields when updating a channel. `None` leaves a field
/// unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelUpdateRequest {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub thumbnail_url: Option<Option<String>>,
    pub keep_count: Option<i64>,
    pub format: Option<ChannelFormat>,
    pub enabled: Option<bool>,
}

impl ChannelUpdateRequest {
    pub fn validate(&self) -> Result<(), crate::errors::CoreError> {
        if let Some(keep_count) = self.keep_count {
            if !(1..=1000).contains(&keep_count) {
                return Err(crate::errors::CoreError::validation(format!(
                    "keep_count must be between 1 and 1000, got {keep_count}"
                )));
            }
        }
        Ok(())
    }
}
