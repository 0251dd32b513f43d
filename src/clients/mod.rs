//! External client contracts (C3): [`Fetcher`] and [`Transcoder`].
//!
//! Only the contracts and a minimal subprocess-backed reference
//! implementation of each live here; richer argument templating for the
//! underlying downloader/encoder belongs to the outer deployment.

pub mod process_fetcher;
pub mod process_transcoder;
pub mod testing;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::CoreResult;

pub use process_fetcher::ProcessFetcher;
pub use process_transcoder::ProcessTranscoder;

/// One item as reported by the fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub duration_seconds: Option<i64>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    pub thumbnail_url: Option<String>,
}

/// A download/transcode progress event forwarded to a [`ProgressSink`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub bytes: u64,
    pub total: Option<u64>,
    pub fraction: Option<f64>,
}

/// A callback invoked with progress events; shared so both the pipeline and
/// an eventual admin-status poller can hold a clone.
pub type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// Lists and fetches items from one external source.
///
/// Every operation accepts a [`CancellationToken`] and must abort promptly
/// on cancel — at or below the underlying I/O's own granularity.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Lists items for `source_url`, newest-first, finite.
    async fn list_channel_items(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<FetchedItem>>;

    /// Fetches metadata for a single item, without downloading media.
    async fn fetch_item_metadata(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<FetchedItem>;

    /// Downloads the source media file into `output_path`'s directory,
    /// returning the path actually produced (the container extension is
    /// whatever the source delivered).
    async fn fetch_item_media(
        &self,
        external_id: &str,
        output_path: &Path,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<PathBuf>;
}

/// Probed media characteristics, as reported by the transcoder contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: Option<Duration>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Audio transcode parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTranscodeOptions {
    pub format: String,
    pub bitrate: String,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Video transcode parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTranscodeOptions {
    pub format: String,
    pub video_codec: String,
    pub preset: String,
    pub crf: u32,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub threads: u32,
}

/// Outcome of a successful transcode.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutcome {
    pub success: bool,
    pub exit_code: i32,
    pub duration: Duration,
    pub output_path: PathBuf,
    pub output_size: u64,
}

/// Classifies a failed subprocess invocation into a [`crate::errors::CoreError`]
/// kind, used by both [`ProcessFetcher`] and [`ProcessTranscoder`].
/// Heuristic and intentionally simple: richer error taxonomies belong to the
/// specific downloader/encoder being wrapped, not to this crate.
pub(crate) fn classify_process_failure(
    exit_code: Option<i32>,
    stderr_tail: &str,
) -> crate::errors::CoreError {
    let lower = stderr_tail.to_ascii_lowercase();
    if lower.contains("404") || lower.contains("not found") || lower.contains("no longer available")
    {
        crate::errors::CoreError::NotFound {
            resource: "source item",
            id: stderr_tail.lines().next().unwrap_or_default().to_string(),
        }
    } else if lower.contains("403")
        || lower.contains("forbidden")
        || lower.contains("private")
        || lower.contains("sign in")
    {
        crate::errors::CoreError::PrivateOrForbidden {
            message: stderr_tail.to_string(),
        }
    } else if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("dns")
    {
        crate::errors::CoreError::Network {
            message: stderr_tail.to_string(),
        }
    } else if lower.contains("unsupported")
        || lower.contains("decode")
        || lower.contains("codec")
        || lower.contains("invalid data")
    {
        crate::errors::CoreError::Format {
            message: stderr_tail.to_string(),
        }
    } else {
        crate::errors::CoreError::Unknown {
            message: format!(
                "process exited with {:?}: {}",
                exit_code,
                stderr_tail.trim()
            ),
        }
    }
}

/// Re-encodes media to a target audio/video format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, path: &Path) -> CoreResult<MediaInfo>;

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        options: &AudioTranscodeOptions,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome>;

    async fn transcode_video(
        &self,
        input: &Path,
        output: &Path,
        options: &VideoTranscodeOptions,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome>;
}
