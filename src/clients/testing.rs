//! Hand-written async mocks of [`Fetcher`] and [`Transcoder`], scripted to
//! return specific sequences of results including cancellation and the full
//! range of error kinds. Exposed unconditionally (not `#[cfg(test)]`-gated)
//! so both this crate's unit tests and its `tests/` integration tests can
//! depend on them, following the mock-first testing style already used in
//! this codebase's repository tests.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{
    AudioTranscodeOptions, FetchedItem, Fetcher, MediaInfo, Progress, ProgressSink, Transcoder,
    TranscodeOutcome, VideoTranscodeOptions,
};
use crate::errors::{CoreError, CoreResult};

/// One scripted outcome for a mock fetcher call.
pub enum FetcherStep {
    Items(Vec<FetchedItem>),
    Media(PathBuf),
    Err(CoreError),
}

/// A [`Fetcher`] that replays a fixed script of outcomes, one per call,
/// regardless of which operation is invoked — tests script exactly the
/// sequence they need (e.g. Network once then success).
pub struct MockFetcher {
    list_script: Mutex<Vec<FetcherStep>>,
    media_script: Mutex<Vec<FetcherStep>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            list_script: Mutex::new(Vec::new()),
            media_script: Mutex::new(Vec::new()),
        }
    }

    pub fn with_list_results(self, steps: Vec<FetcherStep>) -> Self {
        *self.list_script.lock().unwrap() = steps;
        self
    }

    pub fn with_media_results(self, steps: Vec<FetcherStep>) -> Self {
        *self.media_script.lock().unwrap() = steps;
        self
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn list_channel_items(
        &self,
        _source_url: &str,
        _cancel: &CancellationToken,
    ) -> CoreResult<Vec<FetchedItem>> {
        let step = self.list_script.lock().unwrap().pop();
        match step {
            Some(FetcherStep::Items(items)) => Ok(items),
            Some(FetcherStep::Err(e)) => Err(e),
            _ => Ok(Vec::new()),
        }
    }

    async fn fetch_item_metadata(
        &self,
        external_id: &str,
        _cancel: &CancellationToken,
    ) -> CoreResult<FetchedItem> {
        Ok(FetchedItem {
            external_id: external_id.to_string(),
            title: external_id.to_string(),
            description: None,
            duration_seconds: None,
            published_at: None,
            thumbnail_url: None,
        })
    }

    async fn fetch_item_media(
        &self,
        _external_id: &str,
        output_path: &Path,
        _progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<PathBuf> {
        let step = self.media_script.lock().unwrap().pop();
        match step {
            Some(FetcherStep::Media(path)) => {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                std::fs::write(&path, b"source-media").map_err(|e| CoreError::Fatal {
                    message: e.to_string(),
                })?;
                Ok(path)
            }
            Some(FetcherStep::Err(CoreError::Cancelled)) => {
                cancel.cancel();
                Err(CoreError::Cancelled)
            }
            Some(FetcherStep::Err(e)) => Err(e),
            _ => {
                std::fs::write(output_path, b"source-media").map_err(|e| CoreError::Fatal {
                    message: e.to_string(),
                })?;
                Ok(output_path.to_path_buf())
            }
        }
    }
}

/// A [`Transcoder`] that always succeeds, writing a small placeholder file
/// to the requested output path and reporting its size.
pub struct MockTranscoder {
    pub fail_video: Mutex<bool>,
}

impl MockTranscoder {
    pub fn new() -> Self {
        Self {
            fail_video: Mutex::new(false),
        }
    }

    pub fn failing_video(self) -> Self {
        *self.fail_video.lock().unwrap() = true;
        self
    }
}

impl Default for MockTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for MockTranscoder {
    async fn probe(&self, _path: &Path) -> CoreResult<MediaInfo> {
        Ok(MediaInfo {
            duration: Some(std::time::Duration::from_secs(60)),
            video_codec: Some("h264".to_string()),
            audio_codec: Some("aac".to_string()),
            width: Some(1280),
            height: Some(720),
        })
    }

    async fn transcode_audio(
        &self,
        _input: &Path,
        output: &Path,
        _options: &AudioTranscodeOptions,
        progress: Option<ProgressSink>,
        _cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome> {
        if let Some(sink) = &progress {
            sink(Progress {
                bytes: 100,
                total: Some(100),
                fraction: Some(1.0),
            });
        }
        if let Some(parent) = output.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let bytes = b"audio-artifact";
        std::fs::write(output, bytes).map_err(|e| CoreError::Fatal {
            message: e.to_string(),
        })?;
        Ok(TranscodeOutcome {
            success: true,
            exit_code: 0,
            duration: std::time::Duration::from_millis(10),
            output_path: output.to_path_buf(),
            output_size: bytes.len() as u64,
        })
    }

    async fn transcode_video(
        &self,
        _input: &Path,
        output: &Path,
        _options: &VideoTranscodeOptions,
        _progress: Option<ProgressSink>,
        _cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome> {
        if *self.fail_video.lock().unwrap() {
            return Err(CoreError::Format {
                message: "mock video transcode failure".to_string(),
            });
        }
        if let Some(parent) = output.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let bytes = b"video-artifact";
        std::fs::write(output, bytes).map_err(|e| CoreError::Fatal {
            message: e.to_string(),
        })?;
        Ok(TranscodeOutcome {
            success: true,
            exit_code: 0,
            duration: std::time::Duration::from_millis(10),
            output_path: output.to_path_buf(),
            output_size: bytes.len() as u64,
        })
    }
}
