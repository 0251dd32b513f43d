//! Pipeline (C8): executes a single queue item end-to-end — fetch,
//! transcode, finalize artifact, update episode, cleanup, retention.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clients::{
    AudioTranscodeOptions, Fetcher, ProgressSink, Transcoder, VideoTranscodeOptions,
};
use crate::clock;
use crate::config::TranscodeSettings;
use crate::concurrency::ConcurrencyGate;
use crate::errors::{CoreError, CoreResult, ErrorKind};
use crate::metrics::Metrics;
use crate::models::{ChannelFormat, Episode, EpisodeStatus};
use crate::retention::RetentionService;
use crate::store::Store;

/// Result of running one episode through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub episode_id: String,
    pub success: bool,
    pub duration: Duration,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

pub struct Pipeline<F: Fetcher, T: Transcoder> {
    store: Store,
    fetcher: Arc<F>,
    transcoder: Arc<T>,
    gate: Arc<ConcurrencyGate>,
    retention: RetentionService,
    metrics: Arc<Metrics>,
    transcode_settings: TranscodeSettings,
    download_dir: PathBuf,
    temp_dir: PathBuf,
}

impl<F: Fetcher, T: Transcoder> Pipeline<F, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        fetcher: Arc<F>,
        transcoder: Arc<T>,
        gate: Arc<ConcurrencyGate>,
        retention: RetentionService,
        metrics: Arc<Metrics>,
        transcode_settings: TranscodeSettings,
        download_dir: PathBuf,
        temp_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            fetcher,
            transcoder,
            gate,
            retention,
            metrics,
            transcode_settings,
            download_dir,
            temp_dir,
        }
    }

    /// Runs `episode_id` through the full fetch-transcode-finalize sequence.
    /// Cancellation between any two steps surfaces as
    /// `{success:false, error_kind:Cancelled}` and returns the episode to
    /// `pending` with no attempt increment — the caller (download worker)
    /// converts that into `requeue_after_cancel` rather than `mark_failed`.
    pub async fn run(
        &self,
        episode_id: &str,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<PipelineOutcome> {
        let start = Instant::now();

        // Step 1: load.
        let episode = match self.store.get_episode(episode_id).await? {
            Some(e) => e,
            None => {
                return Ok(self.failure(episode_id, start, ErrorKind::NotFound, "episode not found"));
            }
        };
        let channel = match self.store.get_channel(&episode.channel_id).await? {
            Some(c) => c,
            None => {
                return Ok(self.failure(
                    episode_id,
                    start,
                    ErrorKind::NotFound,
                    "channel not found",
                ));
            }
        };
        if !channel.enabled {
            return Ok(self.cancelled(episode_id, start));
        }

        // Idempotence short-circuit: a finalized artifact already on disk
        // with matching sizes means this run is a no-op.
        if episode.status == EpisodeStatus::Completed && self.artifact_intact(&episode) {
            return Ok(self.success(episode_id, start));
        }

        if cancel.is_cancelled() {
            return Ok(self.cancelled(episode_id, start));
        }

        // Step 2: transition pending|failed -> downloading. A reclaimed
        // retry re-enters from `failed`, the status a prior retryable
        // failure left it in; a fresh discovery or admin retry enters from
        // `pending`.
        if let Err(e) = self.store.begin_episode_download(episode_id).await {
            return Ok(self.failure(episode_id, start, ErrorKind::Conflict, &e.to_string()));
        }

        let result = self
            .run_acquired(&episode, &channel.format, progress, cancel)
            .await;

        match result {
            Ok(()) => {
                if let Err(e) = self.retention.apply(&channel.id).await {
                    warn!(channel_id = %channel.id, error = %e, "retention pass after completion failed");
                }
                Ok(self.success(episode_id, start))
            }
            Err(PipelineError::Cancelled) => {
                if let Err(e) = self.store.reset_episode_to_pending(episode_id).await {
                    warn!(episode_id, error = %e, "failed to return cancelled episode to pending");
                }
                Ok(self.cancelled(episode_id, start))
            }
            Err(PipelineError::Failed { kind, message }) => {
                if let Err(e) = self.store.mark_episode_failed(episode_id, &message).await {
                    warn!(episode_id, error = %e, "failed to record episode failure");
                }
                Ok(self.failure(episode_id, start, kind, &message))
            }
        }
    }

    /// Steps 3-7 (and their cleanup), run under a held concurrency permit.
    async fn run_acquired(
        &self,
        episode: &Episode,
        format: &ChannelFormat,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let _permit = self
            .gate
            .acquire(cancel)
            .await
            .map_err(|_| PipelineError::Cancelled)?;

        let nonce = clock::new_nonce();
        let temp_path = self.temp_dir.join(format!("{}-{nonce}.src", episode.id));
        if let Some(parent) = temp_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::failed(ErrorKind::Fatal, format!("creating temp dir: {e}")))?;
        }

        // Step 4: fetch.
        let fetch_result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = self.fetcher.fetch_item_media(&episode.external_id, &temp_path, progress.clone(), cancel) => result,
        };
        let fetched_path = match fetch_result {
            Ok(path) => path,
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                return Err(map_client_error(e));
            }
        };

        // Step 5: transition downloading -> processing.
        self.store
            .transition_episode_status(&episode.id, EpisodeStatus::Downloading, EpisodeStatus::Processing)
            .await
            .map_err(|e| PipelineError::failed(ErrorKind::Conflict, e.to_string()))?;

        // Step 6: transcode per channel.format.
        let transcode_result = self
            .transcode(&episode.channel_id, &episode.external_id, &fetched_path, format, progress, cancel)
            .await;

        let artifacts = match transcode_result {
            Ok(artifacts) => artifacts,
            Err(e) => {
                let _ = tokio::fs::remove_file(&fetched_path).await;
                return Err(e);
            }
        };

        // Step 7: finalize (one transaction).
        let mut audio_path = None;
        let mut audio_size = None;
        let mut video_path = None;
        let mut video_size = None;
        for artifact in &artifacts {
            match artifact.kind {
                ArtifactKind::Audio => {
                    audio_path = Some(artifact.path.to_string_lossy().into_owned());
                    audio_size = Some(artifact.size as i64);
                }
                ArtifactKind::Video => {
                    video_path = Some(artifact.path.to_string_lossy().into_owned());
                    video_size = Some(artifact.size as i64);
                }
            }
        }
        self.store
            .finalize_episode(
                &episode.id,
                audio_path.as_deref(),
                audio_size,
                video_path.as_deref(),
                video_size,
            )
            .await
            .map_err(|e| PipelineError::failed(ErrorKind::Fatal, e.to_string()))?;

        // Step 8: best-effort temp cleanup.
        if let Err(e) = tokio::fs::remove_file(&fetched_path).await {
            warn!(episode_id = %episode.id, error = %e, "failed to remove temp source file");
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn transcode(
        &self,
        channel_id: &str,
        external_id: &str,
        input: &Path,
        format: &ChannelFormat,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Artifact>, PipelineError> {
        let mut artifacts = Vec::new();

        if matches!(format, ChannelFormat::Audio | ChannelFormat::Both) {
            let audio_out = self.artifact_path(channel_id, "audio", external_id, &self.transcode_settings.audio_format);
            self.ensure_parent(&audio_out).await?;
            let options = AudioTranscodeOptions {
                format: self.transcode_settings.audio_format.clone(),
                bitrate: self.transcode_settings.audio_bitrate.clone(),
                sample_rate: self.transcode_settings.audio_sample_rate,
                channels: self.transcode_settings.audio_channels,
            };
            let outcome = self
                .transcoder
                .transcode_audio(input, &audio_out, &options, progress.clone(), cancel)
                .await
                .map_err(map_client_error)?;
            artifacts.push(Artifact {
                kind: ArtifactKind::Audio,
                path: outcome.output_path,
                size: outcome.output_size,
            });
        }

        if matches!(format, ChannelFormat::Video | ChannelFormat::Both) {
            let video_out = self.artifact_path(channel_id, "video", external_id, &self.transcode_settings.video_format);
            self.ensure_parent(&video_out).await?;
            let options = VideoTranscodeOptions {
                format: self.transcode_settings.video_format.clone(),
                video_codec: self.transcode_settings.video_codec.clone(),
                preset: "medium".to_string(),
                crf: self.transcode_settings.video_quality,
                audio_bitrate: self.transcode_settings.audio_bitrate.clone(),
                audio_sample_rate: self.transcode_settings.audio_sample_rate,
                audio_channels: self.transcode_settings.audio_channels,
                threads: self.transcode_settings.threads,
            };
            match self
                .transcoder
                .transcode_video(input, &video_out, &options, progress, cancel)
                .await
            {
                Ok(outcome) => artifacts.push(Artifact {
                    kind: ArtifactKind::Video,
                    path: outcome.output_path,
                    size: outcome.output_size,
                }),
                Err(e) => {
                    // Transcoding `both`: the audio artifact already on disk
                    // is kept (not deleted here); retention reclaims it later.
                    return Err(map_client_error(e));
                }
            }
        }

        Ok(artifacts)
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::failed(ErrorKind::Fatal, format!("creating output dir: {e}")))?;
        }
        Ok(())
    }

    fn artifact_path(&self, channel_id: &str, kind: &str, external_id: &str, ext: &str) -> PathBuf {
        self.download_dir
            .join(channel_id)
            .join(kind)
            .join(format!("{external_id}.{ext}"))
    }

    /// True when the completed episode's recorded artifact(s) still exist on
    /// disk with matching sizes.
    fn artifact_intact(&self, episode: &Episode) -> bool {
        let audio_ok = match (&episode.audio_path, episode.audio_size) {
            (Some(path), Some(size)) => file_len(path) == Some(size as u64),
            (None, None) => true,
            _ => false,
        };
        let video_ok = match (&episode.video_path, episode.video_size) {
            (Some(path), Some(size)) => file_len(path) == Some(size as u64),
            (None, None) => true,
            _ => false,
        };
        episode.has_artifact() && audio_ok && video_ok
    }

    fn success(&self, episode_id: &str, start: Instant) -> PipelineOutcome {
        info!(episode_id, "pipeline run completed");
        self.metrics.set_active_downloads(self.gate.active_count());
        PipelineOutcome {
            episode_id: episode_id.to_string(),
            success: true,
            duration: start.elapsed(),
            error: None,
            error_kind: None,
        }
    }

    fn cancelled(&self, episode_id: &str, start: Instant) -> PipelineOutcome {
        info!(episode_id, "pipeline run cancelled");
        self.metrics.set_active_downloads(self.gate.active_count());
        PipelineOutcome {
            episode_id: episode_id.to_string(),
            success: false,
            duration: start.elapsed(),
            error: Some("cancelled".to_string()),
            error_kind: Some(ErrorKind::Cancelled),
        }
    }

    fn failure(
        &self,
        episode_id: &str,
        start: Instant,
        kind: ErrorKind,
        message: &str,
    ) -> PipelineOutcome {
        warn!(episode_id, error = message, ?kind, "pipeline run failed");
        self.metrics.set_active_downloads(self.gate.active_count());
        PipelineOutcome {
            episode_id: episode_id.to_string(),
            success: false,
            duration: start.elapsed(),
            error: Some(message.to_string()),
            error_kind: Some(kind),
        }
    }
}

fn file_len(path: &str) -> Option<u64> {
    std::fs::metadata(path).ok().map(|m| m.len())
}

enum ArtifactKind {
    Audio,
    Video,
}

struct Artifact {
    kind: ArtifactKind,
    path: PathBuf,
    size: u64,
}

/// Internal control-flow error distinguishing a cancellation from a
/// classified, terminal-or-retryable failure; collapsed into
/// [`PipelineOutcome`] by `run`.
enum PipelineError {
    Cancelled,
    Failed { kind: ErrorKind, message: String },
}

impl PipelineError {
    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            message: message.into(),
        }
    }
}

fn map_client_error(e: CoreError) -> PipelineError {
    match e.kind() {
        ErrorKind::Cancelled => PipelineError::Cancelled,
        kind => PipelineError::failed(kind, e.to_string()),
    }
}
