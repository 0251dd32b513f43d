//! Subprocess-backed reference [`Transcoder`].
//!
//! Drives a configured external encoder (an `ffmpeg`-shaped tool), parsing
//! `-progress`-style `key=value` stdout lines for progress and
//! `ffprobe`-style JSON for [`Transcoder::probe`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    classify_process_failure, AudioTranscodeOptions, MediaInfo, Progress, ProgressSink,
    Transcoder, TranscodeOutcome, VideoTranscodeOptions,
};
use crate::errors::{CoreError, CoreResult};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Deserialize, Default)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize, Default)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

/// Drives `binary probe <path>` and `binary encode <input> <output> <args...>`.
pub struct ProcessTranscoder {
    encoder_binary: PathBuf,
    probe_binary: PathBuf,
}

impl ProcessTranscoder {
    pub fn new(encoder_binary: impl Into<PathBuf>, probe_binary: impl Into<PathBuf>) -> Self {
        Self {
            encoder_binary: encoder_binary.into(),
            probe_binary: probe_binary.into(),
        }
    }

    fn spawn_stderr_collector(
        stderr: tokio::process::ChildStderr,
    ) -> Arc<Mutex<VecDeque<String>>> {
        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let writer = tail.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let mut buf = writer.lock().await;
                if buf.len() >= STDERR_TAIL_LINES {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
        });
        tail
    }

    async fn run_encode(
        &self,
        input: &Path,
        output: &Path,
        args: Vec<String>,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome> {
        let start = Instant::now();
        let mut full_args = vec![
            "encode".to_string(),
            input.to_string_lossy().to_string(),
            output.to_string_lossy().to_string(),
        ];
        full_args.extend(args);

        let mut child = Command::new(&self.encoder_binary)
            .args(&full_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Unknown {
                message: format!("failed to spawn {:?}: {e}", self.encoder_binary),
            })?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stderr_tail = Self::spawn_stderr_collector(stderr);

        let mut lines = BufReader::new(stdout).lines();
        let mut out_time_ms: Option<u64> = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = child.start_kill();
                    return Err(CoreError::Cancelled);
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(raw)) => {
                            if let Some((key, value)) = raw.split_once('=') {
                                match key.trim() {
                                    "out_time_ms" => out_time_ms = value.trim().parse().ok(),
                                    "progress" => {
                                        if let Some(sink) = &progress {
                                            sink(Progress {
                                                bytes: out_time_ms.unwrap_or(0),
                                                total: None,
                                                fraction: None,
                                            });
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            return Err(CoreError::Network {
                                message: format!("reading subprocess stdout: {e}"),
                            })
                        }
                    }
                }
            }
        }

        let status = child.wait().await.map_err(|e| CoreError::Unknown {
            message: format!("waiting for subprocess: {e}"),
        })?;
        if !status.success() {
            let tail = stderr_tail.lock().await;
            let joined: String = tail.iter().cloned().collect::<Vec<_>>().join("\n");
            warn!(exit_code = ?status.code(), "transcode subprocess failed");
            return Err(classify_process_failure(status.code(), &joined));
        }

        let output_size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(TranscodeOutcome {
            success: true,
            exit_code: status.code().unwrap_or(0),
            duration: start.elapsed(),
            output_path: output.to_path_buf(),
            output_size,
        })
    }
}

#[async_trait]
impl Transcoder for ProcessTranscoder {
    async fn probe(&self, path: &Path) -> CoreResult<MediaInfo> {
        debug!(path = %path.display(), "probing media");
        let output = Command::new(&self.probe_binary)
            .args(["-of", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .map_err(|e| CoreError::Unknown {
                message: format!("failed to spawn {:?}: {e}", self.probe_binary),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(classify_process_failure(output.status.code(), &stderr));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
            CoreError::Format {
                message: format!("malformed probe JSON: {e}"),
            }
        })?;

        let duration = parsed
            .format
            .duration
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .map(Duration::from_secs_f64);
        let video = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"));
        let audio = parsed
            .streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("audio"));

        Ok(MediaInfo {
            duration,
            video_codec: video.and_then(|s| s.codec_name.clone()),
            audio_codec: audio.and_then(|s| s.codec_name.clone()),
            width: video.and_then(|s| s.width),
            height: video.and_then(|s| s.height),
        })
    }

    async fn transcode_audio(
        &self,
        input: &Path,
        output: &Path,
        options: &AudioTranscodeOptions,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome> {
        let args = vec![
            "--format".to_string(),
            options.format.clone(),
            "--bitrate".to_string(),
            options.bitrate.clone(),
            "--sample-rate".to_string(),
            options.sample_rate.to_string(),
            "--channels".to_string(),
            options.channels.to_string(),
        ];
        self.run_encode(input, output, args, progress, cancel).await
    }

    async fn transcode_video(
        &self,
        input: &Path,
        output: &Path,
        options: &VideoTranscodeOptions,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<TranscodeOutcome> {
        let args = vec![
            "--format".to_string(),
            options.format.clone(),
            "--video-codec".to_string(),
            options.video_codec.clone(),
            "--preset".to_string(),
            options.preset.clone(),
            "--crf".to_string(),
            options.crf.to_string(),
            "--audio-bitrate".to_string(),
            options.audio_bitrate.clone(),
            "--audio-sample-rate".to_string(),
            options.audio_sample_rate.to_string(),
            "--audio-channels".to_string(),
            options.audio_channels.to_string(),
            "--threads".to_string(),
            options.threads.to_string(),
        ];
        self.run_encode(input, output, args, progress, cancel).await
    }
}
