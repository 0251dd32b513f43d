//! Subprocess-backed reference [`Fetcher`].
//!
//! Drives a configured external command-line downloader (a `yt-dlp`-shaped
//! tool). `list_channel_items`/`fetch_item_metadata` parse newline-delimited
//! JSON emitted on the subprocess's stdout; `fetch_item_media` streams the
//! subprocess's progress annotations (`{"downloaded_bytes":N,"total_bytes":M}`
//! lines) into the progress sink and classifies a non-zero exit status from
//! the captured stderr tail. This is the minimal amount of argument
//! construction needed to exercise the contract end-to-end; richer argument
//! templating belongs to the outer deployment, not this crate.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{classify_process_failure, FetchedItem, Fetcher, Progress, ProgressSink};
use crate::errors::{CoreError, CoreResult};

const STDERR_TAIL_LINES: usize = 20;

#[derive(Deserialize)]
struct DownloadProgressLine {
    downloaded_bytes: Option<u64>,
    total_bytes: Option<u64>,
}

/// Drives `binary list <source_url>` / `binary metadata <external_id>` /
/// `binary fetch <external_id> <output_path>` and parses their stdout.
pub struct ProcessFetcher {
    binary: PathBuf,
}

impl ProcessFetcher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn spawn(&self, args: &[&str]) -> CoreResult<tokio::process::Child> {
        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Unknown {
                message: format!("failed to spawn {:?}: {e}", self.binary),
            })
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

    async fn parse_json_lines(
        &self,
        mut child: tokio::process::Child,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<FetchedItem>> {
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stderr_tail = Self::spawn_stderr_collector(stderr);

        let mut items = Vec::new();
        let mut lines = BufReader::new(stdout).lines();
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
                            let trimmed = raw.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            let item: FetchedItem = serde_json::from_str(trimmed).map_err(|e| {
                                CoreError::Format {
                                    message: format!("malformed item JSON: {e}"),
                                }
                            })?;
                            items.push(item);
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
            return Err(classify_process_failure(status.code(), &joined));
        }
        Ok(items)
    }
}

#[async_trait]
impl Fetcher for ProcessFetcher {
    async fn list_channel_items(
        &self,
        source_url: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<Vec<FetchedItem>> {
        debug!(source_url, "listing channel items");
        let child = self.spawn(&["list", source_url]).await?;
        self.parse_json_lines(child, cancel).await
    }

    async fn fetch_item_metadata(
        &self,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> CoreResult<FetchedItem> {
        debug!(external_id, "fetching item metadata");
        let child = self.spawn(&["metadata", external_id]).await?;
        let mut items = self.parse_json_lines(child, cancel).await?;
        items.pop().ok_or_else(|| CoreError::NotFound {
            resource: "source item",
            id: external_id.to_string(),
        })
    }

    async fn fetch_item_media(
        &self,
        external_id: &str,
        output_path: &Path,
        progress: Option<ProgressSink>,
        cancel: &CancellationToken,
    ) -> CoreResult<PathBuf> {
        let output_str = output_path.to_string_lossy().to_string();
        debug!(external_id, output = %output_str, "fetching item media");
        let mut child = self
            .spawn(&["fetch", external_id, output_str.as_str()])
            .await?;
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let stderr_tail = Self::spawn_stderr_collector(stderr);

        let mut lines = BufReader::new(stdout).lines();
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
                            let trimmed = raw.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            if let Ok(p) = serde_json::from_str::<DownloadProgressLine>(trimmed) {
                                if let Some(sink) = &progress {
                                    let bytes = p.downloaded_bytes.unwrap_or(0);
                                    let fraction = match (p.downloaded_bytes, p.total_bytes) {
                                        (Some(b), Some(t)) if t > 0 => Some(b as f64 / t as f64),
                                        _ => None,
                                    };
                                    sink(Progress {
                                        bytes,
                                        total: p.total_bytes,
                                        fraction,
                                    });
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
            warn!(external_id, exit_code = ?status.code(), "fetch subprocess failed");
            return Err(classify_process_failure(status.code(), &joined));
        }
        Ok(output_path.to_path_buf())
    }
}
