//! Minimal typed configuration (C13).
//!
//! This intentionally does not implement the outer layer's layered-YAML
//! configuration engine with environment-variable substitution — it is a
//! single TOML file with built-in defaults, following
//! the "read file if present, else write defaults and use them" pattern this
//! codebase already uses for its own config loader, plus a short list of
//! `std::env::var` overrides for the values an operator most often wants to
//! change without editing the file.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub download_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub poll_interval_secs: u64,
    pub refresh_interval_secs: u64,
    pub max_concurrent_downloads: u32,
    pub transcode: TranscodeSettings,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeSettings {
    pub audio_format: String,
    pub audio_bitrate: String,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub video_format: String,
    pub video_codec: String,
    pub video_quality: u32,
    pub threads: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./channelmirror.db".to_string(),
            download_dir: PathBuf::from("./downloads"),
            temp_dir: PathBuf::from("./tmp"),
            poll_interval_secs: 5,
            refresh_interval_secs: 3600,
            max_concurrent_downloads: 3,
            transcode: TranscodeSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for TranscodeSettings {
    fn default() -> Self {
        Self {
            audio_format: "mp3".to_string(),
            audio_bitrate: "128k".to_string(),
            audio_sample_rate: 44100,
            audio_channels: 2,
            video_format: "mp4".to_string(),
            video_codec: "h264".to_string(),
            video_quality: 23,
            threads: 2,
        }
    }
}

impl Settings {
    /// Loads settings from `path` if it exists, otherwise writes the
    /// built-in defaults there and uses them. Environment overrides are
    /// applied after the file load and before validation.
    pub fn load(path: &std::path::Path) -> CoreResult<Self> {
        let mut settings = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CoreError::fatal(format!("reading config {path:?}: {e}")))?;
            toml::from_str(&contents)
                .map_err(|e| CoreError::validation(format!("parsing config {path:?}: {e}")))?
        } else {
            let defaults = Self::default();
            let contents = toml::to_string_pretty(&defaults)
                .map_err(|e| CoreError::fatal(format!("serializing default config: {e}")))?;
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| CoreError::fatal(format!("creating config dir: {e}")))?;
                }
            }
            std::fs::write(path, contents)
                .map_err(|e| CoreError::fatal(format!("writing default config {path:?}: {e}")))?;
            defaults
        };

        settings.apply_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CHANNELMIRROR_DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(dir) = std::env::var("CHANNELMIRROR_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CHANNELMIRROR_TEMP_DIR") {
            self.temp_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("CHANNELMIRROR_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validates every constrained field; an invalid value is a
    /// `Validation` error raised before any worker starts.
    pub fn validate(&self) -> CoreResult<()> {
        if self.poll_interval_secs < 1 {
            return Err(CoreError::validation("poll_interval must be >= 1s"));
        }
        if self.refresh_interval_secs < 300 {
            return Err(CoreError::validation("refresh_interval must be >= 300s"));
        }
        if !(1..=10).contains(&self.max_concurrent_downloads) {
            return Err(CoreError::validation(
                "max_concurrent_downloads must be between 1 and 10",
            ));
        }
        self.transcode.validate()?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

impl TranscodeSettings {
    fn validate(&self) -> CoreResult<()> {
        if !["mp3", "aac", "ogg", "m4a"].contains(&self.audio_format.as_str()) {
            return Err(CoreError::validation(format!(
                "audio_format must be one of mp3/aac/ogg/m4a, got '{}'",
                self.audio_format
            )));
        }
        let bitrate_ok = {
            let s = self.audio_bitrate.as_str();
            let digits_end = s
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(s.len());
            let (digits, suffix) = s.split_at(digits_end);
            !digits.is_empty() && matches!(suffix, "k" | "K" | "m" | "M")
        };
        if !bitrate_ok {
            return Err(CoreError::validation(format!(
                "audio_bitrate must match ^\\d+[kKmM]$, got '{}'",
                self.audio_bitrate
            )));
        }
        if !(8000..=192000).contains(&self.audio_sample_rate) {
            return Err(CoreError::validation(
                "audio_sample_rate must be between 8000 and 192000",
            ));
        }
        if !["mp4", "mkv", "webm"].contains(&self.video_format.as_str()) {
            return Err(CoreError::validation(format!(
                "video_format must be one of mp4/mkv/webm, got '{}'",
                self.video_format
            )));
        }
        if !["h264", "h265", "vp9", "av1"].contains(&self.video_codec.as_str()) {
            return Err(CoreError::validation(format!(
                "video_codec must be one of h264/h265/vp9/av1, got '{}'",
                self.video_codec
            )));
        }
        if !(18..=51).contains(&self.video_quality) {
            return Err(CoreError::validation(
                "video_quality (CRF) must be between 18 and 51",
            ));
        }
        if !(1..=64).contains(&self.threads) {
            return Err(CoreError::validation("threads must be between 1 and 64"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_bitrate() {
        let mut s = Settings::default();
        s.transcode.audio_bitrate = "128".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_concurrency() {
        let mut s = Settings::default();
        s.max_concurrent_downloads = 0;
        assert!(s.validate().is_err());
        s.max_concurrent_downloads = 11;
        assert!(s.validate().is_err());
    }

    #[test]
    fn load_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(!path.exists());
        let settings = Settings::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(settings.max_concurrent_downloads, 3);
    }
}
