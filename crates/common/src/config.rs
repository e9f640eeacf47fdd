//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory exported files are written to when no output path is given.
    pub exports_dir: PathBuf,

    /// Default export parameters.
    pub export: ExportDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportDefaults {
    /// Container name (`mp4`, `webm`, `mov`).
    pub container: String,

    /// Video codec name (`h264`, `h265`, `vp8`, `vp9`).
    pub codec: String,

    /// Quality preset (`low`, `medium`, `high`).
    pub quality: String,

    /// Default FPS.
    pub fps: u32,

    /// Mixer output sample rate.
    pub audio_sample_rate: u32,

    /// Mixer output channel count.
    pub audio_channels: u16,

    /// How much video time accumulates before the next audio window is mixed.
    pub audio_chunk_ms: u32,

    /// Canvas background as hex (`#rrggbb`).
    pub background: String,

    /// Estimated working set above which a warning is logged.
    pub memory_warning_mb: u64,

    /// Estimated working set above which the export is refused.
    pub memory_limit_mb: u64,

    /// Encoder backend (`auto`, `ffmpeg`, `gstreamer`).
    pub backend: String,

    /// Frame pacing (`offline`, `realtime`).
    pub pacing: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "clipforge=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exports_dir: default_exports_dir(),
            export: ExportDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            container: "mp4".to_string(),
            codec: "h264".to_string(),
            quality: "high".to_string(),
            fps: 30,
            audio_sample_rate: 48_000,
            audio_channels: 2,
            audio_chunk_ms: 100,
            background: "#ffffff".to_string(),
            memory_warning_mb: 1000,
            memory_limit_mb: 4096,
            backend: "auto".to_string(),
            pacing: "offline".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("clipforge").join("config.json")
}

fn default_exports_dir() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Videos")
        });
    base.join("clipforge")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_export_section_fills_defaults() {
        let json = r#"{
            "exports_dir": "/tmp/out",
            "export": { "fps": 60, "container": "webm" },
            "logging": { "level": "debug", "json": true, "file": null }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.export.fps, 60);
        assert_eq!(config.export.container, "webm");
        assert_eq!(config.export.codec, "h264");
        assert_eq!(config.export.audio_chunk_ms, 100);
        assert!(config.logging.json);
    }

    #[test]
    fn test_default_memory_thresholds_are_ordered() {
        let defaults = ExportDefaults::default();
        assert!(defaults.memory_warning_mb < defaults.memory_limit_mb);
    }
}
