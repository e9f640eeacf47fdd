//! Checks run before an export allocates anything.

use clipforge_encoder::format::AUDIO_BITRATE;
use clipforge_encoder::{derive_bitrate, Capability};
use clipforge_timeline_model::ExportSettings;
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Full RGBA frames resident at once: the surface, the straight-alpha
/// copy, and the frame queued in the backend.
const RESIDENT_FRAMES: f64 = 3.0;

/// Whether the platform can produce the requested output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub supported: bool,
    pub issues: Vec<String>,
    /// MIME type negotiation would pick.
    pub mime: Option<String>,
}

/// Memory thresholds in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    pub warning_mb: u64,
    pub limit_mb: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning_mb: 1000,
            limit_mb: 4096,
        }
    }
}

/// Estimated peak resident memory of an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEstimate {
    pub estimated_mb: f64,
    pub warning: Option<String>,
    pub exceeds_limit: bool,
}

/// Check the backend and settings without opening anything.
pub fn check_compatibility(capability: &Capability, settings: &ExportSettings) -> CompatibilityReport {
    let mut issues = Vec::new();

    if let Capability::Unsupported { reason } = capability {
        issues.push(format!("No encoder available: {reason}"));
    }
    if let Err(e) = settings.validate() {
        issues.push(e.to_string());
    }

    let mime = if capability.is_supported() {
        match capability.negotiate(settings.format) {
            Ok((mime, _)) => Some(mime.to_string()),
            Err(e) => {
                issues.push(e.to_string());
                None
            }
        }
    } else {
        None
    };

    CompatibilityReport {
        supported: issues.is_empty(),
        issues,
        mime,
    }
}

/// Estimate the export's working set.
///
/// Counts the resident frames, the encoder's single output buffer at
/// the derived bitrate plus audio, and one audio window of `f32` samples.
pub fn estimate_memory(
    settings: &ExportSettings,
    duration_secs: f64,
    audio_window_secs: f64,
    sample_rate: u32,
    channels: u16,
    thresholds: MemoryThresholds,
) -> MemoryEstimate {
    let duration = if duration_secs.is_finite() {
        duration_secs.max(0.0)
    } else {
        0.0
    };

    let frames = settings.pixel_count() as f64 * 4.0 * RESIDENT_FRAMES;
    let video_bitrate = derive_bitrate(
        settings.width,
        settings.height,
        settings.fps,
        settings.quality,
        settings.bitrate_hint,
    );
    let encoded = (video_bitrate + AUDIO_BITRATE) as f64 * duration / 8.0;
    let audio = sample_rate as f64 * channels as f64 * 4.0 * audio_window_secs.max(0.0);

    let estimated_mb = (frames + encoded + audio) / BYTES_PER_MB;
    let exceeds_limit = estimated_mb > thresholds.limit_mb as f64;
    let warning = if exceeds_limit {
        Some(format!(
            "Export needs about {estimated_mb:.0} MB, above the {} MB limit",
            thresholds.limit_mb
        ))
    } else if estimated_mb > thresholds.warning_mb as f64 {
        Some(format!(
            "Export needs about {estimated_mb:.0} MB; consider a lower resolution or shorter range"
        ))
    } else {
        None
    };

    MemoryEstimate {
        estimated_mb,
        warning,
        exceeds_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_encoder::backend::MemoryBackend;
    use clipforge_timeline_model::{Container, ExportFormat, ExportQuality, VideoCodec};

    #[test]
    fn test_unsupported_capability() {
        let cap = Capability::Unsupported {
            reason: "ffmpeg not found".into(),
        };
        let report = check_compatibility(&cap, &ExportSettings::default());
        assert!(!report.supported);
        assert!(report.issues[0].contains("ffmpeg not found"));
        assert!(report.mime.is_none());
    }

    #[test]
    fn test_supported_reports_mime() {
        let cap = Capability::supported(MemoryBackend::new());
        let report = check_compatibility(&cap, &ExportSettings::default());
        assert!(report.supported, "{:?}", report.issues);
        assert_eq!(report.mime.as_deref(), Some("video/mp4; codecs=h264"));
    }

    #[test]
    fn test_container_without_codec_is_issue() {
        let cap = Capability::supported(MemoryBackend::new().only_container(Container::Webm));
        let mut settings = ExportSettings::default();
        settings.format = ExportFormat::new(Container::Mp4, VideoCodec::H264);
        let report = check_compatibility(&cap, &settings);
        assert!(!report.supported);
        assert!(report.mime.is_none());
    }

    #[test]
    fn test_invalid_settings_is_issue() {
        let cap = Capability::supported(MemoryBackend::new());
        let settings = ExportSettings::default().with_size(0, 0);
        let report = check_compatibility(&cap, &settings);
        assert!(!report.supported);
    }

    #[test]
    fn test_small_export_has_no_warning() {
        let settings = ExportSettings::default().with_size(640, 360);
        let est = estimate_memory(&settings, 5.0, 0.1, 48_000, 2, MemoryThresholds::default());
        assert!(est.estimated_mb > 0.0 && est.estimated_mb < 50.0);
        assert!(est.warning.is_none());
        assert!(!est.exceeds_limit);
    }

    #[test]
    fn test_long_4k_export_warns_then_fails() {
        let mut settings = ExportSettings::from_quality(ExportFormat::default(), ExportQuality::High, 60)
            .with_size(3840, 2160);
        settings.bitrate_hint = None;
        let hour = estimate_memory(&settings, 3600.0, 0.1, 48_000, 2, MemoryThresholds::default());
        assert!(hour.warning.is_some());
        assert!(hour.exceeds_limit);

        let tight = MemoryThresholds {
            warning_mb: 1,
            limit_mb: 100_000,
        };
        let short = estimate_memory(&settings, 10.0, 0.1, 48_000, 2, tight);
        assert!(short.warning.is_some());
        assert!(!short.exceeds_limit);
    }

    #[test]
    fn test_estimate_grows_with_duration() {
        let settings = ExportSettings::default();
        let a = estimate_memory(&settings, 10.0, 0.1, 48_000, 2, MemoryThresholds::default());
        let b = estimate_memory(&settings, 20.0, 0.1, 48_000, 2, MemoryThresholds::default());
        assert!(b.estimated_mb > a.estimated_mb);
        let nan = estimate_memory(&settings, f64::NAN, 0.1, 48_000, 2, MemoryThresholds::default());
        assert!(nan.estimated_mb.is_finite());
    }
}
