//! Export orchestration: the frame loop that drives capture, compositing,
//! mixing and encoding.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clipforge_audio_mixer::{AudioMixer, MixerConfig};
use clipforge_common::clock::{BudgetStatus, DriftMeasurement, ExportClock, FrameBudget};
use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_encoder::{AudioChunk, Capability, Encoder, EncoderStats, FrameOrigin, VideoFrame};
use clipforge_timeline_model::{ExportSettings, Timeline};
use resvg::tiny_skia::Color;
use serde::{Deserialize, Serialize};

use crate::capture::FrameCaptureService;
use crate::compositor::CanvasCompositor;
use crate::media::MediaLibrary;
use crate::preflight::{check_compatibility, estimate_memory, MemoryThresholds};
use crate::surface::Surface;

/// A/V drift above this is logged as a warning.
const DRIFT_WARN_MS: f64 = 5.0;

/// How the frame loop is paced against the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pacing {
    /// As fast as frames can be produced.
    #[default]
    Offline,
    /// One frame per frame interval, like a display refresh loop.
    Realtime,
}

impl FromStr for Pacing {
    type Err = ClipforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "offline" => Ok(Pacing::Offline),
            "realtime" | "real-time" => Ok(Pacing::Realtime),
            other => Err(ClipforgeError::config(format!("Unknown pacing: {other}"))),
        }
    }
}

impl fmt::Display for Pacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Pacing::Offline => "offline",
            Pacing::Realtime => "realtime",
        })
    }
}

/// Tunables for an [`ExportEngine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    pub pacing: Pacing,

    /// Minimum video time between audio pushes.
    pub audio_chunk_ms: u32,

    pub background: Color,

    pub thresholds: MemoryThresholds,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            pacing: Pacing::Offline,
            audio_chunk_ms: 100,
            background: Color::WHITE,
            thresholds: MemoryThresholds::default(),
        }
    }
}

/// Cooperative cancellation, checked once per frame.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Stages reported through [`ExportProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportStage {
    Rendering,
    /// The last frame has been pushed; the container is being finalized.
    Finalizing,
}

/// Export progress report, sent once per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Index of the frame just pushed.
    pub frame_index: u64,

    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    pub stage: ExportStage,
}

/// A finished export.
#[derive(Debug, Clone)]
pub struct ExportedMedia {
    pub data: Vec<u8>,
    /// MIME type actually produced.
    pub mime: String,
    /// Suggested file name, with the produced container's extension.
    pub filename: String,
    pub total_frames: u64,
    pub stats: EncoderStats,
    /// Element draws skipped across all frames.
    pub skipped_elements: u64,
}

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(ExportedMedia),
    Cancelled,
}

impl ExportOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportOutcome::Cancelled)
    }

    pub fn into_media(self) -> Option<ExportedMedia> {
        match self {
            ExportOutcome::Completed(media) => Some(media),
            ExportOutcome::Cancelled => None,
        }
    }
}

/// End of video frame `n` as an audio sample index: `round(n * rate / fps)`.
pub fn frame_end_sample(n: u64, sample_rate: u32, fps: u32) -> u64 {
    if fps == 0 {
        return 0;
    }
    let fps = fps as u128;
    ((n as u128 * sample_rate as u128 * 2 + fps) / (2 * fps)) as u64
}

/// Releases encoder and mixer resources on every exit path.
struct ExportGuard<'a> {
    encoder: &'a mut Encoder,
    mixer: &'a mut AudioMixer,
    compositor: &'a mut CanvasCompositor,
}

impl Drop for ExportGuard<'_> {
    fn drop(&mut self) {
        self.encoder.cleanup();
        self.mixer.release();
        self.compositor.release();
    }
}

/// Drives one timeline through the compositor, mixer and encoder.
pub struct ExportEngine {
    encoder: Encoder,
    compositor: CanvasCompositor,
    mixer: AudioMixer,
    options: EngineOptions,
}

impl ExportEngine {
    /// Engine over `media` at 48 kHz stereo.
    pub fn new(capability: Capability, media: Arc<MediaLibrary>, options: EngineOptions) -> Self {
        Self::with_mixer_config(capability, media, MixerConfig::default(), options)
    }

    pub fn with_mixer_config(
        capability: Capability,
        media: Arc<MediaLibrary>,
        mixer_config: MixerConfig,
        options: EngineOptions,
    ) -> Self {
        let encoder = Encoder::new(capability).with_audio_format(mixer_config.sample_rate, mixer_config.channels);
        let compositor = CanvasCompositor::new(media.clone()).with_background(options.background);
        let mixer = AudioMixer::new(media, mixer_config);
        Self::from_parts(encoder, compositor, mixer, options)
    }

    /// Assemble an engine from parts. The encoder's audio format must
    /// match the mixer's.
    pub fn from_parts(encoder: Encoder, compositor: CanvasCompositor, mixer: AudioMixer, options: EngineOptions) -> Self {
        Self {
            encoder,
            compositor,
            mixer,
            options,
        }
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Render, mix and encode the whole timeline.
    ///
    /// `on_progress` is called exactly once per frame with increasing
    /// frame indices. Failures are logged here; the returned error carries
    /// the user-facing message.
    pub async fn run<F>(
        &mut self,
        timeline: &Timeline,
        settings: &ExportSettings,
        cancel: &CancellationFlag,
        on_progress: F,
    ) -> ClipforgeResult<ExportOutcome>
    where
        F: FnMut(ExportProgress),
    {
        let result = self.run_inner(timeline, settings, cancel, on_progress).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, filename = %settings.filename, "Export failed");
        }
        result
    }

    async fn run_inner<F>(
        &mut self,
        timeline: &Timeline,
        settings: &ExportSettings,
        cancel: &CancellationFlag,
        mut on_progress: F,
    ) -> ClipforgeResult<ExportOutcome>
    where
        F: FnMut(ExportProgress),
    {
        let timeline = timeline.clone();
        settings
            .validate()
            .map_err(|e| ClipforgeError::config(e.to_string()))?;
        let duration = timeline.total_duration();
        if timeline.is_empty() || duration <= 0.0 {
            return Err(ClipforgeError::timeline("Timeline has nothing to export"));
        }

        let report = check_compatibility(self.encoder.capability(), settings);
        if !report.supported {
            return Err(ClipforgeError::unsupported_format(report.issues.join("; ")));
        }

        let mixer_config = self.mixer.config();
        let estimate = estimate_memory(
            settings,
            duration,
            self.options.audio_chunk_ms as f64 / 1000.0,
            mixer_config.sample_rate,
            mixer_config.channels,
            self.options.thresholds,
        );
        if estimate.exceeds_limit {
            return Err(ClipforgeError::resource_exhaustion(format!(
                "Export needs about {:.0} MB, above the {} MB limit",
                estimate.estimated_mb, self.options.thresholds.limit_mb
            )));
        }
        if let Some(warning) = &estimate.warning {
            tracing::warn!(estimated_mb = estimate.estimated_mb, "{warning}");
        }

        let fps = settings.fps;
        let total_frames = FrameCaptureService::total_frames(duration, fps);
        let mut surface = Surface::new(settings.width, settings.height)?;
        let mut rgba = Vec::with_capacity(surface.data().len());

        let negotiated = self.encoder.start(settings).await?;
        let guard = ExportGuard {
            encoder: &mut self.encoder,
            mixer: &mut self.mixer,
            compositor: &mut self.compositor,
        };

        tracing::info!(
            total_frames,
            fps,
            width = settings.width,
            height = settings.height,
            duration_secs = duration,
            mime = %negotiated.mime,
            pacing = %self.options.pacing,
            "Starting export"
        );

        let render_fps = settings.render_fps.unwrap_or(fps);
        let rate = mixer_config.sample_rate;
        let chunk_samples = (rate as u64 * self.options.audio_chunk_ms as u64) / 1000;
        let clock = ExportClock::start();
        let mut budget = FrameBudget::new(fps);
        let mut last_render: Option<u64> = None;
        let mut audio_cursor = 0u64;
        let mut skipped_elements = 0u64;

        for i in 0..total_frames {
            if cancel.is_cancelled() {
                tracing::info!(frame = i, total_frames, "Export cancelled");
                if let Err(e) = guard.encoder.stop().await {
                    tracing::warn!(error = %e, "Encoder did not stop cleanly after cancel");
                }
                return Ok(ExportOutcome::Cancelled);
            }

            let render_index = (i as u128 * render_fps as u128 / fps as u128) as u64;
            let origin = if last_render == Some(render_index) {
                FrameOrigin::Duplicate
            } else {
                let t = FrameCaptureService::frame_time(render_index, render_fps);
                let snapshot = FrameCaptureService::snapshot(&timeline, t);
                let report = guard.compositor.render(&snapshot, &mut surface);
                skipped_elements += report.skipped.len() as u64;
                surface.write_rgba(&mut rgba);
                last_render = Some(render_index);
                FrameOrigin::Rendered
            };

            guard.encoder.capture_frame(VideoFrame {
                index: i,
                origin,
                data: &rgba,
            })?;

            let is_last = i + 1 == total_frames;
            let video_end = frame_end_sample(i + 1, rate, fps);
            if video_end > audio_cursor && (is_last || video_end - audio_cursor >= chunk_samples) {
                let buffer = guard.mixer.mix_samples(&timeline, audio_cursor, video_end).await?;
                guard.encoder.push_audio(AudioChunk {
                    samples: &buffer.samples,
                })?;
                audio_cursor = video_end;

                let drift = DriftMeasurement {
                    reference_ns: budget.frame_start_ns(i + 1),
                    measured_ns: (audio_cursor as u128 * 1_000_000_000 / rate.max(1) as u128) as u64,
                };
                if drift.exceeds_threshold_ms(DRIFT_WARN_MS) {
                    tracing::warn!(frame = i, drift_ms = drift.drift_ms(), "A/V drift");
                } else {
                    tracing::trace!(frame = i, drift_ms = drift.drift_ms(), "Audio pushed");
                }
            }

            guard.encoder.poll_events()?;

            let elapsed_ns = clock.elapsed_ns();
            if let BudgetStatus::Overrun { late_ns } = budget.record(i, elapsed_ns) {
                tracing::trace!(frame = i, late_ms = late_ns as f64 / 1_000_000.0, "Frame over budget");
            }

            let done = i + 1;
            let elapsed = ExportClock::ns_to_secs(elapsed_ns);
            on_progress(ExportProgress {
                progress: done as f64 / total_frames as f64,
                frame_index: i,
                total_frames,
                eta_secs: elapsed / done as f64 * (total_frames - done) as f64,
                stage: if is_last {
                    ExportStage::Finalizing
                } else {
                    ExportStage::Rendering
                },
            });

            if self.options.pacing == Pacing::Realtime {
                let deadline = clock.instant_at(budget.deadline_ns(i));
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            }
        }

        if budget.overruns() > 0 {
            tracing::warn!(
                overruns = budget.overruns(),
                worst_late_ms = budget.worst_late_ms(),
                "Frames exceeded their real-time budget"
            );
        }

        let output = guard.encoder.stop().await?;
        drop(guard);

        tracing::info!(
            frames = total_frames,
            bytes = output.data.len(),
            skipped_elements,
            started_at = clock.epoch_wall(),
            elapsed_secs = clock.elapsed_secs(),
            "Export finished"
        );

        Ok(ExportOutcome::Completed(ExportedMedia {
            filename: settings.output_filename(output.mime.container),
            mime: output.mime.to_string(),
            data: output.data,
            total_frames,
            stats: output.stats,
            skipped_elements,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_end_sample_rounds() {
        assert_eq!(frame_end_sample(0, 48_000, 30), 0);
        assert_eq!(frame_end_sample(1, 48_000, 30), 1_600);
        assert_eq!(frame_end_sample(150, 48_000, 30), 240_000);
        // 44100 / 60 = 735 exactly; 44100 / 24 = 1837.5 rounds up.
        assert_eq!(frame_end_sample(1, 44_100, 60), 735);
        assert_eq!(frame_end_sample(1, 44_100, 24), 1_838);
        assert_eq!(frame_end_sample(2, 44_100, 24), 3_675);
        assert_eq!(frame_end_sample(5, 48_000, 0), 0);
    }

    #[test]
    fn test_frame_end_sample_is_monotonic() {
        let mut prev = 0;
        for n in 0..1000 {
            let s = frame_end_sample(n, 44_100, 29);
            assert!(s >= prev);
            prev = s;
        }
    }

    #[test]
    fn test_pacing_parse() {
        assert_eq!("offline".parse::<Pacing>().unwrap(), Pacing::Offline);
        assert_eq!("Realtime".parse::<Pacing>().unwrap(), Pacing::Realtime);
        assert!("warp".parse::<Pacing>().is_err());
        assert_eq!(Pacing::Realtime.to_string(), "realtime");
    }

    #[test]
    fn test_cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let other = flag.clone();
        assert!(!flag.is_cancelled());
        other.cancel();
        assert!(flag.is_cancelled());
    }
}
