//! Export a project to video.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clipforge_audio_mixer::MixerConfig;
use clipforge_common::config::{AppConfig, ExportDefaults};
use clipforge_encoder::{BackendPreference, Capability};
use clipforge_render_engine::{
    parse_color, CancellationFlag, DecodeOptions, EngineOptions, ExportEngine, ExportOutcome, MemoryThresholds,
    Pacing,
};
use clipforge_timeline_model::{Container, ExportFormat, ExportQuality, ExportSettings, VideoCodec};

use crate::project::LoadedProject;

pub struct ExportArgs {
    pub path: PathBuf,
    pub output: Option<PathBuf>,
    pub container: Option<String>,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub render_fps: Option<u32>,
    pub quality: Option<String>,
    pub backend: Option<String>,
    pub realtime: bool,
}

pub async fn run(args: ExportArgs, config: &AppConfig) -> anyhow::Result<()> {
    println!("Exporting project at: {}", args.path.display());

    let project = LoadedProject::load(&args.path)?;
    let mut settings = build_settings(&args, &config.export)?;
    settings.filename = format!("{}_{}", project.name(), settings.filename);

    let preference: BackendPreference = args
        .backend
        .as_deref()
        .unwrap_or(&config.export.backend)
        .parse()
        .map_err(|e: clipforge_common::ClipforgeError| anyhow::anyhow!(e.user_message()))?;
    let capability = Capability::detect(preference);

    let mixer_config = MixerConfig {
        sample_rate: config.export.audio_sample_rate,
        channels: config.export.audio_channels,
    };
    let media = project.load_media(DecodeOptions {
        sample_rate: mixer_config.sample_rate,
        channels: mixer_config.channels,
        video_fps: settings.fps,
    })?;

    let mut options = EngineOptions {
        pacing: if args.realtime {
            Pacing::Realtime
        } else {
            config.export.pacing.parse().unwrap_or_default()
        },
        audio_chunk_ms: config.export.audio_chunk_ms,
        thresholds: MemoryThresholds {
            warning_mb: config.export.memory_warning_mb,
            limit_mb: config.export.memory_limit_mb,
        },
        ..EngineOptions::default()
    };
    match parse_color(&config.export.background) {
        Some(color) => options.background = color,
        None => tracing::warn!(background = %config.export.background, "Unknown background colour; using white"),
    }

    println!("  Backend: {}", capability.backend_name());
    println!("  Format: {}", settings.format);
    println!("  Resolution: {}x{} @ {}fps", settings.width, settings.height, settings.fps);

    let mut engine = ExportEngine::with_mixer_config(capability, Arc::new(media), mixer_config, options);

    let cancel = CancellationFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nCancelling export...");
            on_signal.cancel();
        }
    });

    let outcome = engine
        .run(project.timeline(), &settings, &cancel, |p| {
            print!(
                "\r  Progress: {:.1}% ({}/{} frames, ETA: {:.0}s)  ",
                p.progress * 100.0,
                p.frame_index + 1,
                p.total_frames,
                p.eta_secs,
            );
            let _ = std::io::stdout().flush();
        })
        .await;

    match outcome {
        Ok(ExportOutcome::Completed(media)) => {
            let output_path = args
                .output
                .unwrap_or_else(|| config.exports_dir.join(&media.filename));
            if let Some(parent) = output_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output_path, &media.data)?;
            println!("\nExport complete: {}", output_path.display());
            println!(
                "  {} frames ({} repeated), {} bytes, {}",
                media.total_frames,
                media.stats.frames_duplicated,
                media.data.len(),
                media.mime
            );
            if media.skipped_elements > 0 {
                println!("  {} element draws were skipped; see the log", media.skipped_elements);
            }
            Ok(())
        }
        Ok(ExportOutcome::Cancelled) => {
            println!("\nExport cancelled.");
            Ok(())
        }
        Err(e) => {
            println!();
            Err(anyhow::anyhow!("Export failed: {}", e.user_message()))
        }
    }
}

/// Export settings from the flags, falling back to the configured defaults.
fn build_settings(args: &ExportArgs, defaults: &ExportDefaults) -> anyhow::Result<ExportSettings> {
    let container: Container = args
        .container
        .as_deref()
        .unwrap_or(&defaults.container)
        .parse()?;
    let codec: VideoCodec = match (&args.codec, &args.container) {
        (Some(codec), _) => codec.parse()?,
        // A container chosen on the command line gets its own default codec.
        (None, Some(_)) => container.default_codec(),
        (None, None) => defaults.codec.parse()?,
    };
    if !container.carries(codec) {
        anyhow::bail!("{container} cannot carry {codec}");
    }
    let quality: ExportQuality = args.quality.as_deref().unwrap_or(&defaults.quality).parse()?;
    let fps = args.fps.unwrap_or(defaults.fps);

    let mut settings = ExportSettings::from_quality(ExportFormat::new(container, codec), quality, fps);
    if let Some(width) = args.width {
        settings.width = width;
    }
    if let Some(height) = args.height {
        settings.height = height;
    }
    settings.render_fps = args.render_fps;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ExportArgs {
        ExportArgs {
            path: PathBuf::from("demo.json"),
            output: None,
            container: None,
            codec: None,
            width: None,
            height: None,
            fps: None,
            render_fps: None,
            quality: None,
            backend: None,
            realtime: false,
        }
    }

    #[test]
    fn test_defaults_apply() {
        let settings = build_settings(&args(), &ExportDefaults::default()).unwrap();
        assert_eq!(settings.format, ExportFormat::new(Container::Mp4, VideoCodec::H264));
        assert_eq!((settings.width, settings.height, settings.fps), (1920, 1080, 30));
    }

    #[test]
    fn test_container_flag_picks_its_codec() {
        let mut a = args();
        a.container = Some("webm".to_string());
        a.quality = Some("low".to_string());
        a.width = Some(640);
        let settings = build_settings(&a, &ExportDefaults::default()).unwrap();
        assert_eq!(settings.format, ExportFormat::for_container(Container::Webm));
        assert_eq!((settings.width, settings.height), (640, 480));
    }

    #[test]
    fn test_mismatched_codec_rejected() {
        let mut a = args();
        a.container = Some("mp4".to_string());
        a.codec = Some("vp9".to_string());
        assert!(build_settings(&a, &ExportDefaults::default()).is_err());
    }

    #[test]
    fn test_render_fps_above_fps_rejected() {
        let mut a = args();
        a.fps = Some(24);
        a.render_fps = Some(30);
        assert!(build_settings(&a, &ExportDefaults::default()).is_err());
    }
}
