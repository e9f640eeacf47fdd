//! Show project information.

use std::path::PathBuf;

use clipforge_common::config::AppConfig;
use clipforge_render_engine::{estimate_memory, FrameCaptureService, MemoryThresholds};
use clipforge_timeline_model::{Container, ExportFormat, ExportQuality, ExportSettings, TrackKind, VideoCodec};

use crate::project::LoadedProject;

pub fn run(path: PathBuf, config: &AppConfig) -> anyhow::Result<()> {
    let project = LoadedProject::load(&path)?;
    let timeline = project.timeline();
    let duration = timeline.total_duration();

    println!("Project: {}", project.name());
    println!("  File: {}", path.display());
    println!();

    println!("Tracks:");
    for (i, track) in timeline.tracks.iter().enumerate() {
        let kind = match track.kind {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        };
        println!(
            "  [{i}] {} ({kind}{}): {} elements, ends at {:.2}s",
            track.id,
            if track.muted { ", muted" } else { "" },
            track.elements.len(),
            track.end_time()
        );
        for el in &track.elements {
            println!(
                "       {} {} {:.2}s..{:.2}s",
                el.kind_name(),
                el.id,
                el.start_time,
                el.end_time()
            );
        }
    }
    println!();

    println!("Media:");
    for (id, media_path) in project.media_paths() {
        let marker = if media_path.exists() { "" } else { " (missing)" };
        println!("  {id}: {}{marker}", media_path.display());
    }
    println!();

    let format = match (
        config.export.container.parse::<Container>(),
        config.export.codec.parse::<VideoCodec>(),
    ) {
        (Ok(container), Ok(codec)) if container.carries(codec) => ExportFormat::new(container, codec),
        _ => ExportFormat::default(),
    };
    let quality: ExportQuality = config.export.quality.parse().unwrap_or_default();
    let settings = ExportSettings::from_quality(format, quality, config.export.fps);
    let estimate = estimate_memory(
        &settings,
        duration,
        config.export.audio_chunk_ms as f64 / 1000.0,
        config.export.audio_sample_rate,
        config.export.audio_channels,
        MemoryThresholds {
            warning_mb: config.export.memory_warning_mb,
            limit_mb: config.export.memory_limit_mb,
        },
    );

    println!("Export:");
    println!("  Duration: {duration:.2}s");
    println!(
        "  Frames: {} at {}fps",
        FrameCaptureService::total_frames(duration, settings.fps),
        settings.fps
    );
    println!(
        "  Memory estimate: {:.0} MB at {}x{}",
        estimate.estimated_mb, settings.width, settings.height
    );
    if let Some(warning) = &estimate.warning {
        println!("  [WARN] {warning}");
    }
    println!();

    let issues = timeline.validate();
    if issues.is_empty() {
        println!("Validation: OK");
    } else {
        println!("Validation: {} issue(s)", issues.len());
        for issue in &issues {
            println!("  - {issue}");
        }
    }

    Ok(())
}
