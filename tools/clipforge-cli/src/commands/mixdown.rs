//! Mix a project's audio down to WAV.

use std::path::PathBuf;
use std::sync::Arc;

use clipforge_audio_mixer::{export_wav, AudioMixer, MixerConfig};
use clipforge_common::config::AppConfig;
use clipforge_render_engine::DecodeOptions;

use crate::project::LoadedProject;

pub async fn run(path: PathBuf, output: PathBuf, config: &AppConfig) -> anyhow::Result<()> {
    println!("Mixing down project at: {}", path.display());

    let project = LoadedProject::load(&path)?;
    let mixer_config = MixerConfig {
        sample_rate: config.export.audio_sample_rate,
        channels: config.export.audio_channels,
    };
    let media = project.load_media(DecodeOptions {
        sample_rate: mixer_config.sample_rate,
        channels: mixer_config.channels,
        video_fps: config.export.fps,
    })?;

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut mixer = AudioMixer::new(Arc::new(media), mixer_config);
    let frames = export_wav(&mut mixer, project.timeline(), &output, config.export.audio_chunk_ms)
        .await
        .map_err(|e| anyhow::anyhow!("Mixdown failed: {}", e.user_message()))?;

    println!(
        "Mixdown complete: {} ({:.2}s at {} Hz, {} channels)",
        output.display(),
        frames as f64 / mixer_config.sample_rate.max(1) as f64,
        mixer_config.sample_rate,
        mixer_config.channels
    );
    Ok(())
}
