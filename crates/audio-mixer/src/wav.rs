//! WAV input and mixdown output.

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::Timeline;
use tracing::info;

use crate::mixer::{AudioMixBuffer, AudioMixer};
use crate::source::PcmClip;

/// Incremental 16-bit PCM WAV writer.
pub struct WavSink {
    writer: hound::WavWriter<BufWriter<fs::File>>,
    channels: u16,
    frames: u64,
}

impl WavSink {
    pub fn create(path: &Path, sample_rate: u32, channels: u16) -> ClipforgeResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(path, spec).map_err(|e| {
            ClipforgeError::audio(format!("Failed to create WAV file {}: {e}", path.display()))
        })?;
        Ok(Self {
            writer,
            channels,
            frames: 0,
        })
    }

    pub fn write(&mut self, buffer: &AudioMixBuffer) -> ClipforgeResult<()> {
        if buffer.channels != self.channels {
            return Err(ClipforgeError::audio(format!(
                "WAV sink expects {} channels, got {}",
                self.channels, buffer.channels
            )));
        }
        for sample in buffer.to_i16() {
            self.writer
                .write_sample(sample)
                .map_err(|e| ClipforgeError::audio(format!("Failed to write WAV sample: {e}")))?;
        }
        self.frames += buffer.frames() as u64;
        Ok(())
    }

    /// Frames written so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn finalize(self) -> ClipforgeResult<u64> {
        self.writer
            .finalize()
            .map_err(|e| ClipforgeError::audio(format!("Failed to finalize WAV file: {e}")))?;
        Ok(self.frames)
    }
}

/// Mix the whole timeline into a WAV file, `chunk_ms` at a time.
///
/// Returns the number of frames written.
#[tracing::instrument(skip(mixer, timeline), fields(path = %path.display()))]
pub async fn export_wav(
    mixer: &mut AudioMixer,
    timeline: &Timeline,
    path: &Path,
    chunk_ms: u32,
) -> ClipforgeResult<u64> {
    let config = mixer.config();
    let total = config.sample_at(timeline.total_duration());
    let step = (config.sample_rate as u64 * chunk_ms.max(1) as u64 / 1000).max(1);

    let mut sink = WavSink::create(path, config.sample_rate, config.channels)?;
    let mut cursor = 0u64;
    while cursor < total {
        let next = (cursor + step).min(total);
        let buffer = mixer.mix_samples(timeline, cursor, next).await?;
        sink.write(&buffer)?;
        cursor = next;
    }
    mixer.release();

    let frames = sink.finalize()?;
    info!(frames, "WAV mixdown completed");
    Ok(frames)
}

/// Read a WAV file as `f32` PCM.
pub fn read_wav(path: &Path) -> ClipforgeResult<PcmClip> {
    if !path.exists() {
        return Err(ClipforgeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let reader = hound::WavReader::open(path)
        .map_err(|e| ClipforgeError::audio(format!("Failed to open WAV {}: {e}", path.display())))?;
    let spec = reader.spec();

    let samples: Result<Vec<f32>, hound::Error> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect()
        }
    };
    let samples = samples
        .map_err(|e| ClipforgeError::audio(format!("Failed to decode WAV {}: {e}", path.display())))?;

    Ok(PcmClip::new(spec.sample_rate, spec.channels, samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::MixerConfig;
    use crate::source::MemoryAudioSource;
    use clipforge_timeline_model::{Element, Track, TrackKind};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_export_wav_roundtrip_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix").join("out.wav");

        let timeline = Timeline::new().with_track(
            Track::new("a1", TrackKind::Audio).with_element(Element::audio("a", "tone", 0.0, 1.5, 1.0)),
        );
        let source = MemoryAudioSource::new().with_clip("tone", PcmClip::constant(48_000, 2, 2.0, 0.5));
        let mut mixer = AudioMixer::new(Arc::new(source), MixerConfig::default());

        let frames = export_wav(&mut mixer, &timeline, &path, 100).await.unwrap();
        assert_eq!(frames, 72_000);

        let clip = read_wav(&path).unwrap();
        assert_eq!(clip.sample_rate, 48_000);
        assert_eq!(clip.channels, 2);
        assert_eq!(clip.frames(), 72_000);
        assert!(clip.samples.iter().all(|s| (s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_read_missing_wav() {
        let err = read_wav(Path::new("/nonexistent/clip.wav")).unwrap_err();
        assert!(matches!(err, ClipforgeError::FileNotFound { .. }));
    }

    #[test]
    fn test_sink_rejects_channel_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavSink::create(&dir.path().join("x.wav"), 48_000, 2).unwrap();
        let mono = AudioMixBuffer {
            sample_rate: 48_000,
            channels: 1,
            start_sample: 0,
            samples: vec![0.0; 10],
        };
        assert!(sink.write(&mono).is_err());
    }
}
