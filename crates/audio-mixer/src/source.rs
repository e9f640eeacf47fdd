//! Decoded PCM and the sources that produce it.

use std::collections::HashMap;
use std::sync::Arc;

use clipforge_common::error::ClipforgeResult;

/// Interleaved `f32` PCM starting at a known source time.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmClip {
    pub sample_rate: u32,
    pub channels: u16,

    /// Source time (seconds) of the first frame in `samples`.
    pub start_time: f64,

    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
}

impl PcmClip {
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels,
            start_time: 0.0,
            samples,
        }
    }

    /// A clip holding `value` on every channel for `duration` seconds.
    pub fn constant(sample_rate: u32, channels: u16, duration: f64, value: f32) -> Self {
        let frames = (duration * sample_rate as f64).round().max(0.0) as usize;
        Self::new(sample_rate, channels, vec![value; frames * channels as usize])
    }

    /// A sine tone, the same on every channel.
    pub fn tone(sample_rate: u32, channels: u16, duration: f64, frequency: f64, amplitude: f32) -> Self {
        let frames = (duration * sample_rate as f64).round().max(0.0) as usize;
        let mut samples = Vec::with_capacity(frames * channels as usize);
        for frame in 0..frames {
            let t = frame as f64 / sample_rate as f64;
            let v = (std::f64::consts::TAU * frequency * t).sin() as f32 * amplitude;
            samples.extend(std::iter::repeat(v).take(channels as usize));
        }
        Self::new(sample_rate, channels, samples)
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at `frame` on `channel`; zero when out of range.
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        self.samples
            .get(frame * self.channels as usize + channel)
            .copied()
            .unwrap_or(0.0)
    }

    /// Copy of the frames covering `[start, end)` source seconds, plus one
    /// frame either side so interpolation at the edges has a neighbour.
    pub fn window(&self, start: f64, end: f64) -> PcmClip {
        let rate = self.sample_rate as f64;
        let frames = self.frames();
        let first = ((start - self.start_time) * rate).floor().max(0.0) as usize;
        let first = first.saturating_sub(1).min(frames);
        let last = (((end - self.start_time) * rate).ceil().max(0.0) as usize + 1).min(frames);
        let last = last.max(first);
        let ch = self.channels as usize;
        PcmClip {
            sample_rate: self.sample_rate,
            channels: self.channels,
            start_time: self.start_time + first as f64 / rate,
            samples: self.samples[first * ch..last * ch].to_vec(),
        }
    }
}

/// Something that can decode the audio of a media item.
///
/// Decoding is asynchronous: implementations may read files, spawn
/// decoders, or wait on a cache.
#[async_trait::async_trait]
pub trait AudioSource: Send + Sync {
    /// Decode `[start, end)` source seconds of `media_id`.
    ///
    /// `Ok(None)` means the media exists but has no audio.
    async fn decode(&self, media_id: &str, start: f64, end: f64) -> ClipforgeResult<Option<PcmClip>>;
}

/// Fully decoded clips held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAudioSource {
    clips: HashMap<String, Arc<PcmClip>>,
}

impl MemoryAudioSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, media_id: impl Into<String>, clip: PcmClip) {
        self.clips.insert(media_id.into(), Arc::new(clip));
    }

    pub fn with_clip(mut self, media_id: impl Into<String>, clip: PcmClip) -> Self {
        self.insert(media_id, clip);
        self
    }

    pub fn get(&self, media_id: &str) -> Option<&Arc<PcmClip>> {
        self.clips.get(media_id)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

#[async_trait::async_trait]
impl AudioSource for MemoryAudioSource {
    async fn decode(&self, media_id: &str, start: f64, end: f64) -> ClipforgeResult<Option<PcmClip>> {
        match self.clips.get(media_id) {
            Some(clip) => Ok(Some(clip.window(start, end))),
            None => Err(clipforge_common::error::ClipforgeError::audio(format!(
                "No audio loaded for media {media_id}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_clip_shape() {
        let clip = PcmClip::constant(48_000, 2, 0.5, 0.25);
        assert_eq!(clip.frames(), 24_000);
        assert_eq!(clip.samples.len(), 48_000);
        assert!((clip.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_keeps_neighbours_and_start_time() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let clip = PcmClip::new(10, 1, samples);
        let win = clip.window(2.0, 3.0);
        // Frames 19..=30 cover [2.0, 3.0) with one frame of margin each side.
        assert!((win.start_time - 1.9).abs() < 1e-9);
        assert_eq!(win.samples.first().copied(), Some(19.0));
        assert_eq!(win.samples.last().copied(), Some(30.0));
    }

    #[test]
    fn test_window_past_end_is_empty() {
        let clip = PcmClip::constant(10, 1, 1.0, 1.0);
        let win = clip.window(5.0, 6.0);
        assert!(win.samples.is_empty());
    }

    #[test]
    fn test_sample_out_of_range_is_silence() {
        let clip = PcmClip::constant(10, 2, 0.1, 0.5);
        assert_eq!(clip.sample(0, 1), 0.5);
        assert_eq!(clip.sample(1000, 0), 0.0);
    }

    #[tokio::test]
    async fn test_memory_source_unknown_media_errors() {
        let source = MemoryAudioSource::new().with_clip("tone", PcmClip::constant(10, 1, 1.0, 0.1));
        assert!(source.decode("tone", 0.0, 0.5).await.unwrap().is_some());
        assert!(source.decode("missing", 0.0, 0.5).await.is_err());
    }
}
