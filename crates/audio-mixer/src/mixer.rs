//! Timeline audio mixdown.
//!
//! The mixer walks every audio-carrying element on the timeline, decodes
//! the part that overlaps the requested window, and sums it into a shared
//! `f64` bus before clamping to `[-1.0, 1.0]`. Windows are addressed in
//! output samples so consecutive calls tile without gaps or overlap.

use std::sync::Arc;

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{Element, Timeline};
use serde::{Deserialize, Serialize};

use crate::resample::{accumulate, channel_gains, Placement};
use crate::source::AudioSource;

/// Output format of the mix bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixerConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl MixerConfig {
    /// Output sample index nearest to timeline time `t`.
    pub fn sample_at(&self, t: f64) -> u64 {
        (t.max(0.0) * self.sample_rate as f64).round() as u64
    }
}

/// One mixed window of interleaved PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioMixBuffer {
    pub sample_rate: u32,
    pub channels: u16,

    /// Index of the first frame of this window on the timeline.
    pub start_sample: u64,

    /// Interleaved samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
}

impl AudioMixBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Timeline time of the first frame.
    pub fn start_time(&self) -> f64 {
        self.start_sample as f64 / self.sample_rate.max(1) as f64
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|s| *s == 0.0)
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }

    /// Samples as signed 16-bit PCM.
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16)
            .collect()
    }
}

/// Mixes timeline audio on demand.
pub struct AudioMixer {
    source: Arc<dyn AudioSource>,
    config: MixerConfig,
    scratch: Vec<f64>,
}

impl AudioMixer {
    pub fn new(source: Arc<dyn AudioSource>, config: MixerConfig) -> Self {
        Self {
            source,
            config,
            scratch: Vec::new(),
        }
    }

    pub fn config(&self) -> MixerConfig {
        self.config
    }

    /// Mix `[start_secs, end_secs)` of the timeline.
    pub async fn mix(
        &mut self,
        timeline: &Timeline,
        start_secs: f64,
        end_secs: f64,
    ) -> ClipforgeResult<AudioMixBuffer> {
        if !start_secs.is_finite() || !end_secs.is_finite() {
            return Err(ClipforgeError::audio(format!(
                "Mix window [{start_secs}, {end_secs}) is not finite"
            )));
        }
        if start_secs < 0.0 || end_secs < start_secs {
            return Err(ClipforgeError::audio(format!(
                "Mix window [{start_secs}, {end_secs}) is out of order"
            )));
        }
        let start = self.config.sample_at(start_secs);
        let end = self.config.sample_at(end_secs);
        self.mix_samples(timeline, start, end).await
    }

    /// Mix output frames `[start_sample, end_sample)`.
    ///
    /// Elements whose audio cannot be decoded contribute silence; the
    /// failure is logged and the rest of the mix proceeds.
    pub async fn mix_samples(
        &mut self,
        timeline: &Timeline,
        start_sample: u64,
        end_sample: u64,
    ) -> ClipforgeResult<AudioMixBuffer> {
        if end_sample < start_sample {
            return Err(ClipforgeError::audio(format!(
                "Mix window [{start_sample}, {end_sample}) is out of order"
            )));
        }

        let channels = self.config.channels;
        let rate = self.config.sample_rate;
        let frames = (end_sample - start_sample) as usize;
        self.scratch.clear();
        self.scratch.resize(frames * channels as usize, 0.0);

        if frames == 0 || channels == 0 || rate == 0 {
            return Ok(self.finish_buffer(start_sample));
        }

        for track in &timeline.tracks {
            for element in &track.elements {
                let Some(audio) = element.audio_params() else {
                    continue;
                };
                if track.muted || audio.muted {
                    continue;
                }
                let volume = if audio.volume.is_finite() { audio.volume.max(0.0) } else { 0.0 };
                if volume == 0.0 {
                    continue;
                }

                let Some((from, to)) = self.element_overlap(element, start_sample, end_sample) else {
                    continue;
                };
                let el_start = self.config.sample_at(element.start_time);
                let source_start = element.trim_start + (from - el_start) as f64 / rate as f64;
                let source_end = source_start + (to - from) as f64 / rate as f64;

                let clip = match self.source.decode(audio.media_id, source_start, source_end).await {
                    Ok(Some(clip)) => clip,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(
                            element_id = %element.id,
                            media_id = audio.media_id,
                            error = %e,
                            "Audio decode failed; element mixed as silence"
                        );
                        continue;
                    }
                };

                let gains = channel_gains(channels, volume, audio.pan);
                accumulate(
                    &mut self.scratch,
                    &gains,
                    &clip,
                    Placement {
                        dst_offset: (from - start_sample) as usize,
                        frames: (to - from) as usize,
                        dst_rate: rate,
                        source_start,
                    },
                );
            }
        }

        Ok(self.finish_buffer(start_sample))
    }

    /// Drop the scratch bus. The mixer stays usable.
    pub fn release(&mut self) {
        self.scratch = Vec::new();
    }

    fn element_overlap(&self, element: &Element, start: u64, end: u64) -> Option<(u64, u64)> {
        if !element.start_time.is_finite() || !element.duration.is_finite() || element.duration <= 0.0 {
            return None;
        }
        let el_start = self.config.sample_at(element.start_time);
        let el_end = self.config.sample_at(element.end_time());
        let from = start.max(el_start);
        let to = end.min(el_end);
        (from < to).then_some((from, to))
    }

    fn finish_buffer(&self, start_sample: u64) -> AudioMixBuffer {
        AudioMixBuffer {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels,
            start_sample,
            samples: self
                .scratch
                .iter()
                .map(|s| s.clamp(-1.0, 1.0) as f32)
                .collect(),
        }
    }
}
