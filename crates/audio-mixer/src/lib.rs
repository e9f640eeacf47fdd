//! clipforge Audio Mixer
//!
//! Offline mixdown of timeline audio:
//! - **Sources:** decoded PCM per media item, behind the async [`AudioSource`] trait
//! - **Mixer:** per-window mixing with volume, mute, pan, trim and clamping
//! - **Resampling:** linear interpolation and channel mapping onto the bus format
//! - **WAV:** 16-bit PCM mixdown and WAV decoding via `hound`

pub mod mixer;
mod resample;
pub mod source;
pub mod wav;

pub use mixer::{AudioMixBuffer, AudioMixer, MixerConfig};
pub use source::{AudioSource, MemoryAudioSource, PcmClip};
pub use wav::{export_wav, read_wav, WavSink};
