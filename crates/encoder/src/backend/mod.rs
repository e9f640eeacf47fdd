//! Encoder backends and capability probing.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{Container, ExportFormat, VideoCodec};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::format::{preference_list, MimeType};

pub mod ffmpeg;
#[cfg(feature = "gstreamer")]
pub mod gstreamer;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;

pub use ffmpeg::FfmpegBackend;
#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GstBackend;
#[cfg(any(test, feature = "test-support"))]
pub use memory::{MemoryBackend, MemoryLog};

/// Something emitted by a running stream.
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// A piece of the output container. May be empty.
    Chunk(Vec<u8>),
    /// The backend failed; the stream is unusable.
    Error(String),
    /// All output has been emitted.
    Finished,
}

/// Sending half of the encoder event channel, handed to backends.
///
/// Sends never block. Events sent after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<EncoderEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<EncoderEvent>) -> Self {
        Self { tx }
    }

    pub fn chunk(&self, data: Vec<u8>) {
        let _ = self.tx.send(EncoderEvent::Chunk(data));
    }

    pub fn error(&self, message: impl Into<String>) {
        let _ = self.tx.send(EncoderEvent::Error(message.into()));
    }

    pub fn finished(&self) {
        let _ = self.tx.send(EncoderEvent::Finished);
    }
}

/// Parameters a stream is opened with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamConfig {
    pub mime: MimeType,
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamConfig {
    pub fn container(&self) -> Container {
        self.mime.container
    }

    /// Size in bytes of one RGBA frame.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// A platform encoder implementation.
pub trait EncoderBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this backend can produce `mime`.
    fn is_type_supported(&self, mime: &MimeType) -> bool;

    /// Codec used when only the bare container type was accepted.
    /// `None` when no codec of `container` is supported.
    fn resolve_codec(&self, container: Container) -> Option<VideoCodec> {
        container
            .codecs()
            .iter()
            .copied()
            .find(|codec| self.is_type_supported(&MimeType::with_codec(container, *codec)))
    }

    /// Open a stream. Blocking; called from a blocking task.
    fn open(&self, config: StreamConfig, events: EventSink) -> ClipforgeResult<Box<dyn EncoderStream>>;
}

/// One open encode. Owned exclusively by the encoder session.
pub trait EncoderStream: Send {
    /// Push one RGBA frame (`width * height * 4` bytes).
    fn push_video(&mut self, rgba: &[u8]) -> ClipforgeResult<()>;

    /// Push interleaved `f32` audio.
    fn push_audio(&mut self, samples: &[f32]) -> ClipforgeResult<()>;

    fn pause(&mut self) -> ClipforgeResult<()> {
        Ok(())
    }

    fn resume(&mut self) -> ClipforgeResult<()> {
        Ok(())
    }

    /// Flush and finalize. Emits the remaining chunks and then
    /// [`EncoderEvent::Finished`]. Blocking.
    fn finish(self: Box<Self>) -> ClipforgeResult<()>;

    /// Abandon the stream and free its resources. Must not fail.
    fn release(self: Box<Self>) {}
}

/// Which backend to probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Ffmpeg,
    Gstreamer,
}

impl FromStr for BackendPreference {
    type Err = ClipforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "ffmpeg" => Ok(Self::Ffmpeg),
            "gstreamer" | "gst" => Ok(Self::Gstreamer),
            other => Err(ClipforgeError::config(format!("Unknown encoder backend: {other}"))),
        }
    }
}

impl fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Ffmpeg => "ffmpeg",
            Self::Gstreamer => "gstreamer",
        })
    }
}

/// Whether this platform can encode at all.
#[derive(Clone)]
pub enum Capability {
    Supported(Arc<dyn EncoderBackend>),
    Unsupported { reason: String },
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Supported(backend) => f.debug_tuple("Supported").field(&backend.name()).finish(),
            Capability::Unsupported { reason } => {
                f.debug_struct("Unsupported").field("reason", reason).finish()
            }
        }
    }
}

impl Capability {
    /// Probe the platform once.
    pub fn detect(preference: BackendPreference) -> Self {
        match preference {
            BackendPreference::Ffmpeg => Self::detect_ffmpeg(),
            BackendPreference::Gstreamer => Self::detect_gstreamer(),
            BackendPreference::Auto => match Self::detect_ffmpeg() {
                supported @ Capability::Supported(_) => supported,
                Capability::Unsupported { reason: ffmpeg_reason } => match Self::detect_gstreamer() {
                    supported @ Capability::Supported(_) => supported,
                    Capability::Unsupported { reason } => Capability::Unsupported {
                        reason: format!("{ffmpeg_reason}; {reason}"),
                    },
                },
            },
        }
    }

    fn detect_ffmpeg() -> Self {
        match FfmpegBackend::probe() {
            Ok(backend) => Capability::Supported(Arc::new(backend)),
            Err(e) => Capability::Unsupported {
                reason: e.to_string(),
            },
        }
    }

    #[cfg(feature = "gstreamer")]
    fn detect_gstreamer() -> Self {
        match GstBackend::probe() {
            Ok(backend) => Capability::Supported(Arc::new(backend)),
            Err(e) => Capability::Unsupported {
                reason: e.to_string(),
            },
        }
    }

    #[cfg(not(feature = "gstreamer"))]
    fn detect_gstreamer() -> Self {
        Capability::Unsupported {
            reason: "GStreamer backend not compiled in (enable the `gstreamer` feature)".to_string(),
        }
    }

    pub fn supported(backend: impl EncoderBackend + 'static) -> Self {
        Capability::Supported(Arc::new(backend))
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported(_))
    }

    pub fn backend(&self) -> Option<&Arc<dyn EncoderBackend>> {
        match self {
            Capability::Supported(backend) => Some(backend),
            Capability::Unsupported { .. } => None,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend().map(|b| b.name()).unwrap_or("none")
    }

    /// Every MIME type the backend accepts, across all containers.
    pub fn supported_types(&self) -> Vec<MimeType> {
        let Some(backend) = self.backend() else {
            return Vec::new();
        };
        Container::ALL
            .into_iter()
            .flat_map(|container| preference_list(ExportFormat::for_container(container)))
            .filter(|mime| backend.is_type_supported(mime))
            .collect()
    }

    /// First entry of the preference list the backend accepts, with the
    /// codec it resolves to.
    pub fn negotiate(&self, format: ExportFormat) -> ClipforgeResult<(MimeType, VideoCodec)> {
        let backend = match self {
            Capability::Supported(backend) => backend,
            Capability::Unsupported { reason } => {
                return Err(ClipforgeError::unsupported_format(format!(
                    "No encoder available on this platform: {reason}"
                )))
            }
        };

        let candidates = preference_list(format);
        for mime in &candidates {
            if !backend.is_type_supported(mime) {
                continue;
            }
            match mime.codec.or_else(|| backend.resolve_codec(mime.container)) {
                Some(codec) => return Ok((*mime, codec)),
                None => tracing::debug!(mime = %mime, "Bare type accepted but no codec resolves"),
            }
        }

        let tried: Vec<String> = candidates.iter().map(ToString::to_string).collect();
        Err(ClipforgeError::unsupported_format(format!(
            "{} cannot produce {format}; tried {}",
            backend.name(),
            tried.join(", ")
        )))
    }
}
