//! clipforge Encoder
//!
//! Turns a stream of RGBA frames and interleaved PCM into a finished
//! container:
//! - **Format:** MIME negotiation within the requested container and
//!   bitrate derivation from resolution, rate and quality
//! - **Backends:** ffmpeg subprocess (default), GStreamer (`gstreamer`
//!   feature), and an in-memory recorder (`test-support` feature)
//! - **Session:** the `Inactive -> Recording <-> Paused -> Inactive` state
//!   machine that owns the backend stream and collects its output
//!
//! Backends report output through an unbounded event channel that the
//! session drains on `poll_events` and `stop`, so pushing never waits on
//! the consumer.

pub mod backend;
pub mod format;
pub mod session;

pub use backend::{BackendPreference, Capability, EncoderBackend, EncoderEvent, EncoderStream, EventSink, StreamConfig};
pub use format::{derive_bitrate, preference_list, MimeType, NegotiatedFormat};
pub use session::{AudioChunk, EncodedOutput, Encoder, EncoderStats, FrameOrigin, RecordingState, VideoFrame};
