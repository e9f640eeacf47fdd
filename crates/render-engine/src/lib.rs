//! clipforge Render Engine
//!
//! Turns a timeline into a finished video file, one frame at a time.
//!
//! # Pipeline Architecture
//!
//! ```text
//! timeline ──► FrameCaptureService ──► CanvasCompositor ──► Surface ─┐
//!    │            (snapshot at t)       (z-ordered draw)     (RGBA)  │
//!    │                                                               ├──► Encoder ──► container
//!    └──────────► AudioMixer ──────────────────────────────► PCM ────┘
//!                 (sample-accurate windows)
//! ```
//!
//! [`ExportEngine`] owns the loop: it runs the preflight checks, starts
//! the encoder, pushes every frame in order with audio on a coarser
//! cadence, and always releases the encoder and mixer on the way out.

pub mod capture;
pub mod compositor;
pub mod export;
pub mod media;
pub mod preflight;
pub mod surface;
pub mod text;

pub use capture::{FrameCaptureService, FrameSnapshot, ResolvedElement};
pub use compositor::{CanvasCompositor, RenderReport, SkippedElement};
pub use export::*;
pub use media::{decode_image, DecodeOptions, FrameSequence, MediaLibrary, VisualSource};
pub use preflight::{check_compatibility, estimate_memory, CompatibilityReport, MemoryEstimate, MemoryThresholds};
pub use surface::{parse_color, pixmap_from_rgba, Surface};
pub use text::TextRenderer;
