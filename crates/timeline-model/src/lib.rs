//! clipforge Timeline Model
//!
//! Defines the data contracts the export path reads:
//! - **Timeline:** ordered tracks, each an independent compositing/mixing channel
//! - **Element:** one placed video, image, text or audio clip with trim,
//!   crop, transform, opacity and (for sound) volume/mute/pan
//! - **ExportSettings:** container/codec pair, resolution, rate and quality
//!
//! Times are seconds on the timeline. Crop rectangles are normalized to
//! `[0.0, 1.0]` of the source media.

pub mod element;
pub mod geometry;
pub mod settings;
pub mod timeline;

pub use element::*;
pub use geometry::*;
pub use settings::*;
pub use timeline::*;
