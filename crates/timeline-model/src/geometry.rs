//! Per-element placement: transform and crop.
//!
//! Crop coordinates are normalized to `[0.0, 1.0]` of the source media so
//! they survive re-encoding a source at a different resolution.

use serde::{Deserialize, Serialize};

/// Placement of an element on the output canvas.
///
/// `x` and `y` are pixel offsets of the element centre from the canvas
/// centre. `scale` is uniform. `rotation` is in degrees, clockwise, about
/// the element centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    pub rotation: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        x: 0.0,
        y: 0.0,
        scale: 1.0,
        rotation: 0.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Scale with non-finite or negative values replaced by zero.
    pub fn effective_scale(&self) -> f64 {
        if self.scale.is_finite() {
            self.scale.max(0.0)
        } else {
            0.0
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A normalized crop rectangle within the source media.
///
/// `(0.0, 0.0)` is the top-left and `(1.0, 1.0)` the bottom-right of the
/// full source frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    /// Left edge (normalized).
    pub x: f64,
    /// Top edge (normalized).
    pub y: f64,
    /// Width (normalized).
    pub w: f64,
    /// Height (normalized).
    pub h: f64,
}

/// A crop rectangle resolved to whole source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// The whole source frame (no crop).
    pub const FULL: CropRect = CropRect {
        x: 0.0,
        y: 0.0,
        w: 1.0,
        h: 1.0,
    };

    /// Create a new crop rect, clamping values to valid range.
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        Self {
            x,
            y,
            w: w.clamp(0.0, 1.0 - x),
            h: h.clamp(0.0, 1.0 - y),
        }
    }

    /// Whether this rect selects the whole frame.
    pub fn is_full(&self) -> bool {
        *self == Self::FULL
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        (self.x + self.w).min(1.0)
    }

    /// Bottom edge.
    pub fn bottom(&self) -> f64 {
        (self.y + self.h).min(1.0)
    }

    /// Area of the rect (0.0 to 1.0).
    pub fn area(&self) -> f64 {
        self.w * self.h
    }

    /// Resolve against a source of `width` x `height` pixels.
    ///
    /// Edges are rounded outward to whole pixels. Returns `None` when the
    /// rect selects no pixels at all.
    pub fn to_pixels(&self, width: u32, height: u32) -> Option<PixelRect> {
        let clamped = Self::new(self.x, self.y, self.w, self.h);
        let left = (clamped.x * width as f64).floor() as u32;
        let top = (clamped.y * height as f64).floor() as u32;
        let right = ((clamped.right() * width as f64).ceil() as u32).min(width);
        let bottom = ((clamped.bottom() * height as f64).ceil() as u32).min(height);
        if right <= left || bottom <= top {
            return None;
        }
        Some(PixelRect {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        })
    }
}

impl Default for CropRect {
    fn default() -> Self {
        Self::FULL
    }
}
