//! Timeline elements.
//!
//! An element is one placed clip: a video, a still image, a text overlay,
//! or an audio clip. Timing fields are in seconds on the timeline.

use serde::{Deserialize, Serialize};

use crate::geometry::{CropRect, Transform};

/// One placed item on a track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Unique element identifier.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: String,

    /// Timeline position of the first visible instant.
    pub start_time: f64,

    /// Time the element occupies on the timeline (after trimming).
    pub duration: f64,

    /// Seconds removed from the head of the source.
    #[serde(default)]
    pub trim_start: f64,

    /// Seconds removed from the tail of the source.
    #[serde(default)]
    pub trim_end: f64,

    /// Opacity in `[0.0, 1.0]`.
    #[serde(default = "default_opacity")]
    pub opacity: f64,

    #[serde(default)]
    pub transform: Transform,

    #[serde(default)]
    pub crop: CropRect,

    #[serde(flatten)]
    pub kind: ElementKind,
}

/// What an element shows or plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    Video {
        media_id: String,
        #[serde(default = "default_volume")]
        volume: f64,
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        pan: f64,
    },
    Image {
        media_id: String,
    },
    Text(TextContent),
    Audio {
        media_id: String,
        #[serde(default = "default_volume")]
        volume: f64,
        #[serde(default)]
        muted: bool,
        #[serde(default)]
        pan: f64,
    },
}

/// Text overlay content and style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub content: String,

    #[serde(default = "default_font_family")]
    pub font_family: String,

    /// Font size in output pixels.
    #[serde(default = "default_font_size")]
    pub font_size: f64,

    /// Fill colour as hex (`#rrggbb` or `#rrggbbaa`).
    #[serde(default = "default_text_color")]
    pub color: String,

    /// Box colour behind the text; `transparent` draws no box.
    #[serde(default = "default_background_color")]
    pub background_color: String,

    #[serde(default)]
    pub text_align: TextAlign,

    #[serde(default)]
    pub font_weight: FontWeight,

    #[serde(default)]
    pub font_style: FontStyle,

    #[serde(default)]
    pub text_decoration: TextDecoration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
    #[serde(rename = "line-through")]
    LineThrough,
}

/// Audio parameters of an audio-capable element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParams<'a> {
    pub media_id: &'a str,
    pub volume: f64,
    pub muted: bool,
    pub pan: f64,
}

fn default_opacity() -> f64 {
    1.0
}

fn default_volume() -> f64 {
    1.0
}

fn default_font_family() -> String {
    "Arial, sans-serif".to_string()
}

fn default_font_size() -> f64 {
    24.0
}

fn default_text_color() -> String {
    "#000000".to_string()
}

fn default_background_color() -> String {
    "transparent".to_string()
}

impl Default for TextContent {
    fn default() -> Self {
        Self {
            content: String::new(),
            font_family: default_font_family(),
            font_size: default_font_size(),
            color: default_text_color(),
            background_color: default_background_color(),
            text_align: TextAlign::default(),
            font_weight: FontWeight::default(),
            font_style: FontStyle::default(),
            text_decoration: TextDecoration::default(),
        }
    }
}

impl Element {
    /// Create an element with default placement.
    pub fn new(id: impl Into<String>, start_time: f64, duration: f64, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            start_time,
            duration,
            trim_start: 0.0,
            trim_end: 0.0,
            opacity: 1.0,
            transform: Transform::IDENTITY,
            crop: CropRect::FULL,
            kind,
        }
    }

    /// A video element playing `media_id` at full volume.
    pub fn video(id: impl Into<String>, media_id: impl Into<String>, start: f64, duration: f64) -> Self {
        Self::new(
            id,
            start,
            duration,
            ElementKind::Video {
                media_id: media_id.into(),
                volume: 1.0,
                muted: false,
                pan: 0.0,
            },
        )
    }

    /// An image element showing `media_id`.
    pub fn image(id: impl Into<String>, media_id: impl Into<String>, start: f64, duration: f64) -> Self {
        Self::new(
            id,
            start,
            duration,
            ElementKind::Image {
                media_id: media_id.into(),
            },
        )
    }

    /// A text element with default styling.
    pub fn text(id: impl Into<String>, content: impl Into<String>, start: f64, duration: f64) -> Self {
        Self::new(
            id,
            start,
            duration,
            ElementKind::Text(TextContent {
                content: content.into(),
                ..TextContent::default()
            }),
        )
    }

    /// An audio element playing `media_id` at `volume`.
    pub fn audio(
        id: impl Into<String>,
        media_id: impl Into<String>,
        start: f64,
        duration: f64,
        volume: f64,
    ) -> Self {
        Self::new(
            id,
            start,
            duration,
            ElementKind::Audio {
                media_id: media_id.into(),
                volume,
                muted: false,
                pan: 0.0,
            },
        )
    }

    /// Timeline time at which the element stops being active.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether the element is active at `t`.
    ///
    /// The interval is half-open: a cut at `t` belongs to the element that
    /// starts there, never to the one that ends there.
    pub fn is_active_at(&self, t: f64) -> bool {
        t >= self.start_time && t < self.end_time()
    }

    /// Whether any part of `[start, end)` falls inside the element.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        start < self.end_time() && end > self.start_time
    }

    /// Media this element reads from, if any.
    pub fn media_id(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Video { media_id, .. }
            | ElementKind::Image { media_id }
            | ElementKind::Audio { media_id, .. } => Some(media_id),
            ElementKind::Text(_) => None,
        }
    }

    /// Audio parameters, for elements that carry sound.
    pub fn audio_params(&self) -> Option<AudioParams<'_>> {
        match &self.kind {
            ElementKind::Video {
                media_id,
                volume,
                muted,
                pan,
            }
            | ElementKind::Audio {
                media_id,
                volume,
                muted,
                pan,
            } => Some(AudioParams {
                media_id,
                volume: *volume,
                muted: *muted,
                pan: *pan,
            }),
            ElementKind::Image { .. } | ElementKind::Text(_) => None,
        }
    }

    /// Whether the element draws anything.
    pub fn is_visual(&self) -> bool {
        !matches!(self.kind, ElementKind::Audio { .. })
    }

    /// Short kind name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ElementKind::Video { .. } => "video",
            ElementKind::Image { .. } => "image",
            ElementKind::Text(_) => "text",
            ElementKind::Audio { .. } => "audio",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_activity() {
        let el = Element::image("a", "img", 1.0, 2.0);
        assert!(!el.is_active_at(0.999));
        assert!(el.is_active_at(1.0));
        assert!(el.is_active_at(2.999));
        assert!(!el.is_active_at(3.0));
    }

    #[test]
    fn test_overlaps_window() {
        let el = Element::audio("a", "tone", 1.0, 1.0, 1.0);
        assert!(el.overlaps(0.5, 1.5));
        assert!(el.overlaps(1.9, 3.0));
        assert!(!el.overlaps(2.0, 3.0));
        assert!(!el.overlaps(0.0, 1.0));
    }

    #[test]
    fn test_parse_text_element_with_defaults() {
        let json = r##"{
            "id": "title",
            "type": "text",
            "start_time": 0.0,
            "duration": 3.0,
            "content": "Hello",
            "font_weight": "bold",
            "text_decoration": "line-through"
        }"##;
        let el: Element = serde_json::from_str(json).unwrap();
        let ElementKind::Text(text) = &el.kind else {
            panic!("expected text element");
        };
        assert_eq!(text.content, "Hello");
        assert_eq!(text.font_size, 24.0);
        assert_eq!(text.font_weight, FontWeight::Bold);
        assert_eq!(text.text_decoration, TextDecoration::LineThrough);
        assert_eq!(text.text_align, TextAlign::Center);
        assert_eq!(el.opacity, 1.0);
        assert!(el.crop.is_full());
        assert!(el.media_id().is_none());
    }

    #[test]
    fn test_parse_video_element_audio_defaults() {
        let json = r#"{
            "id": "clip",
            "type": "video",
            "media_id": "cam",
            "start_time": 2.0,
            "duration": 4.0,
            "trim_start": 1.5,
            "transform": { "scale": 0.5, "rotation": 90.0 }
        }"#;
        let el: Element = serde_json::from_str(json).unwrap();
        let audio = el.audio_params().unwrap();
        assert_eq!(audio.media_id, "cam");
        assert_eq!(audio.volume, 1.0);
        assert!(!audio.muted);
        assert_eq!(el.transform.scale, 0.5);
        assert_eq!(el.transform.x, 0.0);
        assert_eq!(el.trim_start, 1.5);
        assert!(el.is_visual());
    }

    #[test]
    fn test_image_and_text_have_no_audio() {
        assert!(Element::image("i", "img", 0.0, 1.0).audio_params().is_none());
        assert!(Element::text("t", "hi", 0.0, 1.0).audio_params().is_none());
        assert!(!Element::audio("a", "snd", 0.0, 1.0, 0.5).is_visual());
    }
}
