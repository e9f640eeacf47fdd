//! Export settings: container, codec, resolution and rate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
    Mov,
}

/// Output video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    H265,
    Vp8,
    Vp9,
}

/// A requested (container, codec) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportFormat {
    pub container: Container,
    pub codec: VideoCodec,
}

/// Quality preset. Sets the bits-per-pixel factor the encoder derives its
/// bitrate from, and a suggested resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportQuality {
    Low,
    Medium,
    #[default]
    High,
}

/// Everything the export path needs to know about the output.
///
/// Immutable for the duration of one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSettings {
    #[serde(default)]
    pub format: ExportFormat,

    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Upper bound on the derived video bitrate (bits per second).
    #[serde(default)]
    pub bitrate_hint: Option<u64>,

    #[serde(default)]
    pub quality: ExportQuality,

    /// Composite at this lower rate and repeat frames up to `fps`.
    #[serde(default)]
    pub render_fps: Option<u32>,

    /// Output file name without extension.
    #[serde(default = "default_filename")]
    pub filename: String,
}

/// Invalid export settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid export settings: {message}")]
    Invalid { message: String },

    #[error("Unknown {what}: {value}")]
    UnknownName { what: &'static str, value: String },
}

impl Container {
    pub const ALL: [Container; 3] = [Container::Mp4, Container::Webm, Container::Mov];

    /// MIME type without codec parameters.
    pub fn mime_type(self) -> &'static str {
        match self {
            Container::Mp4 => "video/mp4",
            Container::Webm => "video/webm",
            Container::Mov => "video/quicktime",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Webm => "webm",
            Container::Mov => "mov",
        }
    }

    /// Codecs this container carries, most preferred first.
    pub fn codecs(self) -> &'static [VideoCodec] {
        match self {
            Container::Mp4 | Container::Mov => &[VideoCodec::H264, VideoCodec::H265],
            Container::Webm => &[VideoCodec::Vp9, VideoCodec::Vp8],
        }
    }

    pub fn default_codec(self) -> VideoCodec {
        self.codecs()[0]
    }

    pub fn carries(self, codec: VideoCodec) -> bool {
        self.codecs().contains(&codec)
    }
}

impl VideoCodec {
    /// Token used in the MIME `codecs=` parameter.
    pub fn mime_token(self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::H265 => "h265",
            VideoCodec::Vp8 => "vp8",
            VideoCodec::Vp9 => "vp9",
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_token())
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.codec)
    }
}

impl FromStr for Container {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp4" => Ok(Container::Mp4),
            "webm" => Ok(Container::Webm),
            "mov" | "quicktime" => Ok(Container::Mov),
            _ => Err(SettingsError::UnknownName {
                what: "container",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for VideoCodec {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" | "avc1" => Ok(VideoCodec::H264),
            "h265" | "hevc" | "hvc1" => Ok(VideoCodec::H265),
            "vp8" => Ok(VideoCodec::Vp8),
            "vp9" | "vp09" => Ok(VideoCodec::Vp9),
            _ => Err(SettingsError::UnknownName {
                what: "codec",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for ExportQuality {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(ExportQuality::Low),
            "medium" => Ok(ExportQuality::Medium),
            "high" => Ok(ExportQuality::High),
            _ => Err(SettingsError::UnknownName {
                what: "quality",
                value: s.to_string(),
            }),
        }
    }
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self {
            container: Container::Mp4,
            codec: VideoCodec::H264,
        }
    }
}

impl ExportFormat {
    pub fn new(container: Container, codec: VideoCodec) -> Self {
        Self { container, codec }
    }

    /// The container with its preferred codec.
    pub fn for_container(container: Container) -> Self {
        Self {
            container,
            codec: container.default_codec(),
        }
    }
}

impl ExportQuality {
    /// Bits per pixel per frame used for bitrate derivation.
    pub fn bits_per_pixel(self) -> f64 {
        match self {
            ExportQuality::Low => 0.05,
            ExportQuality::Medium => 0.075,
            ExportQuality::High => 0.1,
        }
    }

    /// Suggested output resolution for the preset.
    pub fn preset_resolution(self) -> (u32, u32) {
        match self {
            ExportQuality::Low => (854, 480),
            ExportQuality::Medium => (1280, 720),
            ExportQuality::High => (1920, 1080),
        }
    }
}

fn default_filename() -> String {
    format!("export_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self::from_quality(ExportFormat::default(), ExportQuality::High, 30)
    }
}

impl ExportSettings {
    /// Settings at the preset resolution for `quality`.
    pub fn from_quality(format: ExportFormat, quality: ExportQuality, fps: u32) -> Self {
        let (width, height) = quality.preset_resolution();
        Self {
            format,
            width,
            height,
            fps,
            bitrate_hint: None,
            quality,
            render_fps: None,
            filename: default_filename(),
        }
    }

    /// Builder-style size override.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Reject settings no encoder could honour.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.width == 0 || self.height == 0 {
            return Err(SettingsError::Invalid {
                message: format!("output size {}x{} must be non-zero", self.width, self.height),
            });
        }
        if self.fps == 0 {
            return Err(SettingsError::Invalid {
                message: "fps must be greater than zero".to_string(),
            });
        }
        if let Some(render_fps) = self.render_fps {
            if render_fps == 0 || render_fps > self.fps {
                return Err(SettingsError::Invalid {
                    message: format!(
                        "render_fps {render_fps} must be between 1 and the output fps {}",
                        self.fps
                    ),
                });
            }
        }
        if self.bitrate_hint == Some(0) {
            return Err(SettingsError::Invalid {
                message: "bitrate_hint must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// File name with the extension of the container actually produced.
    pub fn output_filename(&self, container: Container) -> String {
        format!("{}.{}", self.filename, container.extension())
    }

    /// Number of pixels in one output frame.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}
