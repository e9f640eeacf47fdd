//! MIME negotiation and bitrate derivation.

use std::fmt;
use std::str::FromStr;

use clipforge_common::error::ClipforgeError;
use clipforge_timeline_model::{Container, ExportFormat, ExportQuality, VideoCodec};
use serde::{Deserialize, Serialize};

/// Bitrate floor (bits per second).
pub const MIN_VIDEO_BITRATE: u64 = 1_000_000;

/// Bitrate ceiling at 1080p and below (bits per second).
pub const MAX_VIDEO_BITRATE_1080P: u64 = 10_000_000;

/// Audio bitrate used by every backend (bits per second).
pub const AUDIO_BITRATE: u64 = 128_000;

const PIXELS_1080P: f64 = 1920.0 * 1080.0;

/// A container MIME type with an optional `codecs=` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MimeType {
    pub container: Container,
    pub codec: Option<VideoCodec>,
}

impl MimeType {
    pub fn with_codec(container: Container, codec: VideoCodec) -> Self {
        Self {
            container,
            codec: Some(codec),
        }
    }

    /// The container type without codec parameters.
    pub fn bare(container: Container) -> Self {
        Self {
            container,
            codec: None,
        }
    }

    pub fn is_bare(&self) -> bool {
        self.codec.is_none()
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.codec {
            Some(codec) => write!(f, "{}; codecs={}", self.container.mime_type(), codec.mime_token()),
            None => f.write_str(self.container.mime_type()),
        }
    }
}

impl FromStr for MimeType {
    type Err = ClipforgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim);
        let base = parts.next().unwrap_or_default().to_ascii_lowercase();
        let container = Container::ALL
            .into_iter()
            .find(|c| c.mime_type() == base)
            .ok_or_else(|| ClipforgeError::unsupported_format(format!("Unknown MIME type: {s}")))?;

        let mut codec = None;
        for param in parts {
            if let Some(value) = param.strip_prefix("codecs=") {
                let token = value.trim_matches('"').split(',').next().unwrap_or_default();
                codec = Some(
                    token
                        .parse::<VideoCodec>()
                        .map_err(|e| ClipforgeError::unsupported_format(e.to_string()))?,
                );
            }
        }
        Ok(Self { container, codec })
    }
}

/// Candidate MIME types for `format`, most preferred first.
///
/// The requested codec comes first, then the container's other codecs in
/// order, then the bare container. Other containers are never tried.
pub fn preference_list(format: ExportFormat) -> Vec<MimeType> {
    let container = format.container;
    let mut list = Vec::with_capacity(container.codecs().len() + 2);
    list.push(MimeType::with_codec(container, format.codec));
    for codec in container.codecs() {
        if *codec != format.codec {
            list.push(MimeType::with_codec(container, *codec));
        }
    }
    list.push(MimeType::bare(container));
    list
}

/// Video bitrate for the output.
///
/// `pixels * fps * bits_per_pixel`, at least [`MIN_VIDEO_BITRATE`] and at
/// most [`MAX_VIDEO_BITRATE_1080P`] scaled by how many 1080p frames fit in
/// one output frame. `hint` lowers the ceiling further but never the floor.
pub fn derive_bitrate(width: u32, height: u32, fps: u32, quality: ExportQuality, hint: Option<u64>) -> u64 {
    let pixels = width as f64 * height as f64;
    let raw = pixels * fps as f64 * quality.bits_per_pixel();
    let scale = (pixels / PIXELS_1080P).max(1.0);
    let mut ceiling = (MAX_VIDEO_BITRATE_1080P as f64 * scale) as u64;
    if let Some(hint) = hint {
        ceiling = ceiling.min(hint.max(MIN_VIDEO_BITRATE));
    }
    (raw as u64).clamp(MIN_VIDEO_BITRATE, ceiling)
}

/// The outcome of negotiation, fixed for one encoder run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NegotiatedFormat {
    /// The MIME type the backend accepted (possibly bare).
    pub mime: MimeType,
    /// Codec actually used.
    pub codec: VideoCodec,
    pub video_bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl NegotiatedFormat {
    pub fn container(&self) -> Container {
        self.mime.container
    }

    /// MIME type of the produced file, with the resolved codec filled in.
    pub fn output_mime(&self) -> MimeType {
        MimeType::with_codec(self.mime.container, self.codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_display_and_parse() {
        let mime = MimeType::with_codec(Container::Mp4, VideoCodec::H264);
        assert_eq!(mime.to_string(), "video/mp4; codecs=h264");
        assert_eq!("video/mp4; codecs=h264".parse::<MimeType>().unwrap(), mime);
        assert_eq!(
            "video/webm;codecs=\"vp9,opus\"".parse::<MimeType>().unwrap(),
            MimeType::with_codec(Container::Webm, VideoCodec::Vp9)
        );
        assert_eq!("video/quicktime".parse::<MimeType>().unwrap(), MimeType::bare(Container::Mov));
        assert!("video/x-msvideo".parse::<MimeType>().is_err());
    }

    #[test]
    fn test_preference_list_mp4() {
        let list: Vec<String> = preference_list(ExportFormat::new(Container::Mp4, VideoCodec::H264))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            list,
            vec!["video/mp4; codecs=h264", "video/mp4; codecs=h265", "video/mp4"]
        );
    }

    #[test]
    fn test_preference_list_never_crosses_containers() {
        for container in Container::ALL {
            for codec in container.codecs() {
                let list = preference_list(ExportFormat::new(container, *codec));
                assert!(list.iter().all(|m| m.container == container));
                assert_eq!(list[0].codec, Some(*codec));
                assert!(list.last().is_some_and(MimeType::is_bare));
            }
        }
    }

    #[test]
    fn test_bitrate_floor() {
        assert_eq!(derive_bitrate(320, 240, 15, ExportQuality::Low, None), MIN_VIDEO_BITRATE);
    }

    #[test]
    fn test_bitrate_ceiling_scales_with_resolution() {
        let hd = derive_bitrate(1920, 1080, 60, ExportQuality::High, None);
        assert_eq!(hd, MAX_VIDEO_BITRATE_1080P);
        let uhd = derive_bitrate(3840, 2160, 60, ExportQuality::High, None);
        assert_eq!(uhd, 4 * MAX_VIDEO_BITRATE_1080P);
        assert!(uhd > hd);
    }

    #[test]
    fn test_bitrate_mid_range_is_proportional() {
        // 1280x720 @ 30 fps, 0.1 bpp
        assert_eq!(derive_bitrate(1280, 720, 30, ExportQuality::High, None), 2_764_800);
    }

    #[test]
    fn test_bitrate_hint_caps() {
        assert_eq!(
            derive_bitrate(1920, 1080, 30, ExportQuality::High, Some(2_000_000)),
            2_000_000
        );
        // A hint below the floor does not undercut it.
        assert_eq!(
            derive_bitrate(1920, 1080, 30, ExportQuality::High, Some(10)),
            MIN_VIDEO_BITRATE
        );
    }
}
