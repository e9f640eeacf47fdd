//! Decoded media held in memory for the compositor and mixer.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;

use clipforge_audio_mixer::{read_wav, AudioSource, MemoryAudioSource, PcmClip};
use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use resvg::tiny_skia::Pixmap;

use crate::surface::pixmap_from_rgba;

/// Pixel sources for visual elements.
pub trait VisualSource: Send + Sync {
    /// The frame of video `media_id` shown at `source_time` seconds.
    fn video_frame(&self, media_id: &str, source_time: f64) -> ClipforgeResult<Arc<Pixmap>>;

    /// The still image `media_id`.
    fn image(&self, media_id: &str) -> ClipforgeResult<Arc<Pixmap>>;
}

/// Decoded video frames at a fixed rate.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    pub fps: f64,
    pub frames: Vec<Arc<Pixmap>>,
}

impl FrameSequence {
    pub fn new(fps: f64, frames: Vec<Pixmap>) -> Self {
        Self {
            fps,
            frames: frames.into_iter().map(Arc::new).collect(),
        }
    }

    /// A one-frame sequence that shows `frame` at every time.
    pub fn still(frame: Pixmap) -> Self {
        Self::new(1.0, vec![frame])
    }

    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frames.len() as f64 / self.fps
        } else {
            0.0
        }
    }

    /// Frame shown at `t`. Times past the end hold the last frame.
    pub fn frame_at(&self, t: f64) -> Option<&Arc<Pixmap>> {
        let last = self.frames.len().checked_sub(1)?;
        if !t.is_finite() || t <= 0.0 || self.fps <= 0.0 {
            return self.frames.first();
        }
        let index = ((t * self.fps + 1e-9).floor() as usize).min(last);
        self.frames.get(index)
    }
}

/// Audio format requested when decoding through ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frame rate videos are decoded at.
    pub video_fps: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            video_fps: 30,
        }
    }
}

/// In-memory store of decoded images, videos and audio.
#[derive(Debug, Default, Clone)]
pub struct MediaLibrary {
    images: HashMap<String, Arc<Pixmap>>,
    videos: HashMap<String, FrameSequence>,
    audio: MemoryAudioSource,
}

impl MediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_image(&mut self, media_id: impl Into<String>, image: Pixmap) {
        self.images.insert(media_id.into(), Arc::new(image));
    }

    pub fn insert_video(&mut self, media_id: impl Into<String>, video: FrameSequence) {
        self.videos.insert(media_id.into(), video);
    }

    pub fn insert_audio(&mut self, media_id: impl Into<String>, clip: PcmClip) {
        self.audio.insert(media_id, clip);
    }

    pub fn with_image(mut self, media_id: impl Into<String>, image: Pixmap) -> Self {
        self.insert_image(media_id, image);
        self
    }

    pub fn with_video(mut self, media_id: impl Into<String>, video: FrameSequence) -> Self {
        self.insert_video(media_id, video);
        self
    }

    pub fn with_audio(mut self, media_id: impl Into<String>, clip: PcmClip) -> Self {
        self.insert_audio(media_id, clip);
        self
    }

    pub fn len(&self) -> usize {
        self.images.len() + self.videos.len() + self.audio.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load `path` under `media_id`, choosing a decoder by extension.
    pub fn load_path(&mut self, media_id: &str, path: &Path, options: DecodeOptions) -> ClipforgeResult<()> {
        if !path.exists() {
            return Err(ClipforgeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "png" | "jpg" | "jpeg" => self.load_image(media_id, path),
            "wav" => {
                self.insert_audio(media_id, read_wav(path)?);
                Ok(())
            }
            "mp3" | "ogg" | "oga" | "flac" | "m4a" | "aac" | "opus" => {
                let clip = decode_audio_ffmpeg(path, options.sample_rate, options.channels)?;
                self.insert_audio(media_id, clip);
                Ok(())
            }
            _ => self.load_video(media_id, path, options),
        }
    }

    /// Decode a PNG or JPEG.
    pub fn load_image(&mut self, media_id: &str, path: &Path) -> ClipforgeResult<()> {
        let bytes = std::fs::read(path)?;
        let pixmap = decode_image(&bytes)
            .map_err(|e| ClipforgeError::render(format!("{}: {e}", path.display())))?;
        tracing::debug!(
            media_id,
            width = pixmap.width(),
            height = pixmap.height(),
            "Loaded image"
        );
        self.insert_image(media_id, pixmap);
        Ok(())
    }

    /// Decode every frame of a video, and its audio track when it has one.
    pub fn load_video(&mut self, media_id: &str, path: &Path, options: DecodeOptions) -> ClipforgeResult<()> {
        let (width, height) = probe_video_dimensions(path).ok_or_else(|| {
            ClipforgeError::unsupported_format(format!("No video stream in {}", path.display()))
        })?;
        let video = decode_video_ffmpeg(path, width, height, options.video_fps)?;
        tracing::info!(
            media_id,
            width,
            height,
            frames = video.frames.len(),
            "Decoded video"
        );
        self.insert_video(media_id, video);

        match decode_audio_ffmpeg(path, options.sample_rate, options.channels) {
            Ok(clip) if !clip.samples.is_empty() => self.insert_audio(media_id, clip),
            Ok(_) => {}
            Err(e) => tracing::debug!(media_id, error = %e, "Video has no decodable audio"),
        }
        Ok(())
    }
}

impl VisualSource for MediaLibrary {
    fn video_frame(&self, media_id: &str, source_time: f64) -> ClipforgeResult<Arc<Pixmap>> {
        let video = self
            .videos
            .get(media_id)
            .ok_or_else(|| ClipforgeError::render(format!("No video loaded for media {media_id}")))?;
        video
            .frame_at(source_time)
            .cloned()
            .ok_or_else(|| ClipforgeError::render(format!("Video {media_id} has no frames")))
    }

    fn image(&self, media_id: &str) -> ClipforgeResult<Arc<Pixmap>> {
        self.images
            .get(media_id)
            .cloned()
            .ok_or_else(|| ClipforgeError::render(format!("No image loaded for media {media_id}")))
    }
}

#[async_trait::async_trait]
impl AudioSource for MediaLibrary {
    async fn decode(&self, media_id: &str, start: f64, end: f64) -> ClipforgeResult<Option<PcmClip>> {
        if self.audio.get(media_id).is_none() && self.videos.contains_key(media_id) {
            // Silent video.
            return Ok(None);
        }
        self.audio.decode(media_id, start, end).await
    }
}

/// Decode PNG or JPEG bytes into a premultiplied pixmap.
pub fn decode_image(bytes: &[u8]) -> ClipforgeResult<Pixmap> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ClipforgeError::render(format!("Failed to decode image: {e}")))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    pixmap_from_rgba(width, height, img.into_raw())
}

fn probe_video_dimensions(path: &Path) -> Option<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(path)
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let raw = String::from_utf8(output.stdout).ok()?;
    parse_dimensions(raw.lines().next()?)
}

fn parse_dimensions(line: &str) -> Option<(u32, u32)> {
    let (w, h) = line.trim().split_once('x')?;
    let width = w.parse::<u32>().ok()?;
    let height = h.parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

fn decode_video_ffmpeg(path: &Path, width: u32, height: u32, fps: u32) -> ClipforgeResult<FrameSequence> {
    let fps = fps.max(1);
    let mut child = Command::new("ffmpeg")
        .args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-an", "-vf"])
        .arg(format!("fps={fps}"))
        .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ClipforgeError::unsupported(format!("Failed to start ffmpeg: {e}")))?;

    let stderr_handle = child.stderr.take().map(spawn_stderr_drain);
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClipforgeError::render("ffmpeg stdout unavailable"))?;

    let frame_bytes = width as usize * height as usize * 4;
    let mut frames = Vec::new();
    loop {
        let mut buf = vec![0u8; frame_bytes];
        match stdout.read_exact(&mut buf) {
            Ok(()) => frames.push(pixmap_from_rgba(width, height, buf)?),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
    }

    let status = child.wait()?;
    let stderr = stderr_handle.and_then(|h| h.join().ok()).unwrap_or_default();
    if !status.success() || frames.is_empty() {
        return Err(ClipforgeError::render(format!(
            "ffmpeg failed to decode {}: {}",
            path.display(),
            stderr.trim()
        )));
    }
    Ok(FrameSequence::new(fps as f64, frames))
}

fn decode_audio_ffmpeg(path: &Path, sample_rate: u32, channels: u16) -> ClipforgeResult<PcmClip> {
    let output = Command::new("ffmpeg")
        .args(["-v", "error", "-nostdin", "-i"])
        .arg(path)
        .args(["-vn", "-f", "f32le", "-acodec", "pcm_f32le", "-ac"])
        .arg(channels.to_string())
        .arg("-ar")
        .arg(sample_rate.to_string())
        .arg("pipe:1")
        .output()
        .map_err(|e| ClipforgeError::unsupported(format!("Failed to start ffmpeg: {e}")))?;

    if !output.status.success() {
        return Err(ClipforgeError::audio(format!(
            "ffmpeg failed to decode audio from {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(PcmClip::new(sample_rate, channels, f32le_samples(&output.stdout)))
}

fn f32le_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn spawn_stderr_drain(mut stderr: std::process::ChildStderr) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    })
}
