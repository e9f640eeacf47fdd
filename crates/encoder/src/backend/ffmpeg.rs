//! ffmpeg subprocess backend.
//!
//! Video is piped as raw RGBA into an ffmpeg child that encodes to a
//! temporary Matroska file. Audio is spooled to a temporary `f32le` file.
//! `finish` muxes both into the target container and emits the result.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{Container, VideoCodec};

use super::{EncoderBackend, EncoderStream, EventSink, StreamConfig};
use crate::format::{MimeType, AUDIO_BITRATE};

/// Size of each emitted output chunk.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Encodes by driving the `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: String,
    encoders: HashSet<String>,
    muxers: HashSet<String>,
}

impl FfmpegBackend {
    /// Probe `ffmpeg` on `PATH` for its encoders and muxers.
    pub fn probe() -> ClipforgeResult<Self> {
        Self::probe_binary("ffmpeg")
    }

    pub fn probe_binary(binary: &str) -> ClipforgeResult<Self> {
        let encoders = run_listing(binary, "-encoders")?;
        let muxers = run_listing(binary, "-muxers")?;
        let backend = Self::from_listings(binary, &encoders, &muxers);

        if !Container::ALL
            .into_iter()
            .any(|c| backend.is_type_supported(&MimeType::bare(c)))
        {
            return Err(ClipforgeError::unsupported(format!(
                "{binary} has no usable encoder/muxer combination (need libx264, libx265, libvpx or libvpx-vp9)"
            )));
        }

        tracing::info!(
            binary,
            encoders = backend.encoders.len(),
            muxers = backend.muxers.len(),
            "ffmpeg encoder backend probed"
        );
        Ok(backend)
    }

    /// Build from the text of `ffmpeg -encoders` and `ffmpeg -muxers`.
    pub fn from_listings(binary: &str, encoders: &str, muxers: &str) -> Self {
        Self {
            binary: binary.to_string(),
            encoders: parse_listing(encoders),
            muxers: parse_listing(muxers),
        }
    }

    fn has_encoder(&self, codec: VideoCodec) -> bool {
        self.encoders.contains(video_encoder(codec))
    }

    /// First listed audio encoder the container can carry.
    fn audio_encoder(&self, container: Container) -> Option<&'static str> {
        let candidates: &[&'static str] = match container {
            Container::Mp4 | Container::Mov => &["aac"],
            Container::Webm => &["libopus", "libvorbis"],
        };
        candidates.iter().copied().find(|name| self.encoders.contains(*name))
    }
}

impl EncoderBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn is_type_supported(&self, mime: &MimeType) -> bool {
        if !self.muxers.contains(muxer_name(mime.container)) || self.audio_encoder(mime.container).is_none() {
            return false;
        }
        match mime.codec {
            Some(codec) => mime.container.carries(codec) && self.has_encoder(codec),
            None => mime.container.codecs().iter().any(|c| self.has_encoder(*c)),
        }
    }

    fn open(&self, config: StreamConfig, events: EventSink) -> ClipforgeResult<Box<dyn EncoderStream>> {
        let audio_encoder = self.audio_encoder(config.container()).ok_or_else(|| {
            ClipforgeError::unsupported_format(format!("{} has no audio encoder for {}", self.binary, config.container()))
        })?;
        let stream = FfmpegStream::spawn(&self.binary, config, audio_encoder, events)?;
        Ok(Box::new(stream))
    }
}

struct FfmpegStream {
    binary: String,
    config: StreamConfig,
    audio_encoder: &'static str,
    events: EventSink,
    workdir: tempfile::TempDir,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stderr_task: Option<JoinHandle<String>>,
    audio: BufWriter<File>,
    audio_samples: u64,
    frames: u64,
}

impl FfmpegStream {
    fn spawn(
        binary: &str,
        config: StreamConfig,
        audio_encoder: &'static str,
        events: EventSink,
    ) -> ClipforgeResult<Self> {
        let workdir = tempfile::Builder::new()
            .prefix("clipforge-export-")
            .tempdir()
            .map_err(|e| ClipforgeError::capture(format!("Failed to create encoder work dir: {e}")))?;

        let audio = File::create(workdir.path().join("audio.f32"))
            .map_err(|e| ClipforgeError::capture(format!("Failed to create audio spool: {e}")))?;

        let args = video_args(&config, &workdir.path().join("video.mkv"));
        tracing::debug!(args = ?args, "Starting ffmpeg video encoder");

        let mut child = Command::new(binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ClipforgeError::capture(format!("Failed to start ffmpeg: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClipforgeError::capture("Failed to capture ffmpeg stdin"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ClipforgeError::capture("Failed to capture ffmpeg stderr"))?;

        // Drain stderr so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        tracing::info!(
            pid = child.id(),
            mime = %config.mime,
            width = config.width,
            height = config.height,
            fps = config.fps,
            bitrate = config.video_bitrate,
            "ffmpeg encoder started"
        );

        Ok(Self {
            binary: binary.to_string(),
            config,
            audio_encoder,
            events,
            workdir,
            child: Some(child),
            stdin: Some(BufWriter::new(stdin)),
            stderr_task: Some(stderr_task),
            audio: BufWriter::new(audio),
            audio_samples: 0,
            frames: 0,
        })
    }

    fn wait_video(&mut self) -> ClipforgeResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .flush()
                .map_err(|e| ClipforgeError::encoder(format!("Failed to flush frames to ffmpeg: {e}")))?;
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| ClipforgeError::encoder(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = self
            .stderr_task
            .take()
            .map(|task| {
                task.join()
                    .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
            })
            .unwrap_or_default();

        if !status.success() {
            return Err(ClipforgeError::encoder(format!(
                "ffmpeg video encode failed (status {status}): {}",
                stderr_output.trim()
            )));
        }
        Ok(())
    }

    fn mux(&mut self) -> ClipforgeResult<std::path::PathBuf> {
        self.audio
            .flush()
            .map_err(|e| ClipforgeError::encoder(format!("Failed to flush audio spool: {e}")))?;

        let dir = self.workdir.path();
        let output = dir.join(format!("output.{}", self.config.container().extension()));
        let audio = (self.audio_samples > 0).then(|| dir.join("audio.f32"));
        let args = mux_args(
            &self.config,
            self.audio_encoder,
            &dir.join("video.mkv"),
            audio.as_deref(),
            &output,
        );
        tracing::debug!(args = ?args, "Running ffmpeg mux pass");

        let result = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| ClipforgeError::encoder(format!("Failed to start ffmpeg mux: {e}")))?;
        if !result.status.success() {
            return Err(ClipforgeError::encoder(format!(
                "ffmpeg mux failed (status {}): {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(output)
    }

    fn kill(&mut self) {
        let stdin = self.stdin.take();
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        drop(stdin);
        if let Some(task) = self.stderr_task.take() {
            let _ = task.join();
        }
    }
}

impl EncoderStream for FfmpegStream {
    fn push_video(&mut self, rgba: &[u8]) -> ClipforgeResult<()> {
        if rgba.len() != self.config.frame_bytes() {
            return Err(ClipforgeError::encoder(format!(
                "Frame is {} bytes, expected {} for {}x{} RGBA",
                rgba.len(),
                self.config.frame_bytes(),
                self.config.width,
                self.config.height
            )));
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ClipforgeError::encoder("ffmpeg stdin already closed"))?;
        stdin.write_all(rgba).map_err(|e| {
            ClipforgeError::encoder(format!("ffmpeg stopped accepting frames at frame {}: {e}", self.frames))
        })?;
        self.frames += 1;
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> ClipforgeResult<()> {
        for sample in samples {
            self.audio
                .write_all(&sample.to_le_bytes())
                .map_err(|e| ClipforgeError::encoder(format!("Failed to spool audio: {e}")))?;
        }
        self.audio_samples += samples.len() as u64;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> ClipforgeResult<()> {
        self.wait_video()?;
        let output = self.mux()?;

        let mut file = File::open(&output)
            .map_err(|e| ClipforgeError::encoder(format!("Failed to open muxed output: {e}")))?;
        let mut total = 0usize;
        loop {
            let mut chunk = vec![0u8; CHUNK_SIZE];
            let n = file
                .read(&mut chunk)
                .map_err(|e| ClipforgeError::encoder(format!("Failed to read muxed output: {e}")))?;
            if n == 0 {
                break;
            }
            chunk.truncate(n);
            total += n;
            self.events.chunk(chunk);
        }

        tracing::info!(
            frames = self.frames,
            audio_samples = self.audio_samples,
            bytes = total,
            "ffmpeg encode finished"
        );
        self.events.finished();
        Ok(())
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        if self.child.is_some() {
            tracing::debug!("Killing unfinished ffmpeg encoder");
        }
        self.kill();
    }
}

fn run_listing(binary: &str, flag: &str) -> ClipforgeResult<String> {
    let output = Command::new(binary)
        .args(["-hide_banner", flag])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| ClipforgeError::unsupported(format!("{binary} is not available: {e}")))?;
    if !output.status.success() {
        return Err(ClipforgeError::unsupported(format!(
            "{binary} {flag} failed (status {})",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Names from an `ffmpeg -encoders` / `-muxers` listing.
///
/// Entries follow a `--` separator line; each is a flag column followed
/// by one or more comma-separated names.
fn parse_listing(text: &str) -> HashSet<String> {
    text.lines()
        .skip_while(|line| !line.trim_start().starts_with("--"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().nth(1))
        .flat_map(|names| names.split(','))
        .map(str::to_string)
        .collect()
}

fn video_encoder(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "libx264",
        VideoCodec::H265 => "libx265",
        VideoCodec::Vp8 => "libvpx",
        VideoCodec::Vp9 => "libvpx-vp9",
    }
}

fn muxer_name(container: Container) -> &'static str {
    match container {
        Container::Mp4 => "mp4",
        Container::Webm => "webm",
        Container::Mov => "mov",
    }
}

fn video_args(config: &StreamConfig, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "-hide_banner",
        "-loglevel",
        "error",
        "-f",
        "rawvideo",
        "-pix_fmt",
        "rgba",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    args.extend([
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-framerate".to_string(),
        config.fps.to_string(),
        "-i".to_string(),
        "-".to_string(),
        "-an".to_string(),
        // yuv420p needs even dimensions.
        "-vf".to_string(),
        "pad=ceil(iw/2)*2:ceil(ih/2)*2".to_string(),
        "-c:v".to_string(),
        video_encoder(config.codec).to_string(),
        "-b:v".to_string(),
        config.video_bitrate.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-g".to_string(),
        config.fps.saturating_mul(2).max(2).to_string(),
    ]);
    if matches!(config.codec, VideoCodec::H264 | VideoCodec::H265) {
        args.extend(["-preset".to_string(), "medium".to_string()]);
    }
    args.extend(["-y".to_string(), output.to_string_lossy().into_owned()]);
    args
}

fn mux_args(
    config: &StreamConfig,
    audio_encoder: &str,
    video: &Path,
    audio: Option<&Path>,
    output: &Path,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        video.to_string_lossy().into_owned(),
    ];
    if let Some(audio) = audio {
        args.extend([
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            config.sample_rate.to_string(),
            "-ac".to_string(),
            config.channels.to_string(),
            "-i".to_string(),
            audio.to_string_lossy().into_owned(),
        ]);
    }
    args.extend([
        "-map".to_string(),
        "0:v:0".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
    ]);
    match audio {
        Some(_) => args.extend([
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c:a".to_string(),
            audio_encoder.to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
        ]),
        None => args.push("-an".to_string()),
    }
    if matches!(config.container(), Container::Mp4 | Container::Mov) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args.extend([
        "-f".to_string(),
        muxer_name(config.container()).to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Capability;
    use clipforge_timeline_model::ExportFormat;

    const ENCODERS: &str = "Encoders:
 V..... = Video
 A..... = Audio
 ------
 V....D libx264              libx264 H.264 / AVC / MPEG-4 AVC (codec h264)
 V....D libvpx-vp9           libvpx VP9 (codec vp9)
 A....D aac                  AAC (Advanced Audio Coding)
 A....D libopus              libopus Opus (codec opus)
";

    const MUXERS: &str = "File formats:
 D. = Demuxing supported
 .E = Muxing supported
 --
  E mp4             MP4 (MPEG-4 Part 14)
  E webm            WebM
";

    fn backend() -> FfmpegBackend {
        FfmpegBackend::from_listings("ffmpeg", ENCODERS, MUXERS)
    }

    fn config(container: Container, codec: VideoCodec) -> StreamConfig {
        StreamConfig {
            mime: MimeType::with_codec(container, codec),
            codec,
            width: 641,
            height: 360,
            fps: 30,
            video_bitrate: 2_000_000,
            sample_rate: 48_000,
            channels: 2,
        }
    }

    #[test]
    fn test_parse_listing_skips_legend() {
        let names = parse_listing(ENCODERS);
        assert!(names.contains("libx264"));
        assert!(names.contains("libopus"));
        assert!(!names.contains("="));
        assert!(!names.contains("Video"));
    }

    #[test]
    fn test_support_follows_listings() {
        let ffmpeg = backend();
        assert!(ffmpeg.is_type_supported(&MimeType::with_codec(Container::Mp4, VideoCodec::H264)));
        assert!(!ffmpeg.is_type_supported(&MimeType::with_codec(Container::Mp4, VideoCodec::H265)));
        assert!(ffmpeg.is_type_supported(&MimeType::with_codec(Container::Webm, VideoCodec::Vp9)));
        assert!(!ffmpeg.is_type_supported(&MimeType::with_codec(Container::Webm, VideoCodec::Vp8)));
        // No mov muxer listed.
        assert!(!ffmpeg.is_type_supported(&MimeType::bare(Container::Mov)));
        assert!(ffmpeg.is_type_supported(&MimeType::bare(Container::Webm)));
        // Codec/container mismatch is never supported.
        assert!(!ffmpeg.is_type_supported(&MimeType::with_codec(Container::Mp4, VideoCodec::Vp9)));
    }

    #[test]
    fn test_resolve_codec_for_bare_container() {
        assert_eq!(backend().resolve_codec(Container::Webm), Some(VideoCodec::Vp9));
        assert_eq!(backend().resolve_codec(Container::Mov), None);
    }

    #[test]
    fn test_audio_encoder_per_container() {
        let ffmpeg = backend();
        assert_eq!(ffmpeg.audio_encoder(Container::Mp4), Some("aac"));
        assert_eq!(ffmpeg.audio_encoder(Container::Webm), Some("libopus"));
        let vorbis = FfmpegBackend::from_listings(
            "ffmpeg",
            "------\n V....D libvpx x\n A....D libvorbis x\n",
            MUXERS,
        );
        assert_eq!(vorbis.audio_encoder(Container::Webm), Some("libvorbis"));
    }

    #[test]
    fn test_container_without_audio_encoder_unsupported() {
        let video_only = FfmpegBackend::from_listings(
            "ffmpeg",
            "------\n V....D libvpx x\n V....D libx264 x\n",
            "--\n  E webm x\n  E mp4 x\n  E matroska x\n",
        );
        assert_eq!(video_only.audio_encoder(Container::Webm), None);
        assert_eq!(video_only.audio_encoder(Container::Mp4), None);
        assert!(!video_only.is_type_supported(&MimeType::with_codec(Container::Webm, VideoCodec::Vp8)));
        assert!(!video_only.is_type_supported(&MimeType::bare(Container::Webm)));
        assert!(!video_only.is_type_supported(&MimeType::with_codec(Container::Mp4, VideoCodec::H264)));
    }

    #[test]
    fn test_negotiation_rejects_container_without_audio_encoder() {
        let video_only = FfmpegBackend::from_listings(
            "ffmpeg",
            "------\n V....D libvpx x\n",
            "--\n  E webm x\n  E matroska x\n",
        );
        let cap = Capability::supported(video_only);
        let err = cap
            .negotiate(ExportFormat::new(Container::Webm, VideoCodec::Vp8))
            .unwrap_err();
        assert!(matches!(err, ClipforgeError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_video_args_pad_and_encoder() {
        let args = video_args(&config(Container::Mp4, VideoCodec::H264), Path::new("/tmp/v.mkv"));
        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "641x360"));
        assert!(args.windows(2).any(|w| w[0] == "-c:v" && w[1] == "libx264"));
        assert!(args.iter().any(|a| a.starts_with("pad=")));
        assert!(args.windows(2).any(|w| w[0] == "-preset" && w[1] == "medium"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/v.mkv"));
    }

    #[test]
    fn test_mux_args_mp4_with_audio() {
        let args = mux_args(
            &config(Container::Mp4, VideoCodec::H264),
            "aac",
            Path::new("v.mkv"),
            Some(Path::new("a.f32")),
            Path::new("out.mp4"),
        );
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "aac"));
        assert!(args.windows(2).any(|w| w[0] == "-movflags" && w[1] == "+faststart"));
        assert!(args.windows(2).any(|w| w[0] == "-ar" && w[1] == "48000"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "mp4"));
    }

    #[test]
    fn test_mux_args_webm_without_audio() {
        let args = mux_args(
            &config(Container::Webm, VideoCodec::Vp9),
            "libopus",
            Path::new("v.mkv"),
            None,
            Path::new("out.webm"),
        );
        assert!(args.iter().any(|a| a == "-an"));
        assert!(!args.iter().any(|a| a == "-movflags"));
        assert!(!args.iter().any(|a| a == "libopus"));
    }
}
