//! The encoder state machine.

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::ExportSettings;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::backend::{Capability, EncoderEvent, EncoderStream, EventSink, StreamConfig};
use crate::format::{derive_bitrate, MimeType, NegotiatedFormat};

/// State of an [`Encoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingState {
    /// Nothing open.
    Inactive,
    /// Accepting frames.
    Recording,
    /// Open, but frames are dropped.
    Paused,
}

/// Why a frame is being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Freshly composited.
    Rendered,
    /// Repeat of the previous frame, for frame-rate upscaling.
    Duplicate,
}

/// One output video frame.
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    pub index: u64,
    pub origin: FrameOrigin,
    /// RGBA pixels, `width * height * 4` bytes.
    pub data: &'a [u8],
}

/// Interleaved `f32` audio in the encoder's configured format.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunk<'a> {
    pub samples: &'a [f32],
}

/// Counters for one encoder run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub frames_duplicated: u64,
    pub frames_skipped_paused: u64,
    /// Interleaved samples forwarded (all channels).
    pub audio_samples: u64,
    pub chunks: u64,
    pub bytes: u64,
}

/// The finished container.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub data: Vec<u8>,
    pub mime: MimeType,
    pub stats: EncoderStats,
}

/// Drives one backend stream from start to stop.
///
/// Negotiates a format on `start`, accepts frames in index order, and
/// appends emitted chunks to one buffer that `stop` hands back as the
/// whole container.
pub struct Encoder {
    capability: Capability,
    sample_rate: u32,
    channels: u16,
    state: RecordingState,
    stream: Option<Box<dyn EncoderStream>>,
    events: Option<mpsc::UnboundedReceiver<EncoderEvent>>,
    output: Vec<u8>,
    negotiated: Option<NegotiatedFormat>,
    next_frame: u64,
    finished: bool,
    stats: EncoderStats,
}

impl Encoder {
    /// An encoder for `capability`, with 48 kHz stereo audio.
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            sample_rate: 48_000,
            channels: 2,
            state: RecordingState::Inactive,
            stream: None,
            events: None,
            output: Vec::new(),
            negotiated: None,
            next_frame: 0,
            finished: false,
            stats: EncoderStats::default(),
        }
    }

    /// Builder-style audio format override.
    pub fn with_audio_format(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn negotiated(&self) -> Option<&NegotiatedFormat> {
        self.negotiated.as_ref()
    }

    pub fn stats(&self) -> &EncoderStats {
        &self.stats
    }

    /// Encoded bytes received so far and not yet returned by `stop`.
    pub fn buffered_bytes(&self) -> usize {
        self.output.len()
    }

    /// Index the next frame must carry.
    pub fn next_frame_index(&self) -> u64 {
        self.next_frame
    }

    /// Negotiate a format and open the backend stream.
    pub async fn start(&mut self, settings: &ExportSettings) -> ClipforgeResult<NegotiatedFormat> {
        if self.state != RecordingState::Inactive {
            return Err(ClipforgeError::invalid_state(format!(
                "Cannot start encoder while {:?}",
                self.state
            )));
        }

        let (mime, codec) = self.capability.negotiate(settings.format)?;
        let backend = self
            .capability
            .backend()
            .cloned()
            .ok_or_else(|| ClipforgeError::unsupported_format("No encoder backend"))?;

        let negotiated = NegotiatedFormat {
            mime,
            codec,
            video_bitrate: derive_bitrate(
                settings.width,
                settings.height,
                settings.fps,
                settings.quality,
                settings.bitrate_hint,
            ),
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
        };
        let config = StreamConfig {
            mime,
            codec,
            width: settings.width,
            height: settings.height,
            fps: settings.fps,
            video_bitrate: negotiated.video_bitrate,
            sample_rate: self.sample_rate,
            channels: self.channels,
        };

        // The channel exists before the stream so no event is lost.
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        let stream = tokio::task::spawn_blocking(move || backend.open(config, sink))
            .await
            .map_err(|e| ClipforgeError::capture(format!("Encoder open task failed: {e}")))?
            .map_err(|e| match e {
                ClipforgeError::Capture { .. } => e,
                other => ClipforgeError::capture(other.to_string()),
            })?;

        self.stream = Some(stream);
        self.events = Some(rx);
        self.output = Vec::new();
        self.negotiated = Some(negotiated);
        self.next_frame = 0;
        self.finished = false;
        self.stats = EncoderStats::default();
        self.state = RecordingState::Recording;

        tracing::info!(
            backend = self.capability.backend_name(),
            mime = %mime,
            codec = %codec,
            bitrate = negotiated.video_bitrate,
            "Encoder started"
        );
        Ok(negotiated)
    }

    /// Push the frame with the next index.
    pub fn capture_frame(&mut self, frame: VideoFrame<'_>) -> ClipforgeResult<()> {
        if self.state == RecordingState::Inactive {
            return Err(ClipforgeError::not_initialized("encoder not initialized"));
        }
        if frame.index != self.next_frame {
            return Err(ClipforgeError::encoder(format!(
                "Frame {} pushed out of order; expected {}",
                frame.index, self.next_frame
            )));
        }
        self.next_frame += 1;

        if self.state == RecordingState::Paused {
            self.stats.frames_skipped_paused += 1;
            return Ok(());
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ClipforgeError::not_initialized("encoder not initialized"))?;
        stream.push_video(frame.data)?;
        self.stats.frames_encoded += 1;
        if frame.origin == FrameOrigin::Duplicate {
            self.stats.frames_duplicated += 1;
        }
        Ok(())
    }

    pub fn push_audio(&mut self, chunk: AudioChunk<'_>) -> ClipforgeResult<()> {
        match self.state {
            RecordingState::Inactive => Err(ClipforgeError::not_initialized("encoder not initialized")),
            RecordingState::Paused => Ok(()),
            RecordingState::Recording => {
                let stream = self
                    .stream
                    .as_mut()
                    .ok_or_else(|| ClipforgeError::not_initialized("encoder not initialized"))?;
                stream.push_audio(chunk.samples)?;
                self.stats.audio_samples += chunk.samples.len() as u64;
                Ok(())
            }
        }
    }

    /// Pause a recording encoder. No-op in any other state.
    pub fn pause(&mut self) -> ClipforgeResult<()> {
        if self.state != RecordingState::Recording {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.pause()?;
        }
        self.state = RecordingState::Paused;
        tracing::info!("Encoder paused");
        Ok(())
    }

    /// Resume a paused encoder. No-op in any other state.
    pub fn resume(&mut self) -> ClipforgeResult<()> {
        if self.state != RecordingState::Paused {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.resume()?;
        }
        self.state = RecordingState::Recording;
        tracing::info!("Encoder resumed");
        Ok(())
    }

    /// Drain pending backend events. A backend error is fatal.
    pub fn poll_events(&mut self) -> ClipforgeResult<()> {
        let Some(rx) = self.events.as_mut() else {
            return Ok(());
        };
        let mut pending = Vec::new();
        while let Ok(event) = rx.try_recv() {
            pending.push(event);
        }
        for event in pending {
            self.handle_event(event)?;
        }
        Ok(())
    }

    /// Finalize the stream and return the container.
    ///
    /// The encoder is `Inactive` afterwards whether or not this succeeds.
    pub async fn stop(&mut self) -> ClipforgeResult<EncodedOutput> {
        if self.state == RecordingState::Inactive {
            return Err(ClipforgeError::not_initialized("encoder not initialized"));
        }
        let result = self.finalize().await;
        self.cleanup();
        result
    }

    /// Release everything and return to `Inactive`. Safe to call any
    /// number of times, in any state.
    pub fn cleanup(&mut self) {
        if let Some(stream) = self.stream.take() {
            tracing::debug!("Releasing unfinished encoder stream");
            stream.release();
        }
        self.events = None;
        self.output = Vec::new();
        self.finished = false;
        self.state = RecordingState::Inactive;
    }

    async fn finalize(&mut self) -> ClipforgeResult<EncodedOutput> {
        let negotiated = self
            .negotiated
            .ok_or_else(|| ClipforgeError::not_initialized("encoder not initialized"))?;
        let stream = self
            .stream
            .take()
            .ok_or_else(|| ClipforgeError::not_initialized("encoder not initialized"))?;

        let mut rx = self
            .events
            .take()
            .ok_or_else(|| ClipforgeError::not_initialized("encoder not initialized"))?;

        let mut finish = tokio::task::spawn_blocking(move || stream.finish());

        // Drain events while the backend flushes. A backend that returns
        // from `finish` has already queued everything it will send.
        loop {
            tokio::select! {
                joined = &mut finish => {
                    joined.map_err(|e| ClipforgeError::encoder(format!("Encoder finish task failed: {e}")))??;
                    break;
                }
                Some(event) = rx.recv() => self.handle_event(event)?,
            }
        }
        while let Ok(event) = rx.try_recv() {
            self.handle_event(event)?;
        }
        if !self.finished {
            tracing::warn!("Encoder backend returned without a completion event");
        }

        let data = std::mem::take(&mut self.output);
        self.stats.bytes = data.len() as u64;
        let stats = self.stats.clone();
        tracing::info!(
            frames = stats.frames_encoded,
            duplicated = stats.frames_duplicated,
            audio_samples = stats.audio_samples,
            bytes = stats.bytes,
            chunks = stats.chunks,
            "Encoder stopped"
        );
        Ok(EncodedOutput {
            data,
            mime: negotiated.output_mime(),
            stats,
        })
    }

    fn handle_event(&mut self, event: EncoderEvent) -> ClipforgeResult<()> {
        match event {
            EncoderEvent::Chunk(data) => {
                if !data.is_empty() {
                    self.stats.chunks += 1;
                    self.output.extend_from_slice(&data);
                }
                Ok(())
            }
            EncoderEvent::Error(message) => Err(ClipforgeError::encoder(message)),
            EncoderEvent::Finished => {
                self.finished = true;
                Ok(())
            }
        }
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use clipforge_timeline_model::{Container, ExportFormat, VideoCodec};

    fn settings() -> ExportSettings {
        let mut settings = ExportSettings::default().with_size(4, 2);
        settings.fps = 10;
        settings
    }

    fn frame(index: u64, data: &[u8]) -> VideoFrame<'_> {
        VideoFrame {
            index,
            origin: FrameOrigin::Rendered,
            data,
        }
    }

    const PIXELS: [u8; 32] = [255; 32];

    #[tokio::test]
    async fn test_start_push_stop() {
        let backend = MemoryBackend::new();
        let mut encoder = Encoder::new(Capability::supported(backend.clone()));
        let negotiated = encoder.start(&settings()).await.unwrap();
        assert_eq!(negotiated.mime.to_string(), "video/mp4; codecs=h264");
        assert_eq!(encoder.state(), RecordingState::Recording);

        for i in 0..3 {
            encoder.capture_frame(frame(i, &PIXELS)).unwrap();
        }
        encoder.push_audio(AudioChunk { samples: &[0.0; 96] }).unwrap();
        encoder.poll_events().unwrap();

        let output = encoder.stop().await.unwrap();
        assert_eq!(encoder.state(), RecordingState::Inactive);
        assert_eq!(output.mime, MimeType::with_codec(Container::Mp4, VideoCodec::H264));
        assert_eq!(output.stats.frames_encoded, 3);
        assert_eq!(output.stats.audio_samples, 96);
        // Three 16-byte frame chunks plus the trailer; the empty chunk is skipped.
        assert_eq!(output.stats.chunks, 4);
        assert_eq!(output.data.len(), 3 * 16 + 7);

        let log = backend.snapshot();
        assert_eq!(log.frames, 3);
        assert_eq!(log.finished, 1);
        assert_eq!(log.released, 0);
    }

    #[tokio::test]
    async fn test_stop_when_inactive_fails() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        let err = encoder.stop().await.unwrap_err();
        assert!(matches!(err, ClipforgeError::NotInitialized { .. }));
        assert!(err.to_string().contains("encoder not initialized"));
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid_state() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        encoder.start(&settings()).await.unwrap();
        let err = encoder.start(&settings()).await.unwrap_err();
        assert!(matches!(err, ClipforgeError::InvalidState { .. }));
        assert_eq!(encoder.state(), RecordingState::Recording);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        encoder.start(&settings()).await.unwrap();
        encoder.stop().await.unwrap();
        encoder.start(&settings()).await.unwrap();
        assert_eq!(encoder.next_frame_index(), 0);
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        let output = encoder.stop().await.unwrap();
        assert_eq!(output.stats.frames_encoded, 1);
    }

    #[tokio::test]
    async fn test_out_of_order_frame_is_runtime_error() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        encoder.start(&settings()).await.unwrap();
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        let err = encoder.capture_frame(frame(2, &PIXELS)).unwrap_err();
        assert!(matches!(err, ClipforgeError::EncoderRuntime { .. }));
        let err = encoder.capture_frame(frame(0, &PIXELS)).unwrap_err();
        assert!(matches!(err, ClipforgeError::EncoderRuntime { .. }));
    }

    #[tokio::test]
    async fn test_capture_when_inactive() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        let err = encoder.capture_frame(frame(0, &PIXELS)).unwrap_err();
        assert!(matches!(err, ClipforgeError::NotInitialized { .. }));
        let err = encoder.push_audio(AudioChunk { samples: &[] }).unwrap_err();
        assert!(matches!(err, ClipforgeError::NotInitialized { .. }));
    }

    #[tokio::test]
    async fn test_pause_skips_frames_but_advances_index() {
        let backend = MemoryBackend::new();
        let mut encoder = Encoder::new(Capability::supported(backend.clone()));
        encoder.start(&settings()).await.unwrap();
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        encoder.pause().unwrap();
        encoder.pause().unwrap();
        assert_eq!(encoder.state(), RecordingState::Paused);
        encoder.capture_frame(frame(1, &PIXELS)).unwrap();
        encoder.push_audio(AudioChunk { samples: &[0.5; 8] }).unwrap();
        encoder.resume().unwrap();
        encoder.capture_frame(frame(2, &PIXELS)).unwrap();

        let output = encoder.stop().await.unwrap();
        assert_eq!(output.stats.frames_encoded, 2);
        assert_eq!(output.stats.frames_skipped_paused, 1);
        assert_eq!(output.stats.audio_samples, 0);
        let log = backend.snapshot();
        assert_eq!((log.pauses, log.resumes), (1, 1));
    }

    #[tokio::test]
    async fn test_resume_when_recording_is_noop() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        encoder.resume().unwrap();
        encoder.pause().unwrap();
        assert_eq!(encoder.state(), RecordingState::Inactive);
        encoder.start(&settings()).await.unwrap();
        encoder.resume().unwrap();
        assert_eq!(encoder.state(), RecordingState::Recording);
    }

    #[tokio::test]
    async fn test_duplicates_are_counted() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        encoder.start(&settings()).await.unwrap();
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        encoder
            .capture_frame(VideoFrame {
                index: 1,
                origin: FrameOrigin::Duplicate,
                data: &PIXELS,
            })
            .unwrap();
        let output = encoder.stop().await.unwrap();
        assert_eq!(output.stats.frames_encoded, 2);
        assert_eq!(output.stats.frames_duplicated, 1);
    }

    #[tokio::test]
    async fn test_unsupported_format_allocates_nothing() {
        let backend = MemoryBackend::new().only_container(Container::Webm);
        let mut encoder = Encoder::new(Capability::supported(backend.clone()));
        let err = encoder.start(&settings()).await.unwrap_err();
        assert!(matches!(err, ClipforgeError::UnsupportedFormat { .. }));
        assert_eq!(encoder.state(), RecordingState::Inactive);
        assert!(backend.snapshot().opened.is_empty());
    }

    #[tokio::test]
    async fn test_open_failure_is_capture_error() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new().fail_on_open()));
        let err = encoder.start(&settings()).await.unwrap_err();
        assert!(matches!(err, ClipforgeError::Capture { .. }));
        assert_eq!(encoder.state(), RecordingState::Inactive);
    }

    #[tokio::test]
    async fn test_backend_fault_surfaces_on_poll() {
        let backend = MemoryBackend::new().fail_on_frame(1);
        let mut encoder = Encoder::new(Capability::supported(backend.clone()));
        encoder.start(&settings()).await.unwrap();
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        encoder.poll_events().unwrap();
        encoder.capture_frame(frame(1, &PIXELS)).unwrap();
        let err = encoder.poll_events().unwrap_err();
        assert!(matches!(err, ClipforgeError::EncoderRuntime { .. }));

        encoder.cleanup();
        assert_eq!(encoder.state(), RecordingState::Inactive);
        assert_eq!(backend.snapshot().released, 1);
    }

    #[tokio::test]
    async fn test_cleanup_is_idempotent() {
        let backend = MemoryBackend::new();
        let mut encoder = Encoder::new(Capability::supported(backend.clone()));
        encoder.cleanup();
        encoder.start(&settings()).await.unwrap();
        encoder.cleanup();
        encoder.cleanup();
        assert_eq!(encoder.state(), RecordingState::Inactive);
        assert_eq!(backend.snapshot().released, 1);
        drop(encoder);
        assert_eq!(backend.snapshot().released, 1);
    }

    #[tokio::test]
    async fn test_chunks_accumulate_in_one_buffer() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        encoder.start(&settings()).await.unwrap();
        for i in 0..2 {
            encoder.capture_frame(frame(i, &PIXELS)).unwrap();
        }
        encoder.poll_events().unwrap();
        assert_eq!(encoder.buffered_bytes(), 2 * 16);

        let output = encoder.stop().await.unwrap();
        assert_eq!(output.data.len(), 2 * 16 + 7);
        assert_eq!(output.stats.bytes, output.data.len() as u64);
        assert_eq!(encoder.buffered_bytes(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_while_paused() {
        let backend = MemoryBackend::new();
        let mut encoder = Encoder::new(Capability::supported(backend.clone()));
        encoder.start(&settings()).await.unwrap();
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        encoder.pause().unwrap();
        assert_eq!(encoder.state(), RecordingState::Paused);

        encoder.cleanup();
        assert_eq!(encoder.state(), RecordingState::Inactive);
        let log = backend.snapshot();
        assert_eq!(log.released, 1);
        assert_eq!(log.finished, 0);

        let err = encoder.capture_frame(frame(1, &PIXELS)).unwrap_err();
        assert!(matches!(err, ClipforgeError::NotInitialized { .. }));

        encoder.start(&settings()).await.unwrap();
        assert_eq!(encoder.state(), RecordingState::Recording);
        assert_eq!(encoder.next_frame_index(), 0);
        encoder.capture_frame(frame(0, &PIXELS)).unwrap();
        let output = encoder.stop().await.unwrap();
        assert_eq!(output.stats.frames_encoded, 1);
    }

    #[tokio::test]
    async fn test_webm_negotiation_via_settings() {
        let mut encoder = Encoder::new(Capability::supported(MemoryBackend::new()));
        let mut settings = settings();
        settings.format = ExportFormat::new(Container::Webm, VideoCodec::Vp8);
        let negotiated = encoder.start(&settings).await.unwrap();
        assert_eq!(negotiated.codec, VideoCodec::Vp8);
        let output = encoder.stop().await.unwrap();
        assert_eq!(output.mime.to_string(), "video/webm; codecs=vp8");
    }
}
