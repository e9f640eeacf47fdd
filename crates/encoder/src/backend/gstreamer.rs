//! GStreamer backend: `appsrc` in, streamable muxer, `appsink` out.

use std::sync::OnceLock;
use std::time::Duration;

use ::gstreamer as gst;
use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{Container, VideoCodec};
use gst::prelude::*;
use gstreamer_app as gst_app;

use super::{EncoderBackend, EncoderStream, EventSink, StreamConfig};
use crate::format::{MimeType, AUDIO_BITRATE};

/// Encodes through an in-process GStreamer pipeline.
#[derive(Debug, Clone, Default)]
pub struct GstBackend;

impl GstBackend {
    /// Initialize GStreamer and check that at least one container can be
    /// produced.
    pub fn probe() -> ClipforgeResult<Self> {
        init_gstreamer()?;
        let backend = GstBackend;
        if !Container::ALL
            .into_iter()
            .any(|c| backend.is_type_supported(&MimeType::bare(c)))
        {
            return Err(ClipforgeError::unsupported(
                "GStreamer is missing the encoder or muxer plugins (x264enc/vp8enc/vp9enc, mp4mux/webmmux)",
            ));
        }
        Ok(backend)
    }
}

impl EncoderBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn is_type_supported(&self, mime: &MimeType) -> bool {
        if init_gstreamer().is_err() {
            return false;
        }
        let container = mime.container;
        if !has_factory(muxer_factory(container)) || !has_factory(audio_encoder_factory(container)) {
            return false;
        }
        match mime.codec {
            Some(codec) => container.carries(codec) && has_factory(video_encoder_factory(codec)),
            None => container
                .codecs()
                .iter()
                .any(|c| has_factory(video_encoder_factory(*c))),
        }
    }

    fn open(&self, config: StreamConfig, events: EventSink) -> ClipforgeResult<Box<dyn EncoderStream>> {
        init_gstreamer()?;
        Ok(Box::new(GstStream::start(config, events)?))
    }
}

struct GstStream {
    pipeline: gst::Pipeline,
    video_src: gst_app::AppSrc,
    audio_src: gst_app::AppSrc,
    config: StreamConfig,
    events: EventSink,
    frames: u64,
    audio_frames: u64,
}

impl GstStream {
    fn start(config: StreamConfig, events: EventSink) -> ClipforgeResult<Self> {
        let launch = launch_string(&config);
        tracing::debug!(launch = %launch, "Building GStreamer encode pipeline");

        let pipeline = gst::parse::launch(&launch)
            .map_err(|e| ClipforgeError::capture(format!("Failed to build pipeline: {e}")))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| ClipforgeError::capture("Launch string did not produce a pipeline"))?;

        let video_src = app_element::<gst_app::AppSrc>(&pipeline, "vsrc")?;
        let audio_src = app_element::<gst_app::AppSrc>(&pipeline, "asrc")?;
        let sink = app_element::<gst_app::AppSink>(&pipeline, "sink")?;

        let chunk_events = events.clone();
        sink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if let Some(buffer) = sample.buffer() {
                        let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                        chunk_events.chunk(map.as_slice().to_vec());
                    }
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let bus = pipeline
            .bus()
            .ok_or_else(|| ClipforgeError::capture("Pipeline has no bus"))?;
        let error_events = events.clone();
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                error_events.error(format!("GStreamer error: {}", err.error()));
            }
            gst::BusSyncReply::Pass
        });

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            ClipforgeError::capture(format!("Failed to start encode pipeline: {e:?}"))
        })?;

        tracing::info!(mime = %config.mime, "GStreamer encoder started");
        Ok(Self {
            pipeline,
            video_src,
            audio_src,
            config,
            events,
            frames: 0,
            audio_frames: 0,
        })
    }

    fn drain_eos(&self) -> ClipforgeResult<()> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        let deadline = Duration::from_secs(10);
        let start = std::time::Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                tracing::warn!("EOS drain timed out after 10s");
                return Ok(());
            }
            let remaining = gst::ClockTime::from_nseconds((deadline - elapsed).as_nanos() as u64);
            match bus.timed_pop(remaining) {
                Some(msg) => match msg.view() {
                    gst::MessageView::Eos(_) => {
                        tracing::debug!("EOS received; encode pipeline drained");
                        return Ok(());
                    }
                    gst::MessageView::Error(e) => {
                        return Err(ClipforgeError::encoder(format!(
                            "Pipeline error during EOS drain: {}",
                            e.error()
                        )));
                    }
                    _ => {}
                },
                None => {
                    tracing::warn!("EOS drain timed out after 10s");
                    return Ok(());
                }
            }
        }
    }

    fn shutdown(&self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(error = ?e, "Failed to set encode pipeline to Null");
        }
    }
}

impl EncoderStream for GstStream {
    fn push_video(&mut self, rgba: &[u8]) -> ClipforgeResult<()> {
        if rgba.len() != self.config.frame_bytes() {
            return Err(ClipforgeError::encoder(format!(
                "Frame is {} bytes, expected {}",
                rgba.len(),
                self.config.frame_bytes()
            )));
        }
        let fps = self.config.fps.max(1) as u64;
        let pts = self.frames * 1_000_000_000 / fps;
        let next = (self.frames + 1) * 1_000_000_000 / fps;

        let mut buffer = gst::Buffer::from_mut_slice(rgba.to_vec());
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(gst::ClockTime::from_nseconds(pts));
            buf.set_duration(gst::ClockTime::from_nseconds(next - pts));
        }
        self.video_src
            .push_buffer(buffer)
            .map_err(|e| ClipforgeError::encoder(format!("Video appsrc rejected frame {}: {e:?}", self.frames)))?;
        self.frames += 1;
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> ClipforgeResult<()> {
        let channels = self.config.channels.max(1) as u64;
        let rate = self.config.sample_rate.max(1) as u64;
        let frames = samples.len() as u64 / channels;
        if frames == 0 {
            return Ok(());
        }
        let pts = self.audio_frames * 1_000_000_000 / rate;
        let end = (self.audio_frames + frames) * 1_000_000_000 / rate;

        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut buffer = gst::Buffer::from_mut_slice(bytes);
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(gst::ClockTime::from_nseconds(pts));
            buf.set_duration(gst::ClockTime::from_nseconds(end - pts));
        }
        self.audio_src
            .push_buffer(buffer)
            .map_err(|e| ClipforgeError::encoder(format!("Audio appsrc rejected buffer: {e:?}")))?;
        self.audio_frames += frames;
        Ok(())
    }

    fn finish(self: Box<Self>) -> ClipforgeResult<()> {
        let _ = self.video_src.end_of_stream();
        let _ = self.audio_src.end_of_stream();
        let drained = self.drain_eos();
        self.shutdown();
        drained?;

        tracing::info!(frames = self.frames, audio_frames = self.audio_frames, "GStreamer encode finished");
        self.events.finished();
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.shutdown();
    }
}

impl Drop for GstStream {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

fn app_element<T: IsA<gst::Element>>(pipeline: &gst::Pipeline, name: &str) -> ClipforgeResult<T> {
    pipeline
        .by_name(name)
        .ok_or_else(|| ClipforgeError::capture(format!("Pipeline has no element named {name}")))?
        .dynamic_cast::<T>()
        .map_err(|_| ClipforgeError::capture(format!("Element {name} has an unexpected type")))
}

fn launch_string(config: &StreamConfig) -> String {
    let StreamConfig {
        width,
        height,
        fps,
        sample_rate,
        channels,
        ..
    } = *config;
    let container = config.container();
    let keyint = fps.saturating_mul(2).max(2);
    let kbps = (config.video_bitrate / 1000).max(1);

    let video_enc = match config.codec {
        VideoCodec::H264 => format!("x264enc bitrate={kbps} key-int-max={keyint} speed-preset=medium ! h264parse"),
        VideoCodec::H265 => format!("x265enc bitrate={kbps} key-int-max={keyint} ! h265parse"),
        VideoCodec::Vp8 => format!("vp8enc target-bitrate={} keyframe-max-dist={keyint}", config.video_bitrate),
        VideoCodec::Vp9 => format!("vp9enc target-bitrate={} keyframe-max-dist={keyint}", config.video_bitrate),
    };
    let audio_enc = match container {
        Container::Mp4 | Container::Mov => format!("avenc_aac bitrate={AUDIO_BITRATE} ! aacparse"),
        Container::Webm => format!("opusenc bitrate={AUDIO_BITRATE}"),
    };
    let mux = match container {
        Container::Mp4 => "mp4mux name=mux fragment-duration=1000",
        Container::Mov => "qtmux name=mux fragment-duration=1000",
        Container::Webm => "webmmux name=mux streamable=true",
    };

    format!(
        "appsrc name=vsrc format=time caps=video/x-raw,format=RGBA,width={width},height={height},framerate={fps}/1 \
         ! videoconvert ! video/x-raw,format=I420 ! {video_enc} ! queue ! mux. \
         appsrc name=asrc format=time caps=audio/x-raw,format=F32LE,layout=interleaved,rate={sample_rate},channels={channels} \
         ! audioconvert ! audioresample ! {audio_enc} ! queue ! mux. \
         {mux} ! appsink name=sink sync=false"
    )
}

fn video_encoder_factory(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "x264enc",
        VideoCodec::H265 => "x265enc",
        VideoCodec::Vp8 => "vp8enc",
        VideoCodec::Vp9 => "vp9enc",
    }
}

fn audio_encoder_factory(container: Container) -> &'static str {
    match container {
        Container::Mp4 | Container::Mov => "avenc_aac",
        Container::Webm => "opusenc",
    }
}

fn muxer_factory(container: Container) -> &'static str {
    match container {
        Container::Mp4 => "mp4mux",
        Container::Mov => "qtmux",
        Container::Webm => "webmmux",
    }
}

fn has_factory(name: &str) -> bool {
    gst::ElementFactory::find(name).is_some()
}

fn init_gstreamer() -> ClipforgeResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(ClipforgeError::unsupported(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}
