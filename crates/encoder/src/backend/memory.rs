//! In-memory backend that records every call.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use clipforge_common::error::{ClipforgeError, ClipforgeResult};
use clipforge_timeline_model::{Container, ExportFormat, VideoCodec};

use super::{EncoderBackend, EncoderStream, EventSink, StreamConfig};
use crate::format::{preference_list, MimeType};

/// Everything a [`MemoryBackend`] stream saw.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryLog {
    pub opened: Vec<StreamConfig>,
    pub frames: u64,
    pub audio_samples: u64,
    pub pauses: u64,
    pub resumes: u64,
    pub finished: u64,
    pub released: u64,
}

/// Backend for tests: encodes nothing, logs everything.
///
/// Each pushed frame emits a 16-byte chunk; `finish` emits an empty chunk,
/// a trailer and then `Finished`.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    supported: Option<HashSet<MimeType>>,
    fail_on_frame: Option<u64>,
    fail_on_open: bool,
    log: Arc<Mutex<MemoryLog>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Supports every MIME type.
    pub fn new() -> Self {
        Self {
            supported: None,
            fail_on_frame: None,
            fail_on_open: false,
            log: Arc::new(Mutex::new(MemoryLog::default())),
        }
    }

    /// Restrict support to the given MIME strings. Unparseable entries are
    /// ignored.
    pub fn with_supported_types<'a>(mut self, types: impl IntoIterator<Item = &'a str>) -> Self {
        self.supported = Some(types.into_iter().filter_map(|t| t.parse().ok()).collect());
        self
    }

    /// Support only the codecs of `container`.
    pub fn only_container(self, container: Container) -> Self {
        let types: Vec<String> = preference_list(ExportFormat::for_container(container))
            .iter()
            .map(ToString::to_string)
            .collect();
        self.with_supported_types(types.iter().map(String::as_str))
    }

    /// Report an encoder error when frame `index` is pushed.
    pub fn fail_on_frame(mut self, index: u64) -> Self {
        self.fail_on_frame = Some(index);
        self
    }

    /// Fail every `open` call.
    pub fn fail_on_open(mut self) -> Self {
        self.fail_on_open = true;
        self
    }

    /// Shared handle to the call log.
    pub fn log(&self) -> Arc<Mutex<MemoryLog>> {
        Arc::clone(&self.log)
    }

    /// Snapshot of the call log.
    pub fn snapshot(&self) -> MemoryLog {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

impl EncoderBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_type_supported(&self, mime: &MimeType) -> bool {
        if let Some(codec) = mime.codec {
            if !mime.container.carries(codec) {
                return false;
            }
        }
        match &self.supported {
            Some(types) => types.contains(mime),
            None => true,
        }
    }

    /// Nothing is really encoded, so a bare type takes the container default.
    fn resolve_codec(&self, container: Container) -> Option<VideoCodec> {
        let codec = container.default_codec();
        self.is_type_supported(&MimeType::bare(container)).then_some(codec)
    }

    fn open(&self, config: StreamConfig, events: EventSink) -> ClipforgeResult<Box<dyn EncoderStream>> {
        if self.fail_on_open {
            return Err(ClipforgeError::capture("memory backend refused to open"));
        }
        if let Ok(mut log) = self.log.lock() {
            log.opened.push(config);
        }
        Ok(Box::new(MemoryStream {
            config,
            events,
            fail_on_frame: self.fail_on_frame,
            frames: 0,
            log: Arc::clone(&self.log),
        }))
    }
}

struct MemoryStream {
    config: StreamConfig,
    events: EventSink,
    fail_on_frame: Option<u64>,
    frames: u64,
    log: Arc<Mutex<MemoryLog>>,
}

impl MemoryStream {
    fn record(&self, f: impl FnOnce(&mut MemoryLog)) {
        if let Ok(mut log) = self.log.lock() {
            f(&mut log);
        }
    }
}

impl EncoderStream for MemoryStream {
    fn push_video(&mut self, rgba: &[u8]) -> ClipforgeResult<()> {
        if rgba.len() != self.config.frame_bytes() {
            return Err(ClipforgeError::encoder(format!(
                "Frame is {} bytes, expected {}",
                rgba.len(),
                self.config.frame_bytes()
            )));
        }
        if self.fail_on_frame == Some(self.frames) {
            // Faults arrive asynchronously, like a real encoder callback.
            self.events.error(format!("injected fault at frame {}", self.frames));
        }
        self.frames += 1;
        self.record(|log| log.frames += 1);
        self.events.chunk(vec![0u8; 16]);
        Ok(())
    }

    fn push_audio(&mut self, samples: &[f32]) -> ClipforgeResult<()> {
        let n = samples.len() as u64;
        self.record(|log| log.audio_samples += n);
        Ok(())
    }

    fn pause(&mut self) -> ClipforgeResult<()> {
        self.record(|log| log.pauses += 1);
        Ok(())
    }

    fn resume(&mut self) -> ClipforgeResult<()> {
        self.record(|log| log.resumes += 1);
        Ok(())
    }

    fn finish(self: Box<Self>) -> ClipforgeResult<()> {
        self.record(|log| log.finished += 1);
        self.events.chunk(Vec::new());
        self.events.chunk(b"trailer".to_vec());
        self.events.finished();
        Ok(())
    }

    fn release(self: Box<Self>) {
        self.record(|log| log.released += 1);
    }
}
