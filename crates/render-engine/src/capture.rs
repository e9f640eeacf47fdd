//! Frame sampling: which elements are visible at a given instant.

use clipforge_timeline_model::{Element, Timeline, TrackKind};
use serde::Serialize;

/// Tolerance for float noise when counting frames.
const FRAME_EPSILON: f64 = 1e-9;

/// One element active at the snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedElement {
    pub track_index: usize,
    pub track_kind: TrackKind,
    pub track_muted: bool,
    pub element: Element,

    /// Seconds since the element started.
    pub local_time: f64,

    /// Position in the source media, including trim.
    pub source_time: f64,
}

/// Every active element at `time`, bottom to top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameSnapshot {
    pub time: f64,
    pub elements: Vec<ResolvedElement>,
}

impl FrameSnapshot {
    pub fn empty(time: f64) -> Self {
        Self {
            time,
            elements: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// IDs in draw order.
    pub fn element_ids(&self) -> Vec<&str> {
        self.elements.iter().map(|r| r.element.id.as_str()).collect()
    }
}

/// Stateless sampler over a timeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCaptureService;

impl FrameCaptureService {
    /// Number of frames needed to cover `duration` at `fps`.
    pub fn total_frames(duration: f64, fps: u32) -> u64 {
        if !duration.is_finite() || duration <= 0.0 || fps == 0 {
            return 0;
        }
        (duration * fps as f64 - FRAME_EPSILON).ceil().max(0.0) as u64
    }

    /// Timeline time of frame `index`.
    pub fn frame_time(index: u64, fps: u32) -> f64 {
        if fps == 0 {
            return 0.0;
        }
        index as f64 / fps as f64
    }

    /// Elements active at `t`, ordered by track then start time.
    ///
    /// An element is active on `[start_time, start_time + duration)`.
    /// Times outside the timeline (or NaN) give an empty snapshot.
    pub fn snapshot(timeline: &Timeline, t: f64) -> FrameSnapshot {
        if !t.is_finite() || t < 0.0 || t >= timeline.total_duration() {
            return FrameSnapshot::empty(t);
        }

        let mut elements = Vec::new();
        for (track_index, track) in timeline.tracks.iter().enumerate() {
            let mut active: Vec<&Element> = track.elements.iter().filter(|el| el.is_active_at(t)).collect();
            active.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

            elements.extend(active.into_iter().map(|el| {
                let local_time = t - el.start_time;
                ResolvedElement {
                    track_index,
                    track_kind: track.kind,
                    track_muted: track.muted,
                    element: el.clone(),
                    local_time,
                    source_time: el.trim_start + local_time,
                }
            }));
        }

        FrameSnapshot { time: t, elements }
    }

    pub fn snapshot_at_frame(timeline: &Timeline, index: u64, fps: u32) -> FrameSnapshot {
        Self::snapshot(timeline, Self::frame_time(index, fps))
    }
}
