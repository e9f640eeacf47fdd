//! Tracks and the timeline that orders them.

use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementKind};

/// The full ordered collection of tracks for one project.
///
/// Track order is z-order: later tracks draw on top of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    #[serde(default)]
    pub tracks: Vec<Track>,
}

/// An independent compositing or mixing channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(alias = "type")]
    pub kind: TrackKind,

    /// A muted track contributes no audio.
    #[serde(default)]
    pub muted: bool,

    /// Elements ordered by start time.
    #[serde(default)]
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[serde(alias = "media", alias = "text")]
    Video,
    Audio,
}

impl Track {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            kind,
            muted: false,
            elements: Vec::new(),
        }
    }

    /// Builder-style element append.
    pub fn with_element(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    /// Builder-style mute flag.
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    /// End of the last element on this track.
    pub fn end_time(&self) -> f64 {
        self.elements
            .iter()
            .map(Element::end_time)
            .fold(0.0, f64::max)
    }
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_track(mut self, track: Track) -> Self {
        self.tracks.push(track);
        self
    }

    /// Max over all elements of `start_time + duration`.
    pub fn total_duration(&self) -> f64 {
        self.tracks
            .iter()
            .map(Track::end_time)
            .fold(0.0, f64::max)
    }

    /// Whether the timeline has no elements at all.
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(|t| t.elements.is_empty())
    }

    /// Total number of elements across all tracks.
    pub fn element_count(&self) -> usize {
        self.tracks.iter().map(|t| t.elements.len()).sum()
    }

    /// Find an element by ID.
    pub fn find_element(&self, id: &str) -> Option<(usize, &Element)> {
        self.tracks.iter().enumerate().find_map(|(index, track)| {
            track
                .elements
                .iter()
                .find(|el| el.id == id)
                .map(|el| (index, el))
        })
    }

    /// Check the assumptions the export path relies on.
    ///
    /// Returns human-readable issues. The editor is expected to uphold these,
    /// so an export still proceeds when issues exist.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = vec![];

        for track in &self.tracks {
            for el in &track.elements {
                if !el.start_time.is_finite() || el.start_time < 0.0 {
                    issues.push(format!("Element {} has invalid start time {}", el.id, el.start_time));
                }
                if !el.duration.is_finite() || el.duration <= 0.0 {
                    issues.push(format!("Element {} has non-positive duration {}", el.id, el.duration));
                }
                if el.trim_start < 0.0 || el.trim_end < 0.0 {
                    issues.push(format!("Element {} has negative trim", el.id));
                }
                if !(0.0..=1.0).contains(&el.opacity) {
                    issues.push(format!("Element {} opacity {} outside [0, 1]", el.id, el.opacity));
                }
                if let Some(audio) = el.audio_params() {
                    if !(0.0..=1.0).contains(&audio.volume) {
                        issues.push(format!("Element {} volume {} outside [0, 1]", el.id, audio.volume));
                    }
                    if !(-1.0..=1.0).contains(&audio.pan) {
                        issues.push(format!("Element {} pan {} outside [-1, 1]", el.id, audio.pan));
                    }
                }
                if track.kind == TrackKind::Audio && el.is_visual() {
                    issues.push(format!(
                        "Element {} is a {} element on audio track {}",
                        el.id,
                        el.kind_name(),
                        track.id
                    ));
                }
                if let ElementKind::Text(text) = &el.kind {
                    if text.font_size <= 0.0 {
                        issues.push(format!("Text element {} has non-positive font size", el.id));
                    }
                }
            }

            let mut sorted: Vec<&Element> = track.elements.iter().collect();
            sorted.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
            for pair in sorted.windows(2) {
                if pair[1].start_time < pair[0].end_time() {
                    issues.push(format!(
                        "Elements {} and {} overlap on track {}",
                        pair[0].id, pair[1].id, track.id
                    ));
                }
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_timeline() -> Timeline {
        Timeline::new()
            .with_track(
                Track::new("v1", TrackKind::Video)
                    .with_element(Element::video("a", "cam", 0.0, 5.0))
                    .with_element(Element::image("b", "logo", 5.0, 2.5)),
            )
            .with_track(
                Track::new("a1", TrackKind::Audio)
                    .with_element(Element::audio("c", "music", 1.0, 3.0, 0.8)),
            )
    }

    #[test]
    fn test_total_duration_is_latest_end() {
        assert!((sample_timeline().total_duration() - 7.5).abs() < 1e-9);
        assert_eq!(Timeline::new().total_duration(), 0.0);
    }

    #[test]
    fn test_empty_and_counts() {
        assert!(Timeline::new().is_empty());
        assert!(Timeline::new()
            .with_track(Track::new("v", TrackKind::Video))
            .is_empty());
        let timeline = sample_timeline();
        assert!(!timeline.is_empty());
        assert_eq!(timeline.element_count(), 3);
        assert_eq!(timeline.find_element("c").map(|(i, _)| i), Some(1));
    }

    #[test]
    fn test_validate_clean_timeline() {
        assert!(sample_timeline().validate().is_empty());
    }

    #[test]
    fn test_validate_reports_overlap_and_bad_values() {
        let mut bad = Element::audio("loud", "music", 0.0, 2.0, 1.5);
        bad.opacity = 2.0;
        let timeline = Timeline::new().with_track(
            Track::new("v1", TrackKind::Video)
                .with_element(Element::video("a", "cam", 0.0, 5.0))
                .with_element(Element::video("b", "cam", 4.0, 2.0))
                .with_element(bad),
        );
        let issues = timeline.validate();
        assert!(issues.iter().any(|i| i.contains("overlap")));
        assert!(issues.iter().any(|i| i.contains("volume")));
        assert!(issues.iter().any(|i| i.contains("opacity")));
    }

    #[test]
    fn test_editor_track_kinds_deserialize() {
        let json = r#"{"tracks": [
            {"id": "t1", "type": "media", "elements": []},
            {"id": "t2", "kind": "text"},
            {"id": "t3", "kind": "audio", "muted": true}
        ]}"#;
        let timeline: Timeline = serde_json::from_str(json).unwrap();
        assert_eq!(timeline.tracks[0].kind, TrackKind::Video);
        assert_eq!(timeline.tracks[1].kind, TrackKind::Video);
        assert_eq!(timeline.tracks[2].kind, TrackKind::Audio);
        assert!(timeline.tracks[2].muted);
    }
}
