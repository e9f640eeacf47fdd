use clipforge_render_engine::FrameCaptureService;
use clipforge_timeline_model::{Element, Timeline, Track, TrackKind};
use proptest::prelude::*;

fn timeline_from(spans: &[(f64, f64)]) -> Timeline {
    let mut track = Track::new("v1", TrackKind::Video);
    for (i, (start, duration)) in spans.iter().enumerate() {
        track = track.with_element(Element::image(format!("e{i}"), "img", *start, *duration));
    }
    Timeline::new()
        .with_track(track)
        .with_track(Track::new("t1", TrackKind::Video).with_element(Element::text("title", "Hi", 0.5, 3.0)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn snapshot_is_deterministic(
        spans in proptest::collection::vec((0.0f64..10.0, 0.01f64..5.0), 0..8),
        t in -1.0f64..16.0,
    ) {
        let timeline = timeline_from(&spans);
        let a = serde_json::to_string(&FrameCaptureService::snapshot(&timeline, t)).unwrap();
        let b = serde_json::to_string(&FrameCaptureService::snapshot(&timeline, t)).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn shared_boundary_belongs_to_exactly_one_element(
        start_q in 0u32..40,
        first_q in 1u32..40,
        second_q in 1u32..40,
    ) {
        // Eighths are exact in binary, so the boundary carries no rounding.
        let start = start_q as f64 / 8.0;
        let first = first_q as f64 / 8.0;
        let second = second_q as f64 / 8.0;
        let boundary = start + first;
        let timeline = Timeline::new().with_track(
            Track::new("v1", TrackKind::Video)
                .with_element(Element::image("first", "img", start, first))
                .with_element(Element::image("second", "img", boundary, second)),
        );

        let at = FrameCaptureService::snapshot(&timeline, boundary);
        prop_assert_eq!(at.element_ids(), vec!["second"]);

        let before = FrameCaptureService::snapshot(&timeline, boundary - 1e-6);
        prop_assert_eq!(before.element_ids(), vec!["first"]);
    }

    #[test]
    fn snapshot_respects_half_open_spans(
        spans in proptest::collection::vec((0.0f64..10.0, 0.01f64..5.0), 1..8),
        t in 0.0f64..15.0,
    ) {
        let timeline = timeline_from(&spans);
        let snap = FrameCaptureService::snapshot(&timeline, t);
        for resolved in &snap.elements {
            let el = &resolved.element;
            prop_assert!(el.start_time <= t && t < el.start_time + el.duration);
        }
        let expected = timeline
            .tracks
            .iter()
            .flat_map(|track| track.elements.iter())
            .filter(|el| el.start_time <= t && t < el.start_time + el.duration)
            .count();
        prop_assert_eq!(snap.elements.len(), expected);
    }

    #[test]
    fn frame_count_covers_duration(duration in 0.01f64..120.0, fps in 1u32..120) {
        let frames = FrameCaptureService::total_frames(duration, fps);
        prop_assert!(frames as f64 / fps as f64 >= duration - 1e-6);
        prop_assert!((frames.saturating_sub(1)) as f64 / (fps as f64) < duration);
    }
}
