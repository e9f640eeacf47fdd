use clipforge_timeline_model::{CropRect, Element, Timeline, Track, TrackKind};
use proptest::prelude::*;

proptest! {
    #[test]
    fn crop_pixels_stay_inside_source(
        x in -0.5f64..1.5,
        y in -0.5f64..1.5,
        w in 0.0f64..2.0,
        h in 0.0f64..2.0,
        width in 1u32..4096,
        height in 1u32..4096,
    ) {
        if let Some(rect) = CropRect::new(x, y, w, h).to_pixels(width, height) {
            prop_assert!(rect.width > 0 && rect.height > 0);
            prop_assert!(rect.x + rect.width <= width);
            prop_assert!(rect.y + rect.height <= height);
        }
    }

    #[test]
    fn total_duration_bounds_every_element(
        spans in prop::collection::vec((0.0f64..100.0, 0.01f64..50.0), 1..20)
    ) {
        let mut track = Track::new("v", TrackKind::Video);
        for (i, (start, duration)) in spans.iter().enumerate() {
            track.elements.push(Element::image(format!("e{i}"), "img", *start, *duration));
        }
        let timeline = Timeline::new().with_track(track);
        let total = timeline.total_duration();
        for track in &timeline.tracks {
            for el in &track.elements {
                prop_assert!(el.end_time() <= total);
                prop_assert!(!el.is_active_at(total));
            }
        }
    }
}
