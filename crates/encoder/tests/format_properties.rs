use clipforge_encoder::{derive_bitrate, preference_list, MimeType};
use clipforge_timeline_model::{Container, ExportFormat, ExportQuality};
use proptest::prelude::*;

fn any_format() -> impl Strategy<Value = ExportFormat> {
    (0usize..3, 0usize..2).prop_map(|(c, k)| {
        let container = Container::ALL[c];
        ExportFormat::new(container, container.codecs()[k])
    })
}

fn any_quality() -> impl Strategy<Value = ExportQuality> {
    prop_oneof![
        Just(ExportQuality::Low),
        Just(ExportQuality::Medium),
        Just(ExportQuality::High)
    ]
}

proptest! {
    #[test]
    fn preference_list_stays_in_container(format in any_format()) {
        let list = preference_list(format);
        prop_assert_eq!(list[0], MimeType::with_codec(format.container, format.codec));
        prop_assert_eq!(list.len(), format.container.codecs().len() + 1);
        prop_assert!(list.iter().all(|m| m.container == format.container));
    }

    #[test]
    fn mime_strings_parse_back(format in any_format()) {
        for mime in preference_list(format) {
            let parsed: MimeType = mime.to_string().parse().unwrap();
            prop_assert_eq!(parsed, mime);
        }
    }

    #[test]
    fn bitrate_within_bounds(
        width in 16u32..7680,
        height in 16u32..4320,
        fps in 1u32..120,
        quality in any_quality(),
        hint in proptest::option::of(1u64..50_000_000),
    ) {
        let bitrate = derive_bitrate(width, height, fps, quality, hint);
        let scale = (width as f64 * height as f64 / (1920.0 * 1080.0)).max(1.0);
        prop_assert!(bitrate >= 1_000_000);
        prop_assert!(bitrate as f64 <= 10_000_000.0 * scale + 1.0);
        if let Some(hint) = hint {
            prop_assert!(bitrate <= hint.max(1_000_000));
        }
    }
}
