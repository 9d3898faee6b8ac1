//! Property tests for the layer stream and splicer.
//!
//! Run with: cargo test -p layerpost-core

use layerpost_core::{splice, LayerStream, SplicePoint, SynthesizedBlock, TIME_ELAPSED_PREFIX};
use proptest::prelude::*;

fn arb_body_line() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..300, 0u32..300).prop_map(|(x, y)| format!("G1 X{} Y{} E1", x, y)),
        Just(";TYPE:SKIN".to_string()),
        Just(String::new()),
        Just("M106 S255".to_string()),
    ]
}

fn arb_file() -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::collection::vec(arb_body_line(), 0..8), 0..8),
        any::<bool>(),
    )
        .prop_map(|(layers, trailing_newline)| {
            let mut text = String::from(";FLAVOR:Marlin\n;TIME:42\n;Generated with proptest\nG28\n");
            for (n, body) in layers.iter().enumerate() {
                text.push_str(&format!(";LAYER:{}\n", n));
                for line in body {
                    text.push_str(line);
                    text.push('\n');
                }
                text.push_str(&format!("{}{}\n", TIME_ELAPSED_PREFIX, n));
            }
            text.push_str("M84\n;End of Gcode");
            if trailing_newline {
                text.push('\n');
            }
            text
        })
}

proptest! {
    #[test]
    fn proptest_parse_render_preserves_text(text in arb_file()) {
        let stream = LayerStream::parse(&text);
        let expected = if text.ends_with('\n') { text.clone() } else { format!("{}\n", text) };
        prop_assert_eq!(stream.render(), expected);
    }

    #[test]
    fn proptest_splice_keeps_metadata_last(text in arb_file(), extra in 1usize..5) {
        let mut stream = LayerStream::parse(&text);
        let before = stream.len();
        for index in stream.layer_range() {
            let block = SynthesizedBlock::new(vec!["M400".to_string(); extra]);
            splice(&mut stream, index, SplicePoint::BeforeMetadata, block).unwrap();
            let b = stream.block(index).unwrap();
            prop_assert!(b.lines().last().unwrap().starts_with(TIME_ELAPSED_PREFIX));
            prop_assert!(b.sentinel_index().unwrap() < b.tail_offset());
        }
        prop_assert_eq!(stream.len(), before);
    }
}
