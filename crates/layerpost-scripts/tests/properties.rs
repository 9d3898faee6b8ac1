//! Property tests for layer selection, chunking and state round-trips.
//!
//! Run with: cargo test -p layerpost-scripts

use layerpost_core::{LayerStream, PrintSequence, PrinterProfile, RecordingNotifier};
use layerpost_parser::{
    reconstruct_state, Anchor, Lookback, MachineState, ReconstructOptions, RetractionStrategy,
    ScanDirection,
};
use layerpost_scripts::{
    chunk_distance, reload_chunks, select, InsertFrequency, LayerNumbering, LayerRequest,
    PauseAtLayer, PauseSettings, PostProcessor, ProcessContext, TimeLapse, TimeLapseSettings,
    MAX_EXTRUDE_CHUNK,
};
use proptest::prelude::*;

/// Layers `0..count`, each a Z move and a few printing moves with rising E
fn printed_stream(moves: &[Vec<(f64, f64)>]) -> LayerStream {
    let mut blocks = vec![";TIME:100\n".to_string(), "M82\nG28\nG92 E0\n".to_string()];
    let mut e = 0.0;
    for (n, layer) in moves.iter().enumerate() {
        let mut text = format!(";LAYER:{}\nG0 F6000 Z{:.2}\n", n, 0.2 * (n + 1) as f64);
        for (x, y) in layer {
            e += 0.5;
            text.push_str(&format!("G1 F1500 X{:.3} Y{:.3} E{:.4}\n", x, y, e));
        }
        text.push_str(&format!(";TIME_ELAPSED:{}\n", (n + 1) * 10));
        blocks.push(text);
    }
    blocks.push(";End of Gcode\n".to_string());
    LayerStream::from_blocks(blocks)
}

fn arb_layers() -> impl Strategy<Value = Vec<Vec<(f64, f64)>>> {
    prop::collection::vec(
        prop::collection::vec((1.0..200.0f64, 1.0..200.0f64), 1..6),
        2..8,
    )
}

fn state_at_end(stream: &LayerStream, index: usize, strategy: RetractionStrategy) -> MachineState {
    let options = ReconstructOptions::for_profile(&PrinterProfile::default(), strategy);
    reconstruct_state(
        stream,
        Anchor::before_metadata(stream, index),
        ScanDirection::Backward(Lookback::ToStart),
        &options,
    )
}

fn assert_same_state(before: &MachineState, after: &MachineState) {
    assert_eq!(before.x, after.x);
    assert_eq!(before.y, after.y);
    assert_eq!(before.z, after.z);
    assert_eq!(before.extrusion_mode, after.extrusion_mode);
    assert_eq!(before.is_retracted, after.is_retracted);
    assert!((before.extrusion_position - after.extrusion_position).abs() < 1e-9);
}

proptest! {
    #[test]
    fn prop_every_nth_selects_an_arithmetic_run(count in 1usize..40, start in 1i64..40, step in 1u32..8) {
        let layers: Vec<Vec<(f64, f64)>> = (0..count).map(|_| vec![(10.0, 10.0)]).collect();
        let stream = printed_stream(&layers);
        let selection = select(
            &stream,
            &LayerRequest::Every { start, end: None, step },
            LayerNumbering::Sliced,
            0,
            PrintSequence::AllAtOnce,
        );
        let expected: Vec<usize> = (start - 1..count as i64)
            .step_by(step as usize)
            .map(|layer| layer as usize + 2)
            .collect();
        prop_assert_eq!(selection.indices(), expected);
        prop_assert_eq!(selection.missed, 0);
        prop_assert!(selection.indices().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_bounded_request_tallies_every_layer(count in 1usize..20, start in 1i64..30, span in 0i64..30, step in 1u32..5) {
        let layers: Vec<Vec<(f64, f64)>> = (0..count).map(|_| vec![(10.0, 10.0)]).collect();
        let stream = printed_stream(&layers);
        let end = start + span;
        let selection = select(
            &stream,
            &LayerRequest::Every { start, end: Some(end), step },
            LayerNumbering::Sliced,
            0,
            PrintSequence::AllAtOnce,
        );
        let requested = (start..=end).step_by(step as usize).count();
        prop_assert_eq!(selection.requested, requested);
        prop_assert_eq!(selection.targets.len() + selection.missed, requested);
    }

    #[test]
    fn prop_chunks_cover_the_distance(total in 0.01..2000.0f64) {
        let chunks = chunk_distance(total, MAX_EXTRUDE_CHUNK);
        prop_assert!(chunks.iter().all(|c| *c > 0.0 && *c <= MAX_EXTRUDE_CHUNK));
        prop_assert!((chunks.iter().sum::<f64>() - total).abs() < 1e-6);
        prop_assert_eq!(chunks.len(), (total / MAX_EXTRUDE_CHUNK - 1e-9).ceil().max(1.0) as usize);
    }

    #[test]
    fn prop_reload_keeps_a_slow_tenth(total in 0.01..2000.0f64) {
        let (fast, slow) = reload_chunks(total, MAX_EXTRUDE_CHUNK);
        prop_assert!(fast.iter().all(|c| *c <= MAX_EXTRUDE_CHUNK));
        prop_assert!((fast.iter().sum::<f64>() + slow - total).abs() < 1e-6);
        prop_assert!((slow - total * 0.1).abs() < 1e-6);
    }

    #[test]
    fn prop_time_lapse_puts_everything_back(layers in arb_layers(), pick in 0usize..8) {
        let mut stream = printed_stream(&layers);
        let index = 2 + pick % layers.len();
        let before = state_at_end(&stream, index, RetractionStrategy::SignInference);

        let profile = PrinterProfile::default();
        let notifier = RecordingNotifier::new();
        TimeLapse::new(TimeLapseSettings {
            frequency: InsertFrequency::EveryLayer,
            ..TimeLapseSettings::default()
        })
        .execute(&mut stream, &ProcessContext::new(&profile, &notifier))
        .expect("pass runs");

        let after = state_at_end(&stream, index, RetractionStrategy::SignInference);
        assert_same_state(&before, &after);
        prop_assert_eq!(before.feed_rate, after.feed_rate);
    }

    #[test]
    fn prop_pause_puts_everything_back(layers in arb_layers(), pick in 0usize..8) {
        let mut stream = printed_stream(&layers);
        let index = 2 + pick % layers.len();
        let before = state_at_end(&stream, index, RetractionStrategy::ExplicitCommand);

        // pausing after preview layer P lands at the end of LAYER:P-1
        let preview = (index - 1) as i64;
        let profile = PrinterProfile::default();
        let notifier = RecordingNotifier::new();
        let report = PauseAtLayer::new(PauseSettings {
            layers: preview.to_string(),
            unload_amount: 400.0,
            reload_amount: 380.0,
            ..PauseSettings::default()
        })
        .execute(&mut stream, &ProcessContext::new(&profile, &notifier))
        .expect("pass runs");

        // the last layer has no following layer to pause before
        if index + 1 < stream.len() - 1 {
            prop_assert_eq!(report.insertions, 1);
        }
        let after = state_at_end(&stream, index, RetractionStrategy::ExplicitCommand);
        assert_same_state(&before, &after);
    }
}
