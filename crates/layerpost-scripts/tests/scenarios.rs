//! End-to-end runs of the scripts over a parsed file.
//!
//! Run with: cargo test -p layerpost-scripts

use std::sync::Arc;

use layerpost_core::{LayerStream, PrinterProfile, RecordingNotifier};
use layerpost_scripts::{
    CleaningSettings, CleaningStation, FilamentChange, FilamentChangeSettings, InsertAtLayerChange,
    InsertAtLayerSettings, InsertFrequency, PauseAtLayer, PauseSettings, ProcessContext,
    ProcessReport, ProcessorHandle, ProcessorPipeline, TimeLapse, TimeLapseSettings,
};

fn sliced_file(layers: usize) -> String {
    let mut text = String::from(
        ";FLAVOR:Marlin\n;TIME:1000\n;Filament used: 1.2m\n;Layer height: 0.2\n;Generated with Cura_SteamEngine 5.6.0\n\
         M140 S60\nM104 S200\nG28\nM82\nG92 E0\n",
    );
    let mut e = 0.0;
    for n in 0..layers {
        e += 1.5;
        text.push_str(&format!(
            ";LAYER:{n}\n;TYPE:WALL-OUTER\nG0 F6000 X20 Y20 Z{z:.1}\nG1 F1500 X60 Y20 E{e:.1}\n;TIME_ELAPSED:{t}\n",
            n = n,
            z = 0.2 * (n + 1) as f64,
            e = e,
            t = (n + 1) * 100
        ));
    }
    text.push_str("G91\nG1 Z10\nG90\nM84\n;End of Gcode\n");
    text
}

fn layer_blocks_with(stream: &LayerStream, marker: &str) -> Vec<usize> {
    stream
        .layer_range()
        .filter(|&i| {
            stream
                .block(i)
                .is_some_and(|b| b.lines().iter().any(|l| l.starts_with(marker)))
        })
        .collect()
}

#[test]
fn test_cleaning_every_second_layer() {
    let mut stream = LayerStream::parse(&sliced_file(5));
    assert_eq!(stream.len(), 8);

    let profile = PrinterProfile::default();
    let notifier = RecordingNotifier::new();
    let mut pipeline = ProcessorPipeline::new();
    pipeline.register(Arc::new(CleaningStation::new(CleaningSettings {
        frequency: InsertFrequency::Every2nd,
        ..CleaningSettings::default()
    })));
    let reports = pipeline.run(&mut stream, &ProcessContext::new(&profile, &notifier));

    assert_eq!(reports[0].insertions, 3);
    assert_eq!(layer_blocks_with(&stream, ";TYPE:CUSTOM CleaningStation"), vec![2, 4, 6]);
    assert_eq!(stream.header_time(), Some(1027.0));
    let header = stream.block(0).expect("header").lines().to_vec();
    assert!(header.contains(&";  Time Adjustment / instance = 9".to_string()));
    assert_eq!(stream.len(), 8);
}

#[test]
fn test_cleaning_respects_machine_height() {
    let mut stream = LayerStream::parse(&sliced_file(3));
    let profile = PrinterProfile {
        machine_height: 25.5,
        ..PrinterProfile::default()
    };
    let notifier = RecordingNotifier::new();
    let report = ProcessorPipeline::new()
        .register(Arc::new(CleaningStation::default()))
        .run(&mut stream, &ProcessContext::new(&profile, &notifier))
        .remove(0);

    // 0.2 and 0.4 fit under 25.5 with a 25 mm lift, 0.6 does not
    assert_eq!(report.insertions, 2);
    assert_eq!(report.skipped, 1);
    let last = stream.block(4).expect("layer 2").lines().to_vec();
    assert!(last
        .iter()
        .any(|l| l == ";CleaningStation - Z Lift to 25.6 exceeds Machine Height"));
    assert!(!last.iter().any(|l| l.starts_with(";TYPE:CUSTOM CleaningStation")));
}

#[test]
fn test_passes_chain_over_the_same_stream() {
    let mut stream = LayerStream::parse(&sliced_file(6));
    let original_blocks = stream.len();

    let profile = PrinterProfile::default();
    let notifier = RecordingNotifier::new();
    let mut pipeline = ProcessorPipeline::new();
    let passes: Vec<ProcessorHandle> = vec![
        Arc::new(InsertAtLayerChange::new(InsertAtLayerSettings {
            gcode: "m117 layer".to_string(),
            ..InsertAtLayerSettings::default()
        })),
        Arc::new(FilamentChange::new(FilamentChangeSettings {
            layers: "3".to_string(),
            ..FilamentChangeSettings::default()
        })),
        Arc::new(TimeLapse::new(TimeLapseSettings {
            frequency: InsertFrequency::Every3rd,
            ..TimeLapseSettings::default()
        })),
        Arc::new(PauseAtLayer::new(PauseSettings {
            layers: "4".to_string(),
            ..PauseSettings::default()
        })),
    ];
    pipeline.register_all(passes);
    let reports = pipeline.run(&mut stream, &ProcessContext::new(&profile, &notifier));

    let inserted: Vec<usize> = reports.iter().map(|r| r.insertions).collect();
    assert_eq!(inserted, vec![6, 1, 2, 1]);
    assert!(reports.iter().all(|r| !r.is_failure()));
    assert_eq!(stream.len(), original_blocks);

    // the later pass lands right after the sentinel, ahead of the earlier one
    let layer2 = stream.block(4).expect("layer 2").lines().to_vec();
    assert_eq!(layer2[0], ";LAYER:2");
    assert!(layer2[1].starts_with(";----------Begin Filament Change"));
    let m117 = layer2.iter().position(|l| l == "M117 LAYER").expect("insert");
    let m600 = layer2.iter().position(|l| l.starts_with("M600")).expect("change");
    assert!(m600 < m117);

    assert_eq!(layer_blocks_with(&stream, "M240"), vec![2, 5]);
    assert_eq!(
        layer_blocks_with(&stream, ";TYPE:CUSTOM---------------; Pause"),
        vec![5]
    );

    // every block keeps its metadata last
    for index in stream.layer_range() {
        let block = stream.block(index).expect("layer");
        assert!(block
            .lines()
            .last()
            .is_some_and(|l| l.starts_with(";TIME_ELAPSED:")));
    }
}

#[test]
fn test_render_keeps_untouched_text() {
    let text = sliced_file(4);
    let mut stream = LayerStream::parse(&text);
    assert_eq!(stream.render(), text);

    let profile = PrinterProfile::default();
    let notifier = RecordingNotifier::new();
    ProcessorPipeline::new()
        .register(Arc::new(PauseAtLayer::new(PauseSettings {
            layers: "2".to_string(),
            ..PauseSettings::default()
        })))
        .run(&mut stream, &ProcessContext::new(&profile, &notifier));

    let rendered = stream.render();
    assert!(rendered.starts_with(";FLAVOR:Marlin\n;TIME:1000\n"));
    assert!(rendered.ends_with("M84\n;End of Gcode\n"));
    assert_eq!(rendered.matches(";LAYER:").count(), 4);
}

#[test]
fn test_reports_serialize() {
    let report = ProcessReport::new("Pause at Layer", 2, 1).with_skipped(0);
    let json = serde_json::to_string(&report).expect("serializes");
    assert!(json.contains("\"insertions\":2"));
    let back: ProcessReport = serde_json::from_str(&json).expect("deserializes");
    assert_eq!(back, report);
}
