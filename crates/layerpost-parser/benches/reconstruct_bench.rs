//! Benchmarks for machine state reconstruction.
//!
//! Run with: cargo bench -p layerpost-parser

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use layerpost_core::LayerStream;
use layerpost_parser::{
    get_value, reconstruct_state, Anchor, Lookback, ReconstructOptions, ScanDirection,
};

/// Build a stream with `layers` layers of `moves` printing moves each.
fn synthetic_stream(layers: usize, moves: usize) -> LayerStream {
    let mut text = String::from(";FLAVOR:Marlin\n;TIME:6000\n;Generated with bench\nM82\nG28\nG92 E0\n");
    let mut e = 0.0;
    for layer in 0..layers {
        text.push_str(&format!(";LAYER:{}\n", layer));
        text.push_str(&format!("G0 F6000 X10 Y10 Z{:.2}\n", 0.2 * (layer + 1) as f64));
        for i in 0..moves {
            e += 0.05;
            text.push_str(&format!("G1 F1500 X{} Y{} E{:.5}\n", 10 + i % 100, 10 + i % 37, e));
        }
        text.push_str("G1 F2700 E");
        text.push_str(&format!("{:.5}\n", e - 5.0));
        text.push_str(&format!(";TIME_ELAPSED:{}\n", layer * 10));
    }
    text.push_str(";End of Gcode\n");
    LayerStream::parse(&text)
}

fn bench_backward(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconstruct_backward");
    for layers in [100usize, 1000] {
        let stream = synthetic_stream(layers, 200);
        let anchor = Anchor::before_metadata(&stream, stream.len() - 2);
        let options = ReconstructOptions::default();
        group.bench_with_input(BenchmarkId::from_parameter(layers), &stream, |b, s| {
            b.iter(|| {
                reconstruct_state(
                    black_box(s),
                    anchor,
                    ScanDirection::Backward(Lookback::ToStart),
                    &options,
                )
            })
        });
    }
    group.finish();
}

fn bench_forward(c: &mut Criterion) {
    let stream = synthetic_stream(300, 200);
    let anchor = Anchor::end_of(&stream, stream.len() - 2);
    let options = ReconstructOptions::default();
    c.bench_function("reconstruct_forward_300_layers", |b| {
        b.iter(|| {
            reconstruct_state(
                black_box(&stream),
                anchor,
                ScanDirection::Forward { from_block: 0 },
                &options,
            )
        })
    });
}

fn bench_get_value(c: &mut Criterion) {
    c.bench_function("get_value", |b| {
        b.iter(|| get_value(black_box("G1 F1500 X120.125 Y88.5 E1234.56789 ; infill"), 'E'))
    });
}

criterion_group!(benches, bench_backward, bench_forward, bench_get_value);
criterion_main!(benches);
