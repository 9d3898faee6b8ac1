//! # layerpost
//!
//! Post-processor for sliced 3D-printer G-code. It edits the layer stream a
//! slicer produced without re-slicing: pauses, filament changes, nozzle
//! cleaning, time-lapse triggers and tool-change emulation.
//!
//! ## Architecture
//!
//! layerpost is organized as a workspace with multiple crates:
//!
//! 1. **layerpost-core** - Layer stream, splicer, printer profile, notification sink
//! 2. **layerpost-parser** - Command values, line builder, machine state reconstruction
//! 3. **layerpost-scripts** - Layer selection and the post-processing passes
//! 4. **layerpost-settings** - Job files (printer profile + script list)
//! 5. **layerpost** - Command-line binary that runs a job over a file

use std::path::Path;

use anyhow::Context;
use layerpost_core::{LayerStream, Message, RecordingNotifier};
use layerpost_scripts::{ProcessContext, ProcessReport};
use layerpost_settings::JobConfig;

pub use layerpost_core as core;
pub use layerpost_parser as parser;
pub use layerpost_scripts as scripts;
pub use layerpost_settings as settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Initialize logging with the default configuration
///
/// Logs go to stderr so G-code can be written to stdout. `RUST_LOG` is
/// honoured, with INFO as the default level.
pub fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init(),
    }
    .context("failed to install the log subscriber")?;

    Ok(())
}

/// Result of running a job over one file
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Rewritten G-code
    pub gcode: String,
    /// One report per pass that ran
    pub reports: Vec<ProcessReport>,
    /// Messages raised through the notification sink
    pub messages: Vec<Message>,
}

impl JobOutcome {
    /// Total blocks inserted by all passes
    pub fn insertions(&self) -> usize {
        self.reports.iter().map(|r| r.insertions).sum()
    }

    /// Passes that failed and left the stream untouched
    pub fn failures(&self) -> impl Iterator<Item = &ProcessReport> {
        self.reports.iter().filter(|r| r.is_failure())
    }
}

/// Run a job's scripts over G-code text
pub fn process_text(text: &str, job: &JobConfig) -> JobOutcome {
    let mut stream = LayerStream::parse(text);
    let notifier = RecordingNotifier::new();
    let pipeline = job.build_pipeline();
    tracing::debug!(
        "Running {} scripts over {} blocks",
        pipeline.processor_count(),
        stream.len()
    );
    let reports = pipeline.run(&mut stream, &ProcessContext::new(&job.printer, &notifier));
    JobOutcome {
        gcode: stream.render(),
        reports,
        messages: notifier.drain(),
    }
}

/// Run a job over a file, writing the result to `output` when given
pub fn process_file(
    input: &Path,
    output: Option<&Path>,
    job: &JobConfig,
) -> anyhow::Result<JobOutcome> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let outcome = process_text(&text, job);
    if let Some(path) = output {
        std::fs::write(path, &outcome.gcode)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!("Wrote {}", path.display());
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerpost_scripts::PauseSettings;
    use layerpost_settings::ScriptConfig;
    use tempfile::TempDir;

    const GCODE: &str = ";FLAVOR:Marlin\n;TIME:600\n;Generated with Cura_SteamEngine 5.6.0\n\
M104 S200\nG28\nM82\nG92 E0\n\
;LAYER:0\nG0 F6000 X10 Y10 Z0.2\nG1 F1500 X50 Y10 E2\n;TIME_ELAPSED:100\n\
;LAYER:1\nG0 F6000 X10 Y20 Z0.4\nG1 F1500 X50 Y20 E4\n;TIME_ELAPSED:200\n\
;LAYER:2\nG0 F6000 X10 Y30 Z0.6\nG1 F1500 X50 Y30 E6\n;TIME_ELAPSED:300\n\
M84\n";

    fn pause_job(layers: &str) -> JobConfig {
        JobConfig {
            scripts: vec![ScriptConfig::PauseAtLayer(PauseSettings {
                layers: layers.to_string(),
                ..PauseSettings::default()
            })],
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_empty_job_leaves_text_untouched() {
        let outcome = process_text(GCODE, &JobConfig::new());
        assert_eq!(outcome.gcode, GCODE);
        assert!(outcome.reports.is_empty());
    }

    #[test]
    fn test_process_file_writes_output() {
        let dir = TempDir::new().expect("temp dir");
        let input = dir.path().join("part.gcode");
        let output = dir.path().join("part_post.gcode");
        std::fs::write(&input, GCODE).expect("input written");

        let outcome = process_file(&input, Some(&output), &pause_job("1")).expect("processed");
        assert_eq!(outcome.insertions(), 1);

        let written = std::fs::read_to_string(&output).expect("output written");
        assert_eq!(written, outcome.gcode);
        assert!(written.contains("; Pause at end of preview layer 1 (end of Gcode LAYER:0)"));
        assert_eq!(std::fs::read_to_string(&input).expect("input kept"), GCODE);
    }

    #[test]
    fn test_missing_layer_is_reported() {
        let outcome = process_text(GCODE, &pause_job("1, 30"));
        assert_eq!(outcome.insertions(), 1);
        assert_eq!(outcome.reports[0].missed, 1);
        assert!(outcome
            .messages
            .iter()
            .any(|m| m.text.starts_with("1 of 2 requested layers were found")));
    }

    #[test]
    fn test_process_file_missing_input() {
        let dir = TempDir::new().expect("temp dir");
        let err = process_file(&dir.path().join("absent.gcode"), None, &JobConfig::new())
            .expect_err("missing input");
        assert!(err.to_string().contains("failed to read"));
    }
}
