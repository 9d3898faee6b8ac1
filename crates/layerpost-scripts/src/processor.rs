//! Script pass pipeline and registry

use std::sync::Arc;

use layerpost_core::{LayerStream, Notifier, PrinterProfile};
use serde::{Deserialize, Serialize};

use crate::error::ScriptResult;

/// Everything a pass may read besides the stream
#[derive(Clone, Copy)]
pub struct ProcessContext<'a> {
    /// Printer and extruder settings of the job
    pub profile: &'a PrinterProfile,
    /// Sink for degraded-result messages
    pub notifier: &'a dyn Notifier,
}

impl<'a> ProcessContext<'a> {
    pub fn new(profile: &'a PrinterProfile, notifier: &'a dyn Notifier) -> Self {
        Self { profile, notifier }
    }
}

/// Outcome of one pass
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessReport {
    /// Name of the pass
    pub processor: String,
    /// Number of synthesized blocks spliced into the stream
    pub insertions: usize,
    /// Requested layers not found in the stream
    pub missed: usize,
    /// Selected layers left without an insertion (physical limits)
    pub skipped: usize,
    /// Set when the pass failed and the stream was left as it was
    pub error: Option<String>,
}

impl ProcessReport {
    /// Report for a pass that ran
    pub fn new(processor: impl Into<String>, insertions: usize, missed: usize) -> Self {
        Self {
            processor: processor.into(),
            insertions,
            missed,
            skipped: 0,
            error: None,
        }
    }

    /// Record insertions skipped at a physical limit
    pub fn with_skipped(mut self, skipped: usize) -> Self {
        self.skipped = skipped;
        self
    }

    /// Report for a pass that changed nothing
    pub fn unchanged(processor: impl Into<String>) -> Self {
        Self::new(processor, 0, 0)
    }

    /// Report for a pass that failed
    pub fn failed(processor: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
            insertions: 0,
            missed: 0,
            skipped: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// A post-processing pass over a layer stream
///
/// A pass reads the stream, reconstructs whatever machine state it needs,
/// and splices synthesized blocks in. A pass that returns an error must not
/// leave the stream half-edited; the pipeline restores it regardless.
pub trait PostProcessor: Send + Sync {
    /// Get the name/identifier of this pass
    fn name(&self) -> &str;

    /// Get a description of what this pass does
    fn description(&self) -> &str;

    /// Run the pass
    fn execute(
        &self,
        stream: &mut LayerStream,
        context: &ProcessContext<'_>,
    ) -> ScriptResult<ProcessReport>;

    /// Check if this pass is enabled
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Arc-wrapped pass for thread-safe sharing
pub type ProcessorHandle = Arc<dyn PostProcessor>;

/// Ordered sequence of passes
///
/// Each pass sees the stream as left by the previous one. A failing pass
/// is logged and skipped; the next pass still runs.
#[derive(Default)]
pub struct ProcessorPipeline {
    processors: Vec<ProcessorHandle>,
}

impl ProcessorPipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pass; passes run in registration order
    pub fn register(&mut self, processor: ProcessorHandle) -> &mut Self {
        self.processors.push(processor);
        self
    }

    /// Register multiple passes at once
    pub fn register_all(&mut self, processors: Vec<ProcessorHandle>) -> &mut Self {
        self.processors.extend(processors);
        self
    }

    /// Get the number of registered passes
    pub fn processor_count(&self) -> usize {
        self.processors.len()
    }

    /// Get a pass by name
    pub fn get_processor_by_name(&self, name: &str) -> Option<&ProcessorHandle> {
        self.processors.iter().find(|p| p.name() == name)
    }

    /// List all registered passes as (name, description, enabled)
    pub fn list_processors(&self) -> Vec<(&str, &str, bool)> {
        self.processors
            .iter()
            .map(|p| (p.name(), p.description(), p.is_enabled()))
            .collect()
    }

    /// Run every enabled pass over the stream
    pub fn run(&self, stream: &mut LayerStream, context: &ProcessContext<'_>) -> Vec<ProcessReport> {
        let mut reports = Vec::with_capacity(self.processors.len());

        for processor in &self.processors {
            if !processor.is_enabled() {
                tracing::debug!("Skipping disabled processor '{}'", processor.name());
                continue;
            }

            let snapshot = stream.clone();
            match processor.execute(stream, context) {
                Ok(report) => {
                    tracing::info!(
                        "Processor '{}' inserted {} blocks ({} layers missed, {} skipped)",
                        processor.name(),
                        report.insertions,
                        report.missed,
                        report.skipped
                    );
                    reports.push(report);
                }
                Err(e) => {
                    tracing::warn!("Processor '{}' failed: {}", processor.name(), e);
                    *stream = snapshot;
                    context
                        .notifier
                        .show_message(processor.name(), &format!("Skipped: {}", e));
                    reports.push(ProcessReport::failed(processor.name(), e.to_string()));
                }
            }
        }

        reports
    }
}
