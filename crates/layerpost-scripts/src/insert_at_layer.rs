//! Insert at Layer Change
//!
//! Drops user G-code right after the `;LAYER:` sentinel of each selected
//! layer. Layer numbers follow the sliced convention.

use layerpost_core::{splice, LayerStream, SplicePoint};
use serde::{Deserialize, Serialize};

use crate::block::{split_commands, BlockBuilder};
use crate::error::{ParameterError, ScriptResult};
use crate::processor::{PostProcessor, ProcessContext, ProcessReport};
use crate::selector::{raft_layer_count, select, InsertFrequency, LayerNumbering, LayerRequest};

/// Settings for [`InsertAtLayerChange`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsertAtLayerSettings {
    pub enabled: bool,
    /// Commands to insert; commas separate lines
    pub gcode: String,
    pub frequency: InsertFrequency,
    /// First layer (1 is `;LAYER:0`)
    pub start_layer: i64,
    /// Last layer, inclusive; `None` or -1 runs to the end of the file
    pub end_layer: Option<i64>,
}

impl Default for InsertAtLayerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            gcode: String::new(),
            frequency: InsertFrequency::EveryLayer,
            start_layer: 1,
            end_layer: None,
        }
    }
}

impl InsertAtLayerSettings {
    /// Bring values into range, returning what was changed
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        let mut warnings = Vec::new();
        match self.end_layer {
            Some(-1) => self.end_layer = None,
            Some(end) if end < self.start_layer => {
                warnings.push(ParameterError::InvalidValue {
                    name: "end_layer".to_string(),
                    reason: format!(
                        "end layer {} is before start layer {}; running to the end",
                        end, self.start_layer
                    ),
                });
                self.end_layer = None;
            }
            _ => {}
        }
        warnings
    }
}

/// Inserts user G-code at layer changes
#[derive(Debug, Clone, Default)]
pub struct InsertAtLayerChange {
    settings: InsertAtLayerSettings,
}

impl InsertAtLayerChange {
    pub const NAME: &'static str = "Insert at Layer Change";

    pub fn new(settings: InsertAtLayerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &InsertAtLayerSettings {
        &self.settings
    }
}

impl PostProcessor for InsertAtLayerChange {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Insert custom G-code right after the layer change of selected layers"
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn execute(
        &self,
        stream: &mut LayerStream,
        context: &ProcessContext<'_>,
    ) -> ScriptResult<ProcessReport> {
        stream.ensure_structure()?;

        let commands = split_commands(&self.settings.gcode.to_uppercase(), true);
        if commands.is_empty() {
            tracing::warn!("{}: no G-code to insert", Self::NAME);
            return Ok(ProcessReport::unchanged(Self::NAME));
        }

        let request = LayerRequest::from_frequency(
            self.settings.frequency,
            self.settings.start_layer,
            self.settings.end_layer,
        );
        let raft = raft_layer_count(stream, context.profile);
        let selection = select(
            stream,
            &request,
            LayerNumbering::Sliced,
            raft,
            context.profile.print_sequence,
        );
        selection.report(Self::NAME, context.notifier);

        for target in &selection.targets {
            let mut builder = BlockBuilder::new();
            builder.extend(commands.iter().cloned());
            splice(stream, target.index, SplicePoint::AfterSentinel, builder.finish())?;
        }

        Ok(ProcessReport::new(
            Self::NAME,
            selection.targets.len(),
            selection.missed,
        ))
    }
}
