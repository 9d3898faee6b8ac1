//! Time-lapse camera trigger
//!
//! At the end of every Nth layer, counted from the first layer in the file
//! (raft included): retract if needed, hop, park, trigger the camera, wait,
//! then put the head, the filament and the extrusion mode back as found.

use layerpost_core::{splice, LayerStream, SplicePoint, SynthesizedBlock};
use layerpost_parser::{
    reconstruct_state, Anchor, ExtrusionMode, GcodeLine, Lookback, MachineState,
    ReconstructOptions, RetractionStrategy, ScanDirection,
};
use serde::{Deserialize, Serialize};

use crate::block::BlockBuilder;
use crate::error::{clamp_param, ParameterError, ScriptResult};
use crate::processor::{PostProcessor, ProcessContext, ProcessReport};
use crate::selector::{select, InsertFrequency, LayerNumbering, LayerRequest};

/// Settings for [`TimeLapse`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeLapseSettings {
    pub enabled: bool,
    /// Command that fires the camera
    pub trigger_command: String,
    pub frequency: InsertFrequency,
    /// Dwell after the trigger, in milliseconds
    pub pause_length_ms: f64,
    pub park_print_head: bool,
    pub park_x: f64,
    pub park_y: f64,
    /// Retract before parking unless already retracted
    pub retract: bool,
    /// Z-hop height; 0 disables it
    pub zhop: f64,
}

impl Default for TimeLapseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_command: "M240".to_string(),
            frequency: InsertFrequency::EveryLayer,
            pause_length_ms: 700.0,
            park_print_head: true,
            park_x: 0.0,
            park_y: 0.0,
            retract: true,
            zhop: 2.0,
        }
    }
}

impl TimeLapseSettings {
    /// Bring values into range, returning what was changed
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        let mut warnings = Vec::new();
        clamp_param("pause_length_ms", &mut self.pause_length_ms, 0.0, 60_000.0, &mut warnings);
        clamp_param("zhop", &mut self.zhop, 0.0, 50.0, &mut warnings);
        if self.trigger_command.trim().is_empty() {
            warnings.push(ParameterError::InvalidValue {
                name: "trigger_command".to_string(),
                reason: "empty trigger; using M240".to_string(),
            });
            self.trigger_command = "M240".to_string();
        }
        warnings
    }
}

/// Inserts camera triggers between layers
#[derive(Debug, Clone, Default)]
pub struct TimeLapse {
    settings: TimeLapseSettings,
}

impl TimeLapse {
    pub const NAME: &'static str = "Time Lapse";

    pub fn new(settings: TimeLapseSettings) -> Self {
        Self { settings }
    }

    /// Build the trigger block for a reconstructed state
    pub fn synthesize(
        &self,
        state: &MachineState,
        travel_feed: f64,
        retract_feed: f64,
        prime_feed: f64,
        z_hop_feed: f64,
        retract_distance: f64,
    ) -> SynthesizedBlock {
        let s = &self.settings;
        let retracting = s.retract && !state.is_retracted && retract_distance > 0.0;
        let z = state.z_or_origin();
        let mut b = BlockBuilder::new();

        b.comment("TYPE:CUSTOM---------TimeLapse Begin");
        if retracting {
            b.line(GcodeLine::m(83).comment("Extrude Relative"));
            b.line(
                GcodeLine::g(1)
                    .param('E', -retract_distance)
                    .param('F', retract_feed)
                    .comment("Retract filament"),
            );
        }
        if s.zhop > 0.0 {
            b.line(
                GcodeLine::g(1)
                    .param('Z', z + s.zhop)
                    .param('F', z_hop_feed)
                    .comment("Z-Hop"),
            );
        }
        if s.park_print_head {
            b.line(
                GcodeLine::g(1)
                    .param('X', s.park_x)
                    .param('Y', s.park_y)
                    .param('F', travel_feed)
                    .comment("Park print head"),
            );
        }
        b.line(GcodeLine::m(400).comment("Wait for moves to finish"));
        b.raw(format!("{} ;Snap Photo", s.trigger_command.trim()));
        b.line(
            GcodeLine::g(4)
                .param('P', s.pause_length_ms.round())
                .comment("Wait for camera"),
        );
        b.line(
            GcodeLine::g(0)
                .param('F', travel_feed)
                .param('X', state.x_or_origin())
                .param('Y', state.y_or_origin())
                .comment("Restore XY position"),
        );
        if s.zhop > 0.0 {
            b.line(
                GcodeLine::g(0)
                    .param('F', z_hop_feed)
                    .param('Z', z)
                    .comment("Restore Z position"),
            );
        }
        if retracting {
            b.line(
                GcodeLine::g(1)
                    .param('E', retract_distance)
                    .param('F', prime_feed)
                    .comment("Un-Retract filament"),
            );
            if state.extrusion_mode == ExtrusionMode::Absolute {
                b.line(
                    GcodeLine::raw(ExtrusionMode::Absolute.command()).comment("Extruder Mode"),
                );
            }
        }
        if let Some(feed) = state.feed_rate {
            b.line(GcodeLine::g(1).param('F', feed));
        }
        b.comment("--------------------TimeLapse End");
        b.finish()
    }
}

impl PostProcessor for TimeLapse {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Park the head and trigger a camera at the end of selected layers"
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
        let range = stream.layer_range();
        let Some(first) = stream
            .layer_indices()
            .into_iter()
            .find(|(index, _)| range.contains(index))
            .map(|(_, layer)| layer)
        else {
            tracing::warn!("{}: no layers in the file", Self::NAME);
            return Ok(ProcessReport::unchanged(Self::NAME));
        };

        // user numbers are sliced: first sentinel n is user n + 1
        let request = LayerRequest::from_frequency(self.settings.frequency, first + 1, None);
        let selection = select(
            stream,
            &request,
            LayerNumbering::Sliced,
            0,
            context.profile.print_sequence,
        );
        selection.report(Self::NAME, context.notifier);

        let extruder = context.profile.primary();
        let options =
            ReconstructOptions::for_profile(context.profile, RetractionStrategy::SignInference);

        for target in &selection.targets {
            let state = reconstruct_state(
                stream,
                Anchor::before_metadata(stream, target.index),
                ScanDirection::Backward(Lookback::ToStart),
                &options,
            );
            let block = self.synthesize(
                &state,
                extruder.travel_feed(),
                extruder.retract_feed(),
                extruder.prime_feed(),
                extruder.z_hop_feed(),
                extruder.retraction_amount,
            );
            splice(stream, target.index, SplicePoint::BeforeMetadata, block)?;
        }

        Ok(ProcessReport::new(
            Self::NAME,
            selection.targets.len(),
            selection.missed,
        ))
    }
}
