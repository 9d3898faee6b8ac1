//! Filament change (`M600`)
//!
//! Inserts one firmware filament-change command right after the sentinel
//! of each listed layer. Layer numbers follow the preview convention.

use layerpost_core::{splice, FirmwareFlavor, LayerStream, SplicePoint, SynthesizedBlock};
use layerpost_parser::GcodeLine;
use serde::{Deserialize, Serialize};

use crate::block::{split_commands, BlockBuilder};
use crate::error::{clamp_param, ParameterError, ScriptResult};
use crate::processor::{PostProcessor, ProcessContext, ProcessReport};
use crate::selector::{parse_layer_list, raft_layer_count, select, LayerNumbering, LayerRequest};

/// Parameter letter carrying the later (full unload) retraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaterRetractParam {
    /// Marlin
    U,
    /// RepRap
    L,
}

impl LaterRetractParam {
    /// Letter the firmware flavor expects
    pub fn for_flavor(flavor: FirmwareFlavor) -> Self {
        match flavor {
            FirmwareFlavor::RepRap => LaterRetractParam::L,
            _ => LaterRetractParam::U,
        }
    }

    fn letter(self) -> char {
        match self {
            LaterRetractParam::U => 'U',
            LaterRetractParam::L => 'L',
        }
    }
}

/// Settings for [`FilamentChange`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilamentChangeSettings {
    pub enabled: bool,
    /// Comma-separated preview layer numbers
    pub layers: String,
    /// Initial retraction (`E`), 0 leaves it out
    pub initial_retract: f64,
    /// Later retraction (`U`/`L`), 0 leaves it out
    pub later_retract: f64,
    /// `None` picks the letter from the firmware flavor
    pub retract_method: Option<LaterRetractParam>,
    pub x_position: f64,
    pub y_position: f64,
    /// Park Z; 0 leaves it out
    pub z_position: f64,
    /// Emit a bare `M600` and let the firmware use its own settings
    pub firmware_config: bool,
    pub enable_before_macro: bool,
    pub before_macro: String,
    pub enable_after_macro: bool,
    pub after_macro: String,
}

impl Default for FilamentChangeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            layers: "10".to_string(),
            initial_retract: 30.0,
            later_retract: 300.0,
            retract_method: None,
            x_position: 0.0,
            y_position: 0.0,
            z_position: 0.0,
            firmware_config: false,
            enable_before_macro: false,
            before_macro: "M300 S1000 P10000".to_string(),
            enable_after_macro: false,
            after_macro: "M300 S440 P500".to_string(),
        }
    }
}

impl FilamentChangeSettings {
    /// Bring values into range, returning what was changed
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        let mut warnings = Vec::new();
        clamp_param("initial_retract", &mut self.initial_retract, 0.0, 1000.0, &mut warnings);
        clamp_param("later_retract", &mut self.later_retract, 0.0, 1000.0, &mut warnings);
        clamp_param("z_position", &mut self.z_position, 0.0, 1000.0, &mut warnings);
        warnings
    }
}

/// Inserts `M600` filament changes
#[derive(Debug, Clone, Default)]
pub struct FilamentChange {
    settings: FilamentChangeSettings,
}

impl FilamentChange {
    pub const NAME: &'static str = "Filament Change";

    pub fn new(settings: FilamentChangeSettings) -> Self {
        Self { settings }
    }

    /// The `M600` line
    ///
    /// Parameters keep the firmware's documented order (E, U/L, X, Y, Z),
    /// each with two decimals.
    pub fn command(&self, flavor: FirmwareFlavor) -> GcodeLine {
        let s = &self.settings;
        let line = GcodeLine::m(600);
        if s.firmware_config {
            return line;
        }
        let mut words = Vec::new();
        if s.initial_retract > 0.0 {
            words.push(format!("E{:.2}", s.initial_retract));
        }
        if s.later_retract > 0.0 {
            let param = s
                .retract_method
                .unwrap_or_else(|| LaterRetractParam::for_flavor(flavor));
            words.push(format!("{}{:.2}", param.letter(), s.later_retract));
        }
        words.push(format!("X{:.2}", s.x_position));
        words.push(format!("Y{:.2}", s.y_position));
        if s.z_position > 0.0 {
            words.push(format!("Z{:.2}", s.z_position));
        }
        line.text(words.join(" "))
    }

    /// Build the block for one preview layer
    pub fn synthesize(&self, preview_layer: i64, flavor: FirmwareFlavor) -> SynthesizedBlock {
        let s = &self.settings;
        let mut b = BlockBuilder::new();
        b.comment(format!(
            "----------Begin Filament Change (Start of preview layer: {})",
            preview_layer
        ));
        if s.enable_before_macro {
            b.extend(split_commands(&s.before_macro, false));
        }
        b.line(self.command(flavor));
        if s.enable_after_macro {
            b.extend(split_commands(&s.after_macro, false));
        }
        b.comment("----------End Filament Change");
        b.finish()
    }
}

impl PostProcessor for FilamentChange {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Insert an M600 filament change at the start of listed layers"
    }

    fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    fn execute(
        &self,
        stream: &mut LayerStream,
        context: &ProcessContext<'_>,
    ) -> ScriptResult<ProcessReport> {
        if !self.settings.enabled {
            return Ok(ProcessReport::unchanged(Self::NAME));
        }
        stream.ensure_structure()?;

        let (layers, warnings) = parse_layer_list(&self.settings.layers);
        let raft = raft_layer_count(stream, context.profile);
        let mut selection = select(
            stream,
            &LayerRequest::Once(layers),
            LayerNumbering::Preview,
            raft,
            context.profile.print_sequence,
        );
        selection.requested += warnings.len();
        selection.missed += warnings.len();
        selection.warnings.extend(warnings);
        selection.report(Self::NAME, context.notifier);

        let flavor = context.profile.firmware_flavor;
        for target in &selection.targets {
            let preview = target.layer + raft as i64 + 1;
            splice(
                stream,
                target.index,
                SplicePoint::AfterSentinel,
                self.synthesize(preview, flavor),
            )?;
        }

        Ok(ProcessReport::new(
            Self::NAME,
            selection.targets.len(),
            selection.missed,
        ))
    }
}
