//! Multi-extruder emulation on a single nozzle
//!
//! The file is sliced for a printer with several extruders. Every tool
//! change in the layers is replaced by a manual swap: lift, park, set the
//! new temperature, pause for the swap, purge and return. The printer
//! profile must list more than one extruder so the slicer emits the tool
//! changes in the first place.

use layerpost_core::{splice, LayerStream, PrinterProfile, SplicePoint, SynthesizedBlock};
use layerpost_parser::{
    command_code, reconstruct_state, Anchor, CommandCode, ExtrusionMode, GcodeLine, Lookback,
    MachineState, ReconstructOptions, RetractionStrategy, ScanDirection,
};
use serde::{Deserialize, Serialize};

use crate::block::{BlockBuilder, PauseMethod};
use crate::error::{clamp_param, ParameterError, ScriptResult};
use crate::processor::{PostProcessor, ProcessContext, ProcessReport};

/// Tool numbers that can be emulated
pub const MAX_TOOLS: usize = 4;

const PURGE_LENGTH: f64 = 10.0;
const PURGE_FEED: f64 = 200.0;
const LIFT: f64 = 3.0;
const LIFT_FEED: f64 = 600.0;
const STEPPER_HOLD_SECONDS: f64 = 3600.0;

/// Label and temperature for one emulated extruder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub enabled: bool,
    /// Shown on the LCD while waiting for the swap
    pub label: String,
    pub temperature: f64,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            label: String::new(),
            temperature: 205.0,
        }
    }
}

impl ToolSettings {
    fn new(label: &str, enabled: bool) -> Self {
        Self {
            enabled,
            label: label.to_string(),
            ..Self::default()
        }
    }
}

/// Settings for [`EmulateMultiExtruder`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiExtruderSettings {
    pub enabled: bool,
    pub method: PauseMethod,
    pub g4_dwell_minutes: f64,
    pub custom_pause_command: String,
    /// One entry per tool, `T0` first
    pub tools: Vec<ToolSettings>,
    /// Leave the first two tool changes (the skirt) alone
    pub skip_skirt: bool,
    pub park_head: bool,
    pub park_x: f64,
    pub park_y: f64,
    /// Beep at each swap
    pub beep: bool,
    /// Echo the label and temperature to the host with `M118`
    pub echo_to_host: bool,
}

impl Default for MultiExtruderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            method: PauseMethod::Marlin,
            g4_dwell_minutes: 5.0,
            custom_pause_command: String::new(),
            tools: vec![
                ToolSettings::new("Red", true),
                ToolSettings::new("Blue", true),
                ToolSettings::new("White", false),
                ToolSettings::new("Green", false),
            ],
            skip_skirt: true,
            park_head: true,
            park_x: 0.0,
            park_y: 0.0,
            beep: false,
            echo_to_host: false,
        }
    }
}

impl MultiExtruderSettings {
    /// Bring values into range, returning what was changed
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        let mut warnings = Vec::new();
        if self.tools.len() > MAX_TOOLS {
            warnings.push(ParameterError::InvalidValue {
                name: "tools".to_string(),
                reason: format!("at most {} tools; extra entries ignored", MAX_TOOLS),
            });
            self.tools.truncate(MAX_TOOLS);
        }
        for (i, tool) in self.tools.iter_mut().enumerate() {
            clamp_param(
                &format!("tools[{}].temperature", i),
                &mut tool.temperature,
                0.0,
                400.0,
                &mut warnings,
            );
        }
        clamp_param("g4_dwell_minutes", &mut self.g4_dwell_minutes, 0.0, 1440.0, &mut warnings);
        if self.method == PauseMethod::Custom && self.custom_pause_command.trim().is_empty() {
            warnings.push(ParameterError::InvalidValue {
                name: "custom_pause_command".to_string(),
                reason: "custom pause method without a command; using marlin".to_string(),
            });
            self.method = PauseMethod::Marlin;
        }
        warnings
    }

    fn tool(&self, n: usize) -> Option<&ToolSettings> {
        self.tools.get(n).filter(|t| t.enabled)
    }
}

/// Replaces tool changes with manual filament swaps
#[derive(Debug, Clone, Default)]
pub struct EmulateMultiExtruder {
    settings: MultiExtruderSettings,
}

impl EmulateMultiExtruder {
    pub const NAME: &'static str = "Emulate Multi-Extruder Printer";

    pub fn new(settings: MultiExtruderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &MultiExtruderSettings {
        &self.settings
    }

    /// Build the swap sequence for tool `n` from the state before the change
    pub fn synthesize(
        &self,
        n: usize,
        tool: &ToolSettings,
        state: &MachineState,
        profile: &PrinterProfile,
    ) -> SynthesizedBlock {
        let s = &self.settings;
        let extruder = profile.primary();
        let retracting = extruder.retraction_enabled && !state.is_retracted;
        let retract = || {
            GcodeLine::g(1)
                .param('F', extruder.retract_feed())
                .param('E', -extruder.retraction_amount)
        };
        let mut b = BlockBuilder::new();

        b.comment(format!("TYPE:CUSTOM  T{} Tool Change replacement code", n));
        b.line(GcodeLine::m(84).param('S', STEPPER_HOLD_SECONDS));
        if retracting {
            b.line(GcodeLine::m(83));
            b.line(retract());
        }
        b.line(GcodeLine::g(91).comment("Relative positioning"));
        b.line(
            GcodeLine::g(1)
                .param('F', LIFT_FEED)
                .param('Z', LIFT)
                .comment("Move Up"),
        );
        b.line(GcodeLine::g(90).comment("Absolute movement"));
        if s.park_head {
            b.line(
                GcodeLine::g(0)
                    .param('X', s.park_x)
                    .param('Y', s.park_y)
                    .param('F', extruder.travel_feed())
                    .comment("Move to park position"),
            );
        }
        if s.beep {
            b.line(GcodeLine::m(300).param('P', 500.0));
        }
        b.line(GcodeLine::m(104).param('S', tool.temperature.round()));
        b.line(GcodeLine::m(117).text(tool.label.as_str()));
        if s.echo_to_host {
            b.line(GcodeLine::m(118).text(format!(
                "{} @ {}°",
                tool.label,
                layerpost_parser::format_number(tool.temperature)
            )));
        }
        b.raw(s.method.command(None, s.g4_dwell_minutes, &s.custom_pause_command));

        b.line(GcodeLine::m(83));
        b.line(GcodeLine::g(1).param('F', PURGE_FEED).param('E', PURGE_LENGTH));
        if extruder.retraction_enabled {
            b.line(retract());
        }
        b.line(
            GcodeLine::g(0)
                .param('X', state.x_or_origin())
                .param('Y', state.y_or_origin())
                .param('F', extruder.travel_feed()),
        );
        b.line(GcodeLine::g(91));
        b.line(GcodeLine::g(0).param('F', LIFT_FEED).param('Z', -LIFT));
        b.line(GcodeLine::g(90));
        // the purge retract is undone whenever the filament was not left retracted
        if extruder.retraction_enabled && !state.is_retracted {
            b.line(
                GcodeLine::g(1)
                    .param('F', extruder.prime_feed())
                    .param('E', extruder.retraction_amount),
            );
        }
        b.raw(state.extrusion_mode.command());
        let e = match state.extrusion_mode {
            ExtrusionMode::Absolute => state.extrusion_position,
            ExtrusionMode::Relative => 0.0,
        };
        b.line(GcodeLine::g(92).param('E', e));
        b.comment(" End of change");
        b.finish()
    }

    /// Comment out bare tool selections in the start block
    fn disarm_start_block(stream: &mut LayerStream) -> ScriptResult<()> {
        stream.try_block_mut(1)?.edit_lines(|lines| {
            for line in lines.iter_mut() {
                let bare = line.len() == 2
                    && line.starts_with('T')
                    && line[1..].parse::<usize>().is_ok_and(|n| n < MAX_TOOLS);
                if bare {
                    line.insert(0, ';');
                }
            }
        });
        Ok(())
    }

    /// Tool changes in the layers as (block, line, tool), in file order
    fn tool_changes(stream: &LayerStream) -> Vec<(usize, usize, usize)> {
        stream
            .layer_range()
            .filter_map(|index| stream.block(index).map(|block| (index, block)))
            .flat_map(|(index, block)| {
                block
                    .lines()
                    .iter()
                    .enumerate()
                    .filter_map(move |(line, text)| match command_code(text) {
                        Some(CommandCode::T(n)) if (n as usize) < MAX_TOOLS => {
                            Some((index, line, n as usize))
                        }
                        _ => None,
                    })
            })
            .collect()
    }
}

impl PostProcessor for EmulateMultiExtruder {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Turn tool changes into pauses for a manual filament swap"
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
        let profile = context.profile;
        if profile.extruder_count() < 2 {
            tracing::warn!("{}: printer has a single extruder", Self::NAME);
            context.notifier.show_message(
                Self::NAME,
                "Your printer must be configured with more than one extruder to use this \
                 script because the tool changes are used to enter the pauses. The file \
                 was not changed.",
            );
            return Ok(ProcessReport::unchanged(Self::NAME));
        }

        Self::disarm_start_block(stream)?;
        for index in stream.layer_range() {
            stream.try_block_mut(index)?.edit_lines(|lines| {
                for line in lines.iter_mut() {
                    if line.starts_with("M109") && command_code(line) == Some(CommandCode::M(109)) {
                        line.replace_range(..4, "M104");
                    }
                }
            });
        }

        let skip = if self.settings.skip_skirt { 2 } else { 0 };
        let changes: Vec<_> = Self::tool_changes(stream).into_iter().skip(skip).collect();
        let options =
            ReconstructOptions::for_profile(profile, RetractionStrategy::ExplicitCommand);

        let mut inserted = 0usize;
        let mut unconfigured = 0usize;
        // back to front so earlier line indices in a block stay valid
        for &(index, line, n) in changes.iter().rev() {
            let Some(tool) = self.settings.tool(n) else {
                tracing::warn!("{}: no settings for T{}, left as is", Self::NAME, n);
                unconfigured += 1;
                continue;
            };
            let state = reconstruct_state(
                stream,
                Anchor::new(index, line),
                ScanDirection::Backward(Lookback::Blocks(1)),
                &options,
            );
            let block = self.synthesize(n, tool, &state, profile);
            splice(stream, index, SplicePoint::ReplaceLine(line), block)?;
            inserted += 1;
        }

        if unconfigured > 0 {
            context.notifier.show_message(
                Self::NAME,
                &format!(
                    "{} tool changes use an extruder that is not enabled and were left in place.",
                    unconfigured
                ),
            );
        }

        Ok(ProcessReport::new(Self::NAME, inserted, 0).with_skipped(unconfigured))
    }
}
