//! Pause at layer
//!
//! Pauses the print at the end of each listed preview layer. The pause code
//! goes at the end of that layer's block, just before its metadata, so the
//! printer stops before the next layer starts.
//!
//! For a filament change the block retracts, parks, unloads, drops to the
//! standby temperature, pauses, reheats, reloads, purges and returns. A
//! retraction the block performs is undone on return, the Z lift is
//! reversed, and the extrusion mode and E position are put back to what the
//! resumed code expects. With `redo_layer` the paused layer is printed once
//! more at a chosen flow rate to get the filament flowing again.

use layerpost_core::{
    splice, ExtruderProfile, LayerStream, PrinterProfile, SplicePoint, SynthesizedBlock,
};
use layerpost_parser::{
    get_value, is_motion, reconstruct_state, Anchor, ExtrusionMode, GcodeLine, Lookback,
    MachineState, ReconstructOptions, RetractionStrategy, ScanDirection, COMMENT_COLUMN,
};
use serde::{Deserialize, Serialize};

use crate::block::{
    chunk_distance, reload_chunks, round_to, BlockBuilder, PauseMethod, MAX_EXTRUDE_CHUNK,
};
use crate::error::{clamp_param, ParameterError, ScriptResult};
use crate::processor::{PostProcessor, ProcessContext, ProcessReport};
use crate::selector::{parse_layer_list, raft_layer_count, select, LayerNumbering, LayerRequest};

/// Height the head is raised to before a purge, if it is lower
const PURGE_CLEARANCE_Z: f64 = 15.0;

/// Why the print pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Unload, reload and purge around the pause
    #[default]
    Filament,
    /// Anything else (inserting magnets, nuts); only an extra prime
    Other,
}

/// Command used to bring the nozzle back to temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeTemperatureCommand {
    /// Set and continue
    #[default]
    M104,
    /// Set and wait
    M109,
}

/// Settings for [`PauseAtLayer`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PauseSettings {
    pub enabled: bool,
    /// Comma-separated preview layers to finish before pausing
    pub layers: String,
    pub method: PauseMethod,
    /// Dwell for [`PauseMethod::G4`], in minutes
    pub g4_dwell_minutes: f64,
    /// Command for [`PauseMethod::Custom`]
    pub custom_pause_command: String,
    pub reason: PauseReason,
    pub unload_amount: f64,
    /// Unload and reload speed in mm/s; `None` uses the printer's maximum
    /// E feedrate. Capped at 100.
    pub unload_reload_speed: Option<f64>,
    pub reload_amount: f64,
    pub purge_amount: f64,
    /// Extra prime after a non-filament pause
    pub extra_prime_amount: f64,
    pub hold_steppers: bool,
    pub disarm_timeout_minutes: f64,
    pub park_enabled: bool,
    pub park_x: f64,
    pub park_y: f64,
    /// Relative lift before parking
    pub head_move_z: f64,
    /// `None` uses the extruder's print temperature
    pub standby_temperature: Option<f64>,
    /// `None` uses the extruder's print temperature
    pub resume_temperature: Option<f64>,
    pub resume_temperature_cmd: ResumeTemperatureCommand,
    /// Resume at the active tool's temperature found in the file; `None`
    /// enables it for printers with more than one extruder
    pub tool_temperature: Option<bool>,
    /// LCD message while paused; empty for none
    pub display_text: String,
    pub beep: bool,
    pub beep_length_ms: f64,
    /// Reprint the paused layer after a filament change
    pub redo_layer: bool,
    /// Flow rate (%) for the reprinted layer
    pub redo_layer_flow: f64,
    /// Extra commands before the pause; commas separate lines
    pub gcode_before: String,
    /// Extra commands after the pause; commas separate lines
    pub gcode_after: String,
}

impl Default for PauseSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            layers: "25".to_string(),
            method: PauseMethod::Marlin,
            g4_dwell_minutes: 5.0,
            custom_pause_command: String::new(),
            reason: PauseReason::Filament,
            unload_amount: 0.0,
            unload_reload_speed: None,
            reload_amount: 0.0,
            purge_amount: 35.0,
            extra_prime_amount: 0.33,
            hold_steppers: true,
            disarm_timeout_minutes: 30.0,
            park_enabled: true,
            park_x: 0.0,
            park_y: 0.0,
            head_move_z: 2.0,
            standby_temperature: None,
            resume_temperature: None,
            resume_temperature_cmd: ResumeTemperatureCommand::M104,
            tool_temperature: None,
            display_text: String::new(),
            beep: false,
            beep_length_ms: 1000.0,
            redo_layer: false,
            redo_layer_flow: 100.0,
            gcode_before: String::new(),
            gcode_after: String::new(),
        }
    }
}

impl PauseSettings {
    /// Bring values into range, returning what was changed
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        let mut warnings = Vec::new();
        clamp_param("g4_dwell_minutes", &mut self.g4_dwell_minutes, 0.0, 1440.0, &mut warnings);
        clamp_param("unload_amount", &mut self.unload_amount, 0.0, 2000.0, &mut warnings);
        clamp_param("reload_amount", &mut self.reload_amount, 0.0, 2000.0, &mut warnings);
        clamp_param("purge_amount", &mut self.purge_amount, 0.0, 2000.0, &mut warnings);
        clamp_param("extra_prime_amount", &mut self.extra_prime_amount, 0.0, 50.0, &mut warnings);
        clamp_param(
            "disarm_timeout_minutes",
            &mut self.disarm_timeout_minutes,
            0.0,
            1440.0,
            &mut warnings,
        );
        clamp_param("head_move_z", &mut self.head_move_z, 0.5, 50.0, &mut warnings);
        clamp_param("beep_length_ms", &mut self.beep_length_ms, 0.0, 60_000.0, &mut warnings);
        clamp_param("redo_layer_flow", &mut self.redo_layer_flow, 50.0, 150.0, &mut warnings);
        if let Some(speed) = self.unload_reload_speed.as_mut() {
            clamp_param("unload_reload_speed", speed, 1.0, 100.0, &mut warnings);
        }
        if self.method == PauseMethod::Custom && self.custom_pause_command.trim().is_empty() {
            warnings.push(ParameterError::InvalidValue {
                name: "custom_pause_command".to_string(),
                reason: "custom pause method without a command; using marlin".to_string(),
            });
            self.method = PauseMethod::Marlin;
        }
        warnings
    }

    fn is_filament_change(&self) -> bool {
        self.reason == PauseReason::Filament
    }

    fn redoes_layer(&self) -> bool {
        self.redo_layer && self.is_filament_change()
    }
}

/// What one pause needs to know about the stream
#[derive(Debug, Clone, PartialEq)]
pub struct PausePoint {
    /// Preview layer finished before the pause
    pub preview_layer: i64,
    /// Sentinel number of that layer
    pub gcode_layer: i64,
    /// Machine state where the pause is inserted
    pub at_pause: MachineState,
    /// Machine state the code after the pause expects
    pub at_resume: MachineState,
    /// Where printing continues
    pub resume_xy: (f64, f64),
    pub resume_temperature: f64,
    /// Body of the reprinted layer, sentinel already rewritten
    pub redo_lines: Option<Vec<String>>,
}

/// Inserts pauses at the end of listed layers
#[derive(Debug, Clone, Default)]
pub struct PauseAtLayer {
    settings: PauseSettings,
}

impl PauseAtLayer {
    pub const NAME: &'static str = "Pause at Layer";

    pub fn new(settings: PauseSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PauseSettings {
        &self.settings
    }

    /// Unload/reload speed in mm/min
    pub fn unload_reload_feed(&self, profile: &PrinterProfile) -> f64 {
        let speed = self
            .settings
            .unload_reload_speed
            .unwrap_or(profile.max_feedrate_e)
            .min(100.0);
        (speed * 60.0).round()
    }

    fn uses_tool_temperature(&self, profile: &PrinterProfile) -> bool {
        self.settings
            .tool_temperature
            .unwrap_or(profile.extruder_count() > 1)
    }

    /// Build the pause block
    pub fn synthesize(&self, point: &PausePoint, profile: &PrinterProfile) -> SynthesizedBlock {
        let s = &self.settings;
        let mut b = BlockBuilder::aligned();
        b.raw(format!(
            ";TYPE:CUSTOM---------------; Pause at end of preview layer {} (end of Gcode LAYER:{})",
            point.preview_layer, point.gcode_layer
        ));

        match s.method {
            PauseMethod::Griffin => self.pause_core(&mut b, false),
            PauseMethod::Repetier => self.repetier(&mut b, point, profile),
            _ => self.generic(&mut b, point, profile),
        }

        if let Some(redo) = &point.redo_lines {
            b.line(
                GcodeLine::m(221)
                    .param('S', s.redo_layer_flow.round())
                    .comment("Set Redo Layer Flow"),
            );
            b.extend(redo.iter().cloned());
            b.line(GcodeLine::m(221).param('S', 100.0).comment("PauseAtLayer Reset flow"));
        }
        b.raw(format!(";{}End of the Pause code", "-".repeat(26)));
        b.finish()
    }

    /// LCD message, stepper hold, beep, custom code and the pause itself
    fn pause_core(&self, b: &mut BlockBuilder, hold: bool) {
        let s = &self.settings;
        if !s.display_text.trim().is_empty() {
            b.line(
                GcodeLine::m(117)
                    .text(s.display_text.trim())
                    .comment("Message to LCD"),
            );
        }
        if hold && s.hold_steppers && s.disarm_timeout_minutes > 0.0 {
            b.line(
                GcodeLine::m(84)
                    .param('S', (s.disarm_timeout_minutes * 60.0).round())
                    .comment(format!(
                        "Keep steppers engaged for {} minutes",
                        layerpost_parser::format_number(s.disarm_timeout_minutes)
                    )),
            );
        }
        if s.beep {
            b.line(
                GcodeLine::m(300)
                    .param('S', 440.0)
                    .param('P', s.beep_length_ms.round())
                    .comment("Beep"),
            );
        }
        b.extend(capitalized_commands(&s.gcode_before));
        let command = s
            .method
            .command(Some(&s.display_text), s.g4_dwell_minutes, &s.custom_pause_command);
        b.line(GcodeLine::raw(command).comment("Do the actual pause"));
        b.extend(capitalized_commands(&s.gcode_after));
    }

    fn retract(&self, b: &mut BlockBuilder, extruder: &ExtruderProfile, firmware: bool) {
        if firmware {
            b.line(GcodeLine::g(10).comment("Retract"));
        } else {
            b.line(
                GcodeLine::g(1)
                    .param('F', extruder.retract_feed())
                    .param('E', -extruder.retraction_amount)
                    .comment("Retract"),
            );
        }
    }

    fn park(&self, b: &mut BlockBuilder, point: &PausePoint, extruder: &ExtruderProfile) {
        let s = &self.settings;
        if !s.park_enabled {
            return;
        }
        let z = point.at_pause.z_or_origin();
        b.line(
            GcodeLine::g(1)
                .param('F', extruder.z_hop_feed())
                .param('Z', round_to(z + s.head_move_z, 2))
                .comment("Move up to clear the print"),
        );
        b.line(
            GcodeLine::g(0)
                .param('F', extruder.travel_feed())
                .param('X', s.park_x)
                .param('Y', s.park_y)
                .comment("Move to park location"),
        );
        if z < PURGE_CLEARANCE_Z - s.head_move_z {
            let purging = s.is_filament_change() && s.purge_amount > 0.0;
            b.line(
                GcodeLine::g(1)
                    .param('F', extruder.z_hop_feed())
                    .param('Z', PURGE_CLEARANCE_Z)
                    .comment(if purging {
                        "Too close to purge - move up some more"
                    } else {
                        "Too close - move up some more"
                    }),
            );
        }
    }

    fn return_to_print(&self, b: &mut BlockBuilder, point: &PausePoint, extruder: &ExtruderProfile) {
        if !self.settings.park_enabled {
            return;
        }
        b.line(
            GcodeLine::g(0)
                .param('F', extruder.travel_feed())
                .param('X', point.resume_xy.0)
                .param('Y', point.resume_xy.1)
                .comment("Move to resume location"),
        );
        b.line(
            GcodeLine::g(1)
                .param('F', extruder.z_hop_feed())
                .param('Z', point.at_pause.z_or_origin())
                .comment("Move back down to resume height"),
        );
    }

    /// Extrusion mode and E position the resumed code expects
    fn restore_extruder(&self, b: &mut BlockBuilder, point: &PausePoint) {
        let mode = point.at_resume.extrusion_mode;
        let name = match mode {
            ExtrusionMode::Absolute => "absolute",
            ExtrusionMode::Relative => "relative",
        };
        b.line(
            GcodeLine::raw(mode.command()).comment(format!("Switch back to {} E values", name)),
        );
        let e = match mode {
            ExtrusionMode::Absolute => point.at_resume.extrusion_position,
            ExtrusionMode::Relative => 0.0,
        };
        b.line(GcodeLine::g(92).param('E', e).comment("Reset extruder location"));
    }

    fn generic(&self, b: &mut BlockBuilder, point: &PausePoint, profile: &PrinterProfile) {
        let s = &self.settings;
        let extruder = profile.primary();
        let firmware = profile.firmware_retract;

        b.line(GcodeLine::m(83).comment("Relative extrusion"));
        if !point.at_pause.is_retracted {
            self.retract(b, &extruder, firmware);
        }
        self.park(b, point, &extruder);

        let feed = self.unload_reload_feed(profile);
        if s.is_filament_change() && s.unload_amount > 0.0 {
            b.line(GcodeLine::m(400).comment("Complete all moves"));
            let chunks = chunk_distance(s.unload_amount, MAX_EXTRUDE_CHUNK);
            let count = chunks.len();
            for (i, chunk) in chunks.into_iter().enumerate() {
                let comment = match (count, i + 1 == count) {
                    (1, _) => "Unload",
                    (_, true) => "Unload the remainder",
                    _ => "Unload some",
                };
                b.line(GcodeLine::g(1).param('F', feed).param('E', -chunk).comment(comment));
            }
        }

        if profile.nozzle_temp_control {
            let standby = s
                .standby_temperature
                .unwrap_or(extruder.print_temperature);
            b.line(
                GcodeLine::m(104)
                    .param('S', standby.round())
                    .comment("Standby temperature"),
            );
        }

        self.pause_core(b, true);

        if profile.nozzle_temp_control {
            let wait = s.resume_temperature_cmd == ResumeTemperatureCommand::M109
                || self.uses_tool_temperature(profile);
            let (code, comment) = if wait {
                (109, "Wait for resume temperature")
            } else {
                (104, "Resume temperature")
            };
            b.line(
                GcodeLine::m(code)
                    .param('S', point.resume_temperature.round())
                    .comment(comment),
            );
        }

        if s.is_filament_change() {
            let (fast, slow) = reload_chunks(s.reload_amount, MAX_EXTRUDE_CHUNK);
            for chunk in fast {
                b.line(GcodeLine::g(1).param('E', chunk).param('F', feed).comment("Fast Reload"));
            }
            if slow > 0.0 {
                b.line(
                    GcodeLine::g(1)
                        .param('E', slow)
                        .param('F', (extruder.nozzle_size * 16.666 * 60.0).round())
                        .comment("Reload the remaining 10% slow to avoid ramming the nozzle"),
                );
            }
            if s.purge_amount > 0.0 {
                b.line(
                    GcodeLine::g(1)
                        .param('E', s.purge_amount)
                        .param('F', (extruder.nozzle_size * 8.333 * 60.0).round())
                        .comment("Purge"),
                );
                self.retract(b, &extruder, firmware);
                b.line(GcodeLine::m(400).comment("Complete all moves"));
                b.line(GcodeLine::m(300).param('P', 250.0).comment("Beep"));
                b.line(GcodeLine::g(4).param('S', 2.0).comment("Wait for 2 seconds"));
            }
        }

        self.return_to_print(b, point, &extruder);

        // the filament is retracted here on every path
        if !point.at_resume.is_retracted {
            if firmware {
                let count = if profile.nozzle_temp_control { 1 } else { 3 };
                for _ in 0..count {
                    b.line(GcodeLine::g(11).comment("Unretract"));
                }
            } else {
                b.line(
                    GcodeLine::g(1)
                        .param('F', extruder.prime_feed())
                        .param('E', extruder.retraction_amount)
                        .comment("Unretract"),
                );
            }
        }

        if s.reason == PauseReason::Other && s.extra_prime_amount > 0.0 {
            b.line(
                GcodeLine::g(1)
                    .param('E', s.extra_prime_amount)
                    .param('F', extruder.prime_feed())
                    .comment("Extra Prime"),
            );
        }

        self.restore_extruder(b, point);
    }

    fn repetier(&self, b: &mut BlockBuilder, point: &PausePoint, profile: &PrinterProfile) {
        let s = &self.settings;
        let extruder = profile.primary();

        b.line(GcodeLine::m(83).comment("Relative extrusion"));
        if !point.at_pause.is_retracted {
            self.retract(b, &extruder, false);
        }
        self.park(b, point, &extruder);
        b.line(GcodeLine::m(84).param('E', 0.0).comment("Disable Steppers"));

        self.pause_core(b, true);

        if s.is_filament_change() && s.purge_amount > 0.0 {
            b.line(
                GcodeLine::g(1)
                    .param('F', (extruder.nozzle_size * 500.0).round())
                    .param('E', s.purge_amount)
                    .comment("Extra extrude after the unpause"),
            );
            b.raw("@info wait for cleaning nozzle from previous filament");
            b.raw("@pause remove the waste filament from parking area and press continue printing");
            self.retract(b, &extruder, false);
        }

        self.return_to_print(b, point, &extruder);

        if !point.at_resume.is_retracted {
            b.line(
                GcodeLine::g(1)
                    .param('E', extruder.retraction_amount)
                    .param('F', extruder.prime_feed())
                    .comment("Unretract"),
            );
        }
        self.restore_extruder(b, point);
    }

    /// Gather the stream facts for a pause at the end of block `prev`
    fn locate(
        &self,
        stream: &LayerStream,
        prev: usize,
        preview_layer: i64,
        gcode_layer: i64,
        profile: &PrinterProfile,
    ) -> PausePoint {
        let options =
            ReconstructOptions::for_profile(profile, RetractionStrategy::ExplicitCommand);
        let pause_anchor = Anchor::before_metadata(stream, prev);
        let at_pause = reconstruct_state(
            stream,
            pause_anchor,
            ScanDirection::Backward(Lookback::ToStart),
            &options,
        );

        let resume_temperature = {
            let fallback = self
                .settings
                .resume_temperature
                .unwrap_or(profile.primary().print_temperature);
            if self.uses_tool_temperature(profile) {
                let forward = reconstruct_state(
                    stream,
                    pause_anchor,
                    ScanDirection::Forward { from_block: 0 },
                    &options,
                );
                forward
                    .temperature(forward.active_tool)
                    .unwrap_or(fallback)
            } else {
                fallback
            }
        };

        let redo_lines = if self.settings.redoes_layer() {
            stream.block(prev).map(redo_copy)
        } else {
            None
        };

        match redo_lines {
            Some(lines) => {
                let at_resume = reconstruct_state(
                    stream,
                    Anchor::new(prev, 0),
                    ScanDirection::Backward(Lookback::ToStart),
                    &options,
                );
                let resume_xy = first_xy(&lines)
                    .unwrap_or((at_resume.x_or_origin(), at_resume.y_or_origin()));
                PausePoint {
                    preview_layer,
                    gcode_layer,
                    at_pause,
                    at_resume,
                    resume_xy,
                    resume_temperature,
                    redo_lines: Some(lines),
                }
            }
            None => PausePoint {
                preview_layer,
                gcode_layer,
                resume_xy: (at_pause.x_or_origin(), at_pause.y_or_origin()),
                at_resume: at_pause.clone(),
                at_pause,
                resume_temperature,
                redo_lines: None,
            },
        }
    }
}

impl PostProcessor for PauseAtLayer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Pause the print at the end of listed layers, optionally for a filament change"
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

        // pausing after preview layer P means stopping before preview P + 1
        let (layers, warnings) = parse_layer_list(&self.settings.layers);
        let next_layers: Vec<i64> = layers.iter().map(|p| p + 1).collect();
        let raft = raft_layer_count(stream, profile);
        let mut selection = select(
            stream,
            &LayerRequest::Once(next_layers),
            LayerNumbering::Preview,
            raft,
            profile.print_sequence,
        );
        selection.requested += warnings.len();
        selection.missed += warnings.len();
        selection.warnings.extend(warnings);
        selection.report(Self::NAME, context.notifier);

        let mut inserted = 0usize;
        for target in &selection.targets {
            if target.index <= 1 {
                continue;
            }
            let prev = target.index - 1;
            let preview = target.layer + raft as i64;
            let point = self.locate(stream, prev, preview, target.layer - 1, profile);
            let block = self.synthesize(&point, profile);
            splice(stream, prev, SplicePoint::BeforeMetadata, block)?;
            inserted += 1;
        }

        Ok(ProcessReport::new(Self::NAME, inserted, selection.missed))
    }
}

/// Split custom commands on commas and capitalize each command letter
fn capitalized_commands(text: &str) -> Vec<String> {
    crate::block::split_commands(text, true)
        .into_iter()
        .map(|cmd| {
            let mut chars = cmd.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => cmd,
            }
        })
        .collect()
}

/// Copy of a layer body for reprinting, with the sentinel renamed so it is
/// not taken for a real layer
fn redo_copy(block: &layerpost_core::LayerBlock) -> Vec<String> {
    let sentinel = block.sentinel_index();
    block
        .body()
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if Some(i) == sentinel {
                format!(
                    "{:<width$}; Redo layer from PauseAtLayer",
                    format!("{}.5", line.trim_end()),
                    width = COMMENT_COLUMN - 1
                )
            } else {
                line.clone()
            }
        })
        .collect()
}

fn first_xy(lines: &[String]) -> Option<(f64, f64)> {
    lines
        .iter()
        .filter(|l| is_motion(l))
        .find_map(|l| Some((get_value(l, 'X')?, get_value(l, 'Y')?)))
}
