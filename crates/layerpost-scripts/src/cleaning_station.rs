//! Nozzle cleaning station
//!
//! At the end of selected layers the head lifts, travels to a brush at the
//! right edge of the bed, wipes back and forth, and returns. Half the
//! retraction happens before the lift and the other half is spread over
//! the wipe strokes. A lift that would pass the machine height is never
//! clamped: the insertion is replaced by a comment.

use layerpost_core::{splice, LayerStream, PrinterProfile, SplicePoint, SynthesizedBlock};
use layerpost_parser::{
    format_number, reconstruct_state, Anchor, ExtrusionMode, GcodeLine, MachineState,
    ReconstructOptions, RetractionStrategy, ScanDirection,
};
use serde::{Deserialize, Serialize};

use crate::block::{round_to, BlockBuilder};
use crate::error::{clamp_param, ParameterError, ScriptResult};
use crate::processor::{PostProcessor, ProcessContext, ProcessReport};
use crate::selector::{raft_layer_count, select, InsertFrequency, LayerNumbering, LayerRequest};

const LIFT_FEED: f64 = 1800.0;
const WIPE_FEED: f64 = 600.0;

/// Settings for [`CleaningStation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningSettings {
    pub enabled: bool,
    pub frequency: InsertFrequency,
    /// First layer (1 is `;LAYER:0`)
    pub start_layer: i64,
    /// Last layer, inclusive; `None` or -1 runs to the end of the file
    pub end_layer: Option<i64>,
    /// Z lift above the current layer (mm)
    pub z_lift: f64,
    /// Wipe repetitions, 1 to 3
    pub clean_reps: u32,
    /// Wipe stroke length (mm)
    pub clean_stroke: f64,
}

impl Default for CleaningSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: InsertFrequency::EveryLayer,
            start_layer: 1,
            end_layer: None,
            z_lift: 25.0,
            clean_reps: 1,
            clean_stroke: 20.0,
        }
    }
}

impl CleaningSettings {
    /// Bring values into range, returning what was changed
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        let mut warnings = Vec::new();
        clamp_param("z_lift", &mut self.z_lift, 2.0, 500.0, &mut warnings);
        clamp_param("clean_stroke", &mut self.clean_stroke, 10.0, 75.0, &mut warnings);
        if !(1..=3).contains(&self.clean_reps) {
            warnings.push(ParameterError::OutOfRange {
                name: "clean_reps".to_string(),
                value: f64::from(self.clean_reps),
                min: 1.0,
                max: 3.0,
            });
            self.clean_reps = self.clean_reps.clamp(1, 3);
        }
        if self.end_layer == Some(-1) {
            self.end_layer = None;
        }
        warnings
    }
}

/// Inserts nozzle wipes at layer ends
#[derive(Debug, Clone, Default)]
pub struct CleaningStation {
    settings: CleaningSettings,
}

impl CleaningStation {
    pub const NAME: &'static str = "Cleaning Station";

    pub fn new(settings: CleaningSettings) -> Self {
        Self { settings }
    }

    /// Seconds one cleaning adds to the print
    ///
    /// Travel to the brush and back, the wipe strokes at 10 mm/s, and the
    /// lift up and down at 30 mm/s.
    pub fn time_per_instance(&self, profile: &PrinterProfile) -> u64 {
        let s = &self.settings;
        let travel = profile.primary().travel_speed.max(1.0);
        let seconds = 2.0 * profile.machine_width / travel
            + f64::from(s.clean_reps) * s.clean_stroke * 2.0 / (WIPE_FEED / 60.0)
            + 2.0 * s.z_lift / (LIFT_FEED / 60.0);
        seconds.round().max(0.0) as u64
    }

    /// Build the cleaning block, or `None` when the lift would pass the
    /// machine height
    pub fn synthesize(
        &self,
        state: &MachineState,
        profile: &PrinterProfile,
    ) -> Option<SynthesizedBlock> {
        let s = &self.settings;
        let z = state.z_or_origin();
        if z + s.z_lift > profile.machine_height {
            return None;
        }

        let extruder = profile.primary();
        let retract = extruder.retraction_amount;
        let reps = s.clean_reps.max(1);
        let wipe_retract = round_to(retract / 2.0 / (2.0 * f64::from(reps)), 5);
        let brush_far = profile.machine_width;
        let brush_near = profile.machine_width - s.clean_stroke;
        let retracting = !state.is_retracted;
        let relative = state.extrusion_mode == ExtrusionMode::Relative;

        let mut b = BlockBuilder::new();
        b.comment("TYPE:CUSTOM CleaningStation");
        if retracting {
            let target = if relative {
                -retract / 2.0
            } else {
                round_to(state.extrusion_position - retract / 2.0, 5)
            };
            b.line(GcodeLine::g(1).param('F', extruder.retract_feed()).param('E', target));
        } else {
            b.comment("Retract not required");
        }
        b.raw("G91");
        if retracting {
            b.raw("M83");
        }
        b.line(GcodeLine::g(0).param('F', LIFT_FEED).param('Z', s.z_lift));
        b.raw("G90");
        b.line(GcodeLine::g(0).param('F', extruder.travel_feed()).param('X', brush_near));
        for _ in 0..reps {
            for x in [brush_far, brush_near] {
                let stroke = GcodeLine::g(0).param('F', WIPE_FEED).param('X', x);
                let stroke = if retracting {
                    stroke.param('E', -wipe_retract)
                } else {
                    stroke
                };
                b.line(stroke);
            }
        }
        b.line(
            GcodeLine::g(0)
                .param('F', extruder.travel_feed())
                .param('X', state.x_or_origin())
                .param('Y', state.y_or_origin()),
        );
        b.raw("G91");
        if retracting {
            b.raw(state.extrusion_mode.command());
        }
        b.line(GcodeLine::g(0).param('F', LIFT_FEED).param('Z', -s.z_lift));
        b.raw("G90");
        if let Some(feed) = state.feed_rate {
            b.line(GcodeLine::g(0).param('F', feed));
        }
        if retracting {
            let prime = if relative {
                retract
            } else {
                state.extrusion_position
            };
            b.line(GcodeLine::g(1).param('F', extruder.prime_feed()).param('E', prime));
        } else {
            b.comment("Prime not required");
        }
        b.comment("End of Nozzle Cleaning");
        Some(b.finish())
    }
}

impl PostProcessor for CleaningStation {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Wipe the nozzle on a brush at the bed edge at the end of selected layers"
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

        let request = LayerRequest::from_frequency(
            self.settings.frequency,
            self.settings.start_layer,
            self.settings.end_layer,
        );
        let raft = raft_layer_count(stream, profile);
        let selection = select(
            stream,
            &request,
            LayerNumbering::Sliced,
            raft,
            profile.print_sequence,
        );
        selection.report(Self::NAME, context.notifier);

        let options = ReconstructOptions::for_profile(profile, RetractionStrategy::SignInference);
        let mut inserted = 0usize;
        let mut skipped = 0usize;

        for target in &selection.targets {
            let state = reconstruct_state(
                stream,
                Anchor::before_metadata(stream, target.index),
                ScanDirection::Forward {
                    from_block: target.index.saturating_sub(1),
                },
                &options,
            );
            let block = match self.synthesize(&state, profile) {
                Some(block) => {
                    inserted += 1;
                    block
                }
                None => {
                    let lift_to = state.z_or_origin() + self.settings.z_lift;
                    tracing::warn!(
                        "{}: lift to Z{} at layer {} exceeds machine height {}",
                        Self::NAME,
                        format_number(lift_to),
                        target.layer,
                        profile.machine_height
                    );
                    skipped += 1;
                    SynthesizedBlock::new(vec![format!(
                        ";CleaningStation - Z Lift to {} exceeds Machine Height",
                        format_number(lift_to)
                    )])
                }
            };
            splice(stream, target.index, SplicePoint::BeforeMetadata, block)?;
        }

        if skipped > 0 {
            context.notifier.show_message(
                Self::NAME,
                &format!(
                    "{} cleanings were skipped because the lift would exceed the machine height",
                    skipped
                ),
            );
        }

        if inserted > 0 {
            let per_instance = self.time_per_instance(profile);
            let total = per_instance * inserted as u64;
            stream.push_header_comment(format!(";  Time Adjustment / instance = {}", per_instance));
            if let Some(print_time) = stream.header_time() {
                stream.set_header_time(print_time.round().max(0.0) as u64 + total);
            }
            context.notifier.show_message(
                "[Cleaning Station]",
                &format!(
                    "Time Adjustment Total: {}hr{}min",
                    total / 3600,
                    (total % 3600) / 60
                ),
            );
        }

        Ok(ProcessReport::new(Self::NAME, inserted, selection.missed).with_skipped(skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layerpost_core::RecordingNotifier;
    use layerpost_parser::get_value;

    fn stream(z_base: f64) -> LayerStream {
        let mut blocks = vec![
            ";FLAVOR:Marlin\n;TIME:1000\n;Generated with Cura_SteamEngine 5.6.0\n".to_string(),
            "M82\nG28\nG92 E0\n".to_string(),
        ];
        for layer in 0..5 {
            blocks.push(format!(
                ";LAYER:{}\nG0 F6000 X50 Y50 Z{}\nG1 F1500 X60 Y{} E{}\n;TIME_ELAPSED:{}\n",
                layer,
                format_number(z_base + 0.2 * layer as f64),
                50 + layer,
                10 * (layer + 1),
                100 * (layer + 1)
            ));
        }
        blocks.push(";End of Gcode\n".to_string());
        LayerStream::from_blocks(blocks)
    }

    fn profile() -> PrinterProfile {
        PrinterProfile {
            machine_width: 220.0,
            machine_height: 200.0,
            ..PrinterProfile::default()
        }
    }

    #[test]
    fn test_time_per_instance() {
        let station = CleaningStation::default();
        // 440/150 + 1*20*2/10 + 50/30 = 2.93 + 4 + 1.67
        assert_eq!(station.time_per_instance(&profile()), 9);
    }

    #[test]
    fn test_every_second_layer_and_header_time() {
        let mut stream = stream(0.2);
        let notifier = RecordingNotifier::new();
        let profile = profile();
        let station = CleaningStation::new(CleaningSettings {
            frequency: InsertFrequency::Every2nd,
            ..CleaningSettings::default()
        });
        let report = station
            .execute(&mut stream, &ProcessContext::new(&profile, &notifier))
            .expect("pass runs");
        assert_eq!(report.insertions, 3);
        for index in [2, 4, 6] {
            let lines = stream.block(index).expect("layer").lines().to_vec();
            assert!(lines.contains(&";TYPE:CUSTOM CleaningStation".to_string()));
            assert!(lines.last().map(|l| l.starts_with(";TIME_ELAPSED:")).unwrap_or(false));
        }
        assert_eq!(stream.header_time(), Some(1027.0));
        assert!(stream
            .block(0)
            .expect("header")
            .lines()
            .contains(&";  Time Adjustment / instance = 9".to_string()));
        assert_eq!(notifier.messages()[0].text, "Time Adjustment Total: 0hr0min");
    }

    #[test]
    fn test_wipe_retracts_half_then_the_rest() {
        let mut stream = stream(0.2);
        let notifier = RecordingNotifier::new();
        let profile = profile();
        let station = CleaningStation::new(CleaningSettings {
            frequency: InsertFrequency::OnceOnly,
            start_layer: 2,
            clean_reps: 2,
            ..CleaningSettings::default()
        });
        station
            .execute(&mut stream, &ProcessContext::new(&profile, &notifier))
            .expect("pass runs");
        let lines = stream.block(3).expect("layer 1").lines().to_vec();
        // E20 absolute, half of 6.5 retracted first
        assert!(lines.contains(&"G1 E16.75 F1500".to_string()));
        let wipe_e: f64 = lines
            .iter()
            .filter(|l| l.starts_with("G0") && l.contains('X') && l.contains('E'))
            .filter_map(|l| get_value(l, 'E'))
            .sum();
        assert!((wipe_e + 3.25).abs() < 1e-6);
        assert!(lines.contains(&"G0 Z25 F1800".to_string()));
        assert!(lines.contains(&"G0 Z-25 F1800".to_string()));
        assert!(lines.contains(&"G0 X60 Y51 F9000".to_string()));
        assert!(lines.contains(&"G1 E20 F1500".to_string()));
    }

    #[test]
    fn test_build_height_guard() {
        let mut stream = stream(189.8);
        let notifier = RecordingNotifier::new();
        let profile = profile();
        let station = CleaningStation::new(CleaningSettings {
            frequency: InsertFrequency::OnceOnly,
            start_layer: 2,
            ..CleaningSettings::default()
        });
        let report = station
            .execute(&mut stream, &ProcessContext::new(&profile, &notifier))
            .expect("pass runs");
        assert_eq!(report.insertions, 0);
        assert_eq!(report.skipped, 1);
        let lines = stream.block(3).expect("layer 1").lines().to_vec();
        assert!(lines
            .contains(&";CleaningStation - Z Lift to 215 exceeds Machine Height".to_string()));
        assert!(!lines
            .iter()
            .any(|l| l.starts_with("G0") && get_value(l, 'Z').is_some_and(|z| z > 200.0)));
        assert_eq!(stream.header_time(), Some(1000.0));
    }

    #[test]
    fn test_normalize() {
        let mut settings = CleaningSettings {
            z_lift: 1.0,
            clean_reps: 7,
            clean_stroke: 5.0,
            end_layer: Some(-1),
            ..CleaningSettings::default()
        };
        assert_eq!(settings.normalize().len(), 3);
        assert_eq!(settings.z_lift, 2.0);
        assert_eq!(settings.clean_reps, 3);
        assert_eq!(settings.clean_stroke, 10.0);
        assert_eq!(settings.end_layer, None);
    }
}
