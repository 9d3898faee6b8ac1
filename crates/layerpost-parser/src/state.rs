//! Machine state reconstruction
//!
//! Recovers position, extrusion mode, extrusion position, retraction status,
//! feed rate, active tool and target temperatures at an arbitrary point of a
//! [`LayerStream`]. Reconstruction is a pure function of the stream: nothing
//! is cached between calls, so results stay correct after earlier passes
//! mutated the stream.
//!
//! Lines inside the scan window are replayed in file order, honouring
//! `G90`/`G91`, `M82`/`M83`, `G92` and `G28`, so the last assignment of each
//! field wins. Backward scans start with the anchor block and widen the
//! window into earlier blocks only while position or retraction is still
//! unknown. Fields never seen fall back to the origin, not retracted.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use layerpost_core::{LayerStream, PrinterProfile};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::command::{code_part, command_code, get_value, CommandCode};

/// Absolute (`M82`) or relative (`M83`) extrusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtrusionMode {
    #[default]
    Absolute,
    Relative,
}

impl ExtrusionMode {
    /// The command selecting this mode
    pub fn command(self) -> &'static str {
        match self {
            ExtrusionMode::Absolute => "M82",
            ExtrusionMode::Relative => "M83",
        }
    }

    /// Mode implied by the profile's global flag
    pub fn from_relative_flag(relative: bool) -> Self {
        if relative {
            ExtrusionMode::Relative
        } else {
            ExtrusionMode::Absolute
        }
    }
}

/// How a retraction is recognised while scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetractionStrategy {
    /// Infer from extrusion values only: a decreasing absolute E or a
    /// negative relative E is a retraction. `G10`/`G11` are ignored.
    #[default]
    SignInference,
    /// `G10`/`G11` firmware retraction, plus E-only moves classified by
    /// direction. A printing move (X/Y with E) always ends a retraction.
    ExplicitCommand,
}

/// How far back a backward scan may widen its window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// The anchor block plus at most this many earlier blocks
    Blocks(usize),
    /// Every block back to the start of the file
    ToStart,
}

/// Scan direction for a reconstruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// From the anchor into earlier blocks
    Backward(Lookback),
    /// From line 0 of `from_block` up to the anchor
    Forward {
        /// First block replayed.
        from_block: usize,
    },
}

/// A point in the stream: just before `line` of `block`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Anchor {
    pub block: usize,
    pub line: usize,
}

impl Anchor {
    /// Anchor before the given line
    pub fn new(block: usize, line: usize) -> Self {
        Self { block, line }
    }

    /// Anchor after the last line of `block`
    pub fn end_of(stream: &LayerStream, block: usize) -> Self {
        let line = stream.block(block).map(|b| b.len()).unwrap_or(0);
        Self { block, line }
    }

    /// Anchor just before the trailing metadata of `block`
    pub fn before_metadata(stream: &LayerStream, block: usize) -> Self {
        let line = stream.block(block).map(|b| b.tail_offset()).unwrap_or(0);
        Self { block, line }
    }
}

/// Options shared by every reconstruction of one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructOptions {
    pub strategy: RetractionStrategy,
    /// Extrusion mode assumed when no `M82`/`M83` is in the window
    pub default_mode: ExtrusionMode,
}

impl ReconstructOptions {
    /// Options derived from the profile
    pub fn for_profile(profile: &PrinterProfile, strategy: RetractionStrategy) -> Self {
        Self {
            strategy,
            default_mode: ExtrusionMode::from_relative_flag(profile.relative_extrusion),
        }
    }
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            strategy: RetractionStrategy::SignInference,
            default_mode: ExtrusionMode::Absolute,
        }
    }
}

/// Best-known machine state at one point of the stream
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MachineState {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    /// Absolute E in absolute mode; the last E delta in relative mode
    pub extrusion_position: f64,
    pub extrusion_mode: ExtrusionMode,
    pub is_retracted: bool,
    pub feed_rate: Option<f64>,
    pub active_tool: usize,
    /// Target nozzle temperature per tool index
    pub temperatures: BTreeMap<usize, f64>,
}

impl MachineState {
    /// X, or 0 when never seen
    pub fn x_or_origin(&self) -> f64 {
        self.x.unwrap_or(0.0)
    }

    /// Y, or 0 when never seen
    pub fn y_or_origin(&self) -> f64 {
        self.y.unwrap_or(0.0)
    }

    /// Z, or 0 when never seen
    pub fn z_or_origin(&self) -> f64 {
        self.z.unwrap_or(0.0)
    }

    /// True when X and Y were both recovered
    pub fn has_xy(&self) -> bool {
        self.x.is_some() && self.y.is_some()
    }

    /// Target temperature of a tool, if one was set
    pub fn temperature(&self, tool: usize) -> Option<f64> {
        self.temperatures.get(&tool).copied()
    }

    /// Replay a run of lines with no prior knowledge
    pub fn from_lines<'a, I>(lines: I, options: &ReconstructOptions) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut tracker = Tracker::default();
        for line in lines {
            tracker.apply(line, options);
        }
        tracker.finish(options)
    }
}

/// Reconstruct the machine state at `anchor`
///
/// Never fails: an anchor outside the stream is clamped, and anything not
/// found degrades to the defaults.
pub fn reconstruct_state(
    stream: &LayerStream,
    anchor: Anchor,
    direction: ScanDirection,
    options: &ReconstructOptions,
) -> MachineState {
    if stream.is_empty() {
        return Tracker::default().finish(options);
    }
    let anchor = Anchor {
        block: anchor.block.min(stream.len() - 1),
        line: anchor.line,
    };

    let tracker = match direction {
        ScanDirection::Forward { from_block } => {
            replay(stream, from_block.min(anchor.block), anchor, options)
        }
        ScanDirection::Backward(lookback) => {
            let floor = match lookback {
                Lookback::Blocks(n) => anchor.block.saturating_sub(n),
                Lookback::ToStart => 0,
            };
            let mut width = 0usize;
            loop {
                let start = anchor.block.saturating_sub(width).max(floor);
                let tracker = replay(stream, start, anchor, options);
                if tracker.resolved() || start == floor {
                    break tracker;
                }
                width = if width == 0 { 1 } else { width * 2 };
            }
        }
    };

    let state = tracker.finish(options);
    tracing::debug!(
        "Reconstructed state at block {} line {}: X{:?} Y{:?} Z{:?} E{} {:?} retracted={}",
        anchor.block,
        anchor.line,
        state.x,
        state.y,
        state.z,
        state.extrusion_position,
        state.extrusion_mode,
        state.is_retracted
    );
    state
}

fn replay(
    stream: &LayerStream,
    start: usize,
    anchor: Anchor,
    options: &ReconstructOptions,
) -> Tracker {
    let mut tracker = Tracker::default();
    for index in start..=anchor.block {
        let Some(block) = stream.block(index) else {
            break;
        };
        let lines = if index == anchor.block {
            &block.lines()[..anchor.line.min(block.len())]
        } else {
            block.lines()
        };
        for line in lines {
            tracker.apply(line, options);
        }
    }
    tracker
}

fn e_only_regex() -> &'static Regex {
    static E_ONLY_REGEX: OnceLock<Regex> = OnceLock::new();
    E_ONLY_REGEX.get_or_init(|| {
        Regex::new(r"^G[01](?:\s+F[-+]?[\d.]+)?\s+E[-+]?[\d.]+(?:\s+F[-+]?[\d.]+)?$")
            .expect("invalid regex pattern")
    })
}

/// True for a move that only drives the extruder (`G1 F2700 E-6.5`)
pub fn is_extruder_only_move(line: &str) -> bool {
    e_only_regex().is_match(code_part(line))
}

#[derive(Debug, Default)]
struct Tracker {
    x: Option<f64>,
    y: Option<f64>,
    z: Option<f64>,
    e: Option<f64>,
    // logical E position, carried through relative moves
    logical_e: Option<f64>,
    mode: Option<ExtrusionMode>,
    relative_positioning: bool,
    retracted: Option<bool>,
    feed_rate: Option<f64>,
    tool: Option<usize>,
    temperatures: BTreeMap<usize, f64>,
}

impl Tracker {
    fn resolved(&self) -> bool {
        self.x.is_some() && self.y.is_some() && self.z.is_some() && self.retracted.is_some()
    }

    fn mode(&self, options: &ReconstructOptions) -> ExtrusionMode {
        self.mode.unwrap_or(options.default_mode)
    }

    fn apply(&mut self, line: &str, options: &ReconstructOptions) {
        let Some(code) = command_code(line) else {
            return;
        };
        match code {
            CommandCode::G(0..=3) => self.apply_motion(line, options),
            CommandCode::G(10) => {
                if options.strategy == RetractionStrategy::ExplicitCommand {
                    self.retracted = Some(true);
                }
            }
            CommandCode::G(11) => {
                if options.strategy == RetractionStrategy::ExplicitCommand {
                    self.retracted = Some(false);
                }
            }
            CommandCode::G(28) => {
                let axes: Vec<char> = code_part(line)
                    .split_whitespace()
                    .skip(1)
                    .filter_map(|word| word.chars().next())
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                let home_all = axes.is_empty();
                if home_all || axes.contains(&'X') {
                    self.x = Some(0.0);
                }
                if home_all || axes.contains(&'Y') {
                    self.y = Some(0.0);
                }
                if home_all || axes.contains(&'Z') {
                    self.z = Some(0.0);
                }
            }
            CommandCode::G(90) => self.relative_positioning = false,
            CommandCode::G(91) => self.relative_positioning = true,
            CommandCode::G(92) => {
                if let Some(e) = get_value(line, 'E') {
                    self.e = Some(e);
                    self.logical_e = Some(e);
                }
                for (axis, slot) in [('X', &mut self.x), ('Y', &mut self.y), ('Z', &mut self.z)] {
                    if let Some(v) = get_value(line, axis) {
                        *slot = Some(v);
                    }
                }
            }
            CommandCode::M(82) => {
                if self.mode(options) == ExtrusionMode::Relative {
                    self.e = self.logical_e;
                }
                self.mode = Some(ExtrusionMode::Absolute);
            }
            CommandCode::M(83) => self.mode = Some(ExtrusionMode::Relative),
            CommandCode::M(104) | CommandCode::M(109) => {
                if let Some(temp) = get_value(line, 'S') {
                    let tool = get_value(line, 'T')
                        .map(|t| t.max(0.0) as usize)
                        .or(self.tool)
                        .unwrap_or(0);
                    self.temperatures.insert(tool, temp);
                }
            }
            CommandCode::T(n) => self.tool = Some(n as usize),
            _ => {}
        }
    }

    fn apply_motion(&mut self, line: &str, options: &ReconstructOptions) {
        let relative = self.relative_positioning;
        for (axis, slot) in [('X', &mut self.x), ('Y', &mut self.y), ('Z', &mut self.z)] {
            if let Some(v) = get_value(line, axis) {
                *slot = if relative { slot.map(|p| p + v) } else { Some(v) };
            }
        }
        if let Some(f) = get_value(line, 'F') {
            self.feed_rate = Some(f);
        }

        let Some(e) = get_value(line, 'E') else {
            return;
        };
        let mode = self.mode(options);
        let delta = match mode {
            ExtrusionMode::Relative => {
                self.logical_e = self.logical_e.map(|p| p + e);
                Some(e)
            }
            ExtrusionMode::Absolute => {
                self.logical_e = Some(e);
                self.e.map(|prev| e - prev)
            }
        };
        self.e = Some(e);

        let prints = get_value(line, 'X').is_some() || get_value(line, 'Y').is_some();
        match options.strategy {
            RetractionStrategy::SignInference => {
                if let Some(d) = delta {
                    if d < 0.0 {
                        self.retracted = Some(true);
                    } else if d > 0.0 {
                        self.retracted = Some(false);
                    }
                }
            }
            RetractionStrategy::ExplicitCommand => {
                if prints {
                    self.retracted = Some(false);
                } else if is_extruder_only_move(line) {
                    if let Some(d) = delta {
                        if d < 0.0 {
                            self.retracted = Some(true);
                        } else if d > 0.0 {
                            self.retracted = Some(false);
                        }
                    }
                }
            }
        }
    }

    fn finish(self, options: &ReconstructOptions) -> MachineState {
        let extrusion_mode = self.mode(options);
        MachineState {
            x: self.x,
            y: self.y,
            z: self.z,
            extrusion_position: self.e.unwrap_or(0.0),
            extrusion_mode,
            is_retracted: self.retracted.unwrap_or(false),
            feed_rate: self.feed_rate,
            active_tool: self.tool.unwrap_or(0),
            temperatures: self.temperatures,
        }
    }
}
