//! # layerpost parser
//!
//! Token-anchored G-code value extraction, a canonical line builder for
//! generated commands, and machine state reconstruction over a layer stream.

pub mod command;
pub mod state;

pub use command::{
    code_part, command_code, format_number, get_value, get_value_or, has_key, is_motion,
    CommandCode, GcodeLine, COMMENT_COLUMN,
};
pub use state::{
    is_extruder_only_move, reconstruct_state, Anchor, ExtrusionMode, Lookback, MachineState,
    ReconstructOptions, RetractionStrategy, ScanDirection,
};
