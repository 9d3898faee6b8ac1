//! # layerpost scripts
//!
//! Post-processing passes over a layer stream. Each pass selects layers,
//! reconstructs the machine state it needs, synthesizes a block of G-code
//! and splices it in. Passes are chained through [`ProcessorPipeline`].

pub mod block;
pub mod cleaning_station;
pub mod error;
pub mod filament_change;
pub mod insert_at_layer;
pub mod multi_extruder;
pub mod pause;
pub mod processor;
pub mod selector;
pub mod time_lapse;

pub use block::{
    chunk_distance, reload_chunks, split_commands, BlockBuilder, PauseMethod, MAX_EXTRUDE_CHUNK,
};
pub use cleaning_station::{CleaningSettings, CleaningStation};
pub use error::{ParameterError, ScriptError, ScriptResult};
pub use filament_change::{FilamentChange, FilamentChangeSettings, LaterRetractParam};
pub use insert_at_layer::{InsertAtLayerChange, InsertAtLayerSettings};
pub use multi_extruder::{EmulateMultiExtruder, MultiExtruderSettings, ToolSettings, MAX_TOOLS};
pub use pause::{PauseAtLayer, PausePoint, PauseReason, PauseSettings, ResumeTemperatureCommand};
pub use processor::{
    PostProcessor, ProcessContext, ProcessReport, ProcessorHandle, ProcessorPipeline,
};
pub use selector::{
    parse_layer_list, raft_layer_count, select, to_internal, InsertFrequency, LayerNumbering,
    LayerRequest, Selection, Target,
};
pub use time_lapse::{TimeLapse, TimeLapseSettings};
