//! # layerpost core
//!
//! Foundation types shared by every layerpost crate: the layer stream and
//! its splicer, the printer profile snapshot, the notification sink and the
//! error taxonomy.

pub mod error;
pub mod message;
pub mod profile;
pub mod splice;
pub mod stream;

pub use error::{Error, ProfileError, Result, StreamError};
pub use message::{Message, Notifier, NotifierHandle, RecordingNotifier, TracingNotifier};
pub use profile::{
    AdhesionType, ExtruderProfile, FirmwareFlavor, PrintSequence, PrinterProfile, PropertySource,
    StaticSource,
};
pub use splice::{splice, SplicePoint, SynthesizedBlock};
pub use stream::{
    is_metadata_line, parse_sentinel, LayerBlock, LayerStream, FILAMENT_USED_PREFIX,
    HEADER_TIME_PREFIX, LAYER_PREFIX, MIN_BLOCKS, TIME_ELAPSED_PREFIX,
};
