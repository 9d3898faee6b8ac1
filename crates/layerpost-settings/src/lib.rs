//! # layerpost settings
//!
//! Job files: the printer profile snapshot and the ordered script list,
//! loaded from TOML or JSON and turned into a processor pipeline.

pub mod config;
pub mod error;

pub use config::{ConfigWarning, JobConfig, ScriptConfig, CONFIG_DIR_NAME, JOB_FILE_NAME};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
