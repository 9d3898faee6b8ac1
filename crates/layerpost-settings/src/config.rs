//! Job configuration
//!
//! A job file carries the printer profile snapshot and the ordered list of
//! scripts to run, each with its own settings. Files are TOML or JSON,
//! picked by extension:
//!
//! ```toml
//! [printer]
//! machine_height = 250.0
//!
//! [[scripts]]
//! script = "pause_at_layer"
//! layers = "25, 40"
//!
//! [[scripts]]
//! script = "time_lapse"
//! frequency = "every_2nd"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use layerpost_core::PrinterProfile;
use layerpost_scripts::{
    CleaningSettings, CleaningStation, EmulateMultiExtruder, FilamentChange,
    FilamentChangeSettings, InsertAtLayerChange, InsertAtLayerSettings, MultiExtruderSettings,
    ParameterError, PauseAtLayer, PauseSettings, ProcessorHandle, ProcessorPipeline, TimeLapse,
    TimeLapseSettings,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, SettingsError, SettingsResult};

/// Directory name under the platform config directory
pub const CONFIG_DIR_NAME: &str = "layerpost";

/// Default job file name
pub const JOB_FILE_NAME: &str = "job.toml";

/// One script with its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "script", rename_all = "snake_case")]
pub enum ScriptConfig {
    PauseAtLayer(PauseSettings),
    FilamentChange(FilamentChangeSettings),
    CleaningStation(CleaningSettings),
    TimeLapse(TimeLapseSettings),
    EmulateMultiExtruder(MultiExtruderSettings),
    InsertAtLayerChange(InsertAtLayerSettings),
}

impl ScriptConfig {
    /// Display name of the script
    pub fn name(&self) -> &'static str {
        match self {
            ScriptConfig::PauseAtLayer(_) => PauseAtLayer::NAME,
            ScriptConfig::FilamentChange(_) => FilamentChange::NAME,
            ScriptConfig::CleaningStation(_) => CleaningStation::NAME,
            ScriptConfig::TimeLapse(_) => TimeLapse::NAME,
            ScriptConfig::EmulateMultiExtruder(_) => EmulateMultiExtruder::NAME,
            ScriptConfig::InsertAtLayerChange(_) => InsertAtLayerChange::NAME,
        }
    }

    pub fn is_enabled(&self) -> bool {
        match self {
            ScriptConfig::PauseAtLayer(s) => s.enabled,
            ScriptConfig::FilamentChange(s) => s.enabled,
            ScriptConfig::CleaningStation(s) => s.enabled,
            ScriptConfig::TimeLapse(s) => s.enabled,
            ScriptConfig::EmulateMultiExtruder(s) => s.enabled,
            ScriptConfig::InsertAtLayerChange(s) => s.enabled,
        }
    }

    /// Clamp the script's settings into range
    pub fn normalize(&mut self) -> Vec<ParameterError> {
        match self {
            ScriptConfig::PauseAtLayer(s) => s.normalize(),
            ScriptConfig::FilamentChange(s) => s.normalize(),
            ScriptConfig::CleaningStation(s) => s.normalize(),
            ScriptConfig::TimeLapse(s) => s.normalize(),
            ScriptConfig::EmulateMultiExtruder(s) => s.normalize(),
            ScriptConfig::InsertAtLayerChange(s) => s.normalize(),
        }
    }

    /// Build the pass for these settings
    pub fn processor(&self) -> ProcessorHandle {
        match self {
            ScriptConfig::PauseAtLayer(s) => Arc::new(PauseAtLayer::new(s.clone())),
            ScriptConfig::FilamentChange(s) => Arc::new(FilamentChange::new(s.clone())),
            ScriptConfig::CleaningStation(s) => Arc::new(CleaningStation::new(s.clone())),
            ScriptConfig::TimeLapse(s) => Arc::new(TimeLapse::new(s.clone())),
            ScriptConfig::EmulateMultiExtruder(s) => {
                Arc::new(EmulateMultiExtruder::new(s.clone()))
            }
            ScriptConfig::InsertAtLayerChange(s) => Arc::new(InsertAtLayerChange::new(s.clone())),
        }
    }
}

/// A normalisation warning tagged with the script it came from
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    /// Position of the script in the job
    pub index: usize,
    pub script: &'static str,
    pub problem: ParameterError,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "script #{} ({}): {}", self.index + 1, self.script, self.problem)
    }
}

/// Printer profile plus the scripts to run, in order
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub printer: PrinterProfile,
    pub scripts: Vec<ScriptConfig>,
}

impl JobConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// A job listing every script with its default settings, all disabled
    pub fn template() -> Self {
        let mut scripts = vec![
            ScriptConfig::PauseAtLayer(PauseSettings::default()),
            ScriptConfig::FilamentChange(FilamentChangeSettings::default()),
            ScriptConfig::CleaningStation(CleaningSettings::default()),
            ScriptConfig::TimeLapse(TimeLapseSettings::default()),
            ScriptConfig::EmulateMultiExtruder(MultiExtruderSettings::default()),
            ScriptConfig::InsertAtLayerChange(InsertAtLayerSettings::default()),
        ];
        for script in &mut scripts {
            match script {
                ScriptConfig::PauseAtLayer(s) => s.enabled = false,
                ScriptConfig::FilamentChange(s) => s.enabled = false,
                ScriptConfig::CleaningStation(s) => s.enabled = false,
                ScriptConfig::TimeLapse(s) => s.enabled = false,
                ScriptConfig::EmulateMultiExtruder(s) => s.enabled = false,
                ScriptConfig::InsertAtLayerChange(s) => s.enabled = false,
            }
        }
        Self {
            printer: PrinterProfile::default(),
            scripts,
        }
    }

    /// Default job file location: `<config dir>/layerpost/job.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("no configuration directory on this platform".into())
        })?;
        Ok(dir.join(CONFIG_DIR_NAME).join(JOB_FILE_NAME))
    }

    /// Load a job file (JSON or TOML), validate it and normalise scripts
    pub fn load_from_file(path: &Path) -> SettingsResult<(Self, Vec<ConfigWarning>)> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        if content.trim().is_empty() {
            return Err(ConfigError::Corrupted(format!("{} is empty", path.display())).into());
        }

        let mut config: Self = match Format::from_path(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        let warnings = config.normalize();
        tracing::info!(
            "Loaded job from {} ({} scripts, {} warnings)",
            path.display(),
            config.scripts.len(),
            warnings.len()
        );
        Ok((config, warnings))
    }

    /// Save the job file (JSON or TOML), creating parent directories
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::from_path(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::SaveError(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Saved job to {}", path.display());
        Ok(())
    }

    /// Reject printer profiles no script can work with
    pub fn validate(&self) -> ConfigResult<()> {
        let p = &self.printer;
        for (key, value) in [
            ("machine_width", p.machine_width),
            ("machine_depth", p.machine_depth),
            ("machine_height", p.machine_height),
            ("max_feedrate_e", p.max_feedrate_e),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(out_of_range(format!("printer.{}", key), value));
            }
        }

        for (i, extruder) in p.extruders.iter().enumerate() {
            for (key, value) in [
                ("travel_speed", extruder.travel_speed),
                ("retraction_retract_speed", extruder.retraction_retract_speed),
                ("retraction_prime_speed", extruder.retraction_prime_speed),
                ("z_hop_speed", extruder.z_hop_speed),
                ("nozzle_size", extruder.nozzle_size),
            ] {
                if value.is_nan() || value <= 0.0 {
                    return Err(out_of_range(format!("printer.extruders[{}].{}", i, key), value));
                }
            }
            if extruder.retraction_amount.is_nan() || extruder.retraction_amount < 0.0 {
                return Err(out_of_range(
                    format!("printer.extruders[{}].retraction_amount", i),
                    extruder.retraction_amount,
                ));
            }
        }
        Ok(())
    }

    /// Clamp every script's settings, returning what was changed
    pub fn normalize(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        for (index, script) in self.scripts.iter_mut().enumerate() {
            let name = script.name();
            for problem in script.normalize() {
                let warning = ConfigWarning {
                    index,
                    script: name,
                    problem,
                };
                tracing::warn!("{}", warning);
                warnings.push(warning);
            }
        }
        warnings
    }

    /// Pipeline running the job's scripts in file order
    pub fn build_pipeline(&self) -> ProcessorPipeline {
        let mut pipeline = ProcessorPipeline::new();
        pipeline.register_all(self.scripts.iter().map(ScriptConfig::processor).collect());
        pipeline
    }
}

fn out_of_range(key: String, value: f64) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key,
        value: value.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

impl Format {
    fn from_path(path: &Path) -> ConfigResult<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Format::Json),
            Some("toml") => Ok(Format::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}
