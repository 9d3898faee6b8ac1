//! Printer profile snapshot
//!
//! The host's machine and extruder settings, read once at the start of a
//! pass and passed by reference to every component. Hosts that keep their
//! settings in a key/value store implement [`PropertySource`] and build the
//! snapshot with [`PrinterProfile::from_source`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProfileError;

/// Firmware dialect the file was sliced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareFlavor {
    /// RepRap (Marlin/Sprinter)
    #[default]
    Marlin,
    /// RepRap (RepRap)
    RepRap,
    /// RepRap (Volumetric)
    Volumetric,
    /// UltiGCode
    UltiGcode,
    /// Griffin
    Griffin,
    /// Repetier
    Repetier,
    /// Makerbot
    Makerbot,
    /// Bits from Bytes
    Bfb,
    /// Mach3
    Mach3,
}

impl FirmwareFlavor {
    /// Map the slicer's display name to a flavor
    pub fn from_slicer_name(name: &str) -> Option<Self> {
        match name.trim() {
            "RepRap (Marlin/Sprinter)" | "Marlin" => Some(Self::Marlin),
            "RepRap (RepRap)" | "RepRap" => Some(Self::RepRap),
            "RepRap (Volumetric)" => Some(Self::Volumetric),
            "UltiGCode" => Some(Self::UltiGcode),
            "Griffin" => Some(Self::Griffin),
            "Repetier" => Some(Self::Repetier),
            "Makerbot" => Some(Self::Makerbot),
            "BFB" => Some(Self::Bfb),
            "MACH3" => Some(Self::Mach3),
            _ => None,
        }
    }
}

/// Bed adhesion type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdhesionType {
    /// No adhesion structure
    None,
    /// Skirt around the part
    #[default]
    Skirt,
    /// Brim attached to the part
    Brim,
    /// Raft layers below layer 0
    Raft,
}

/// Order in which objects are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintSequence {
    /// All objects layer by layer
    #[default]
    AllAtOnce,
    /// Each object to completion before the next
    OneAtATime,
}

/// Per-extruder kinematics and material defaults
///
/// Speeds are in mm/s; generated commands multiply them by 60.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtruderProfile {
    pub travel_speed: f64,
    pub retraction_enabled: bool,
    pub retraction_amount: f64,
    pub retraction_retract_speed: f64,
    pub retraction_prime_speed: f64,
    pub z_hop_speed: f64,
    pub nozzle_size: f64,
    pub print_temperature: f64,
}

impl Default for ExtruderProfile {
    fn default() -> Self {
        Self {
            travel_speed: 150.0,
            retraction_enabled: true,
            retraction_amount: 6.5,
            retraction_retract_speed: 25.0,
            retraction_prime_speed: 25.0,
            z_hop_speed: 10.0,
            nozzle_size: 0.4,
            print_temperature: 200.0,
        }
    }
}

impl ExtruderProfile {
    /// Travel speed in mm/min
    pub fn travel_feed(&self) -> f64 {
        (self.travel_speed * 60.0).round()
    }

    /// Retract speed in mm/min
    pub fn retract_feed(&self) -> f64 {
        (self.retraction_retract_speed * 60.0).round()
    }

    /// Prime speed in mm/min
    pub fn prime_feed(&self) -> f64 {
        (self.retraction_prime_speed * 60.0).round()
    }

    /// Z-hop speed in mm/min
    pub fn z_hop_feed(&self) -> f64 {
        (self.z_hop_speed * 60.0).round()
    }
}

/// Read-only snapshot of the machine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterProfile {
    pub machine_name: String,
    pub machine_width: f64,
    pub machine_depth: f64,
    pub machine_height: f64,
    pub extruders: Vec<ExtruderProfile>,
    pub relative_extrusion: bool,
    pub firmware_flavor: FirmwareFlavor,
    pub firmware_retract: bool,
    pub nozzle_temp_control: bool,
    /// Maximum E feed rate in mm/s
    pub max_feedrate_e: f64,
    pub adhesion: AdhesionType,
    pub print_sequence: PrintSequence,
}

impl Default for PrinterProfile {
    fn default() -> Self {
        Self {
            machine_name: "Generic FFF printer".to_string(),
            machine_width: 220.0,
            machine_depth: 220.0,
            machine_height: 250.0,
            extruders: vec![ExtruderProfile::default()],
            relative_extrusion: false,
            firmware_flavor: FirmwareFlavor::Marlin,
            firmware_retract: false,
            nozzle_temp_control: true,
            max_feedrate_e: 50.0,
            adhesion: AdhesionType::Skirt,
            print_sequence: PrintSequence::AllAtOnce,
        }
    }
}

impl PrinterProfile {
    /// Number of configured extruders
    pub fn extruder_count(&self) -> usize {
        self.extruders.len().max(1)
    }

    /// Extruder settings by index, falling back to the first extruder
    pub fn extruder(&self, index: usize) -> ExtruderProfile {
        self.extruders
            .get(index)
            .or_else(|| self.extruders.first())
            .copied()
            .unwrap_or_default()
    }

    /// Settings of the first extruder
    pub fn primary(&self) -> ExtruderProfile {
        self.extruder(0)
    }

    /// True when raft layers are emitted below layer 0
    pub fn has_raft(&self) -> bool {
        self.adhesion == AdhesionType::Raft
    }

    /// Build the snapshot from a host key/value store
    pub fn from_source(source: &dyn PropertySource) -> Result<Self, ProfileError> {
        let count = number(source, "machine_extruder_count", None)?.max(1.0) as usize;
        let mut extruders = Vec::with_capacity(count);
        for index in 0..count {
            let at = Some(index);
            extruders.push(ExtruderProfile {
                travel_speed: number(source, "speed_travel", at)?,
                retraction_enabled: boolean(source, "retraction_enable", at)?,
                retraction_amount: number(source, "retraction_amount", at)?,
                retraction_retract_speed: number(source, "retraction_retract_speed", at)?,
                retraction_prime_speed: number(source, "retraction_prime_speed", at)?,
                z_hop_speed: number(source, "speed_z_hop", at)?,
                nozzle_size: number(source, "machine_nozzle_size", at)?,
                print_temperature: number(source, "material_print_temperature", at)?,
            });
        }

        let flavor_name = text(source, "machine_gcode_flavor", None)?;
        let firmware_flavor =
            FirmwareFlavor::from_slicer_name(&flavor_name).ok_or(ProfileError::InvalidValue {
                key: "machine_gcode_flavor".to_string(),
                reason: format!("unknown flavor '{}'", flavor_name),
            })?;

        let adhesion = match text(source, "adhesion_type", None)?.as_str() {
            "none" => AdhesionType::None,
            "skirt" => AdhesionType::Skirt,
            "brim" => AdhesionType::Brim,
            "raft" => AdhesionType::Raft,
            other => {
                return Err(ProfileError::InvalidValue {
                    key: "adhesion_type".to_string(),
                    reason: format!("unknown adhesion type '{}'", other),
                })
            }
        };

        let print_sequence = match text(source, "print_sequence", None)?.as_str() {
            "all_at_once" => PrintSequence::AllAtOnce,
            "one_at_a_time" => PrintSequence::OneAtATime,
            other => {
                return Err(ProfileError::InvalidValue {
                    key: "print_sequence".to_string(),
                    reason: format!("unknown print sequence '{}'", other),
                })
            }
        };

        Ok(Self {
            machine_name: text(source, "machine_name", None)?,
            machine_width: number(source, "machine_width", None)?,
            machine_depth: number(source, "machine_depth", None)?,
            machine_height: number(source, "machine_height", None)?,
            extruders,
            relative_extrusion: boolean(source, "relative_extrusion", None)?,
            firmware_flavor,
            firmware_retract: boolean(source, "machine_firmware_retract", None)?,
            nozzle_temp_control: boolean(source, "machine_nozzle_temp_enabled", None)?,
            max_feedrate_e: number(source, "machine_max_feedrate_e", None)?,
            adhesion,
            print_sequence,
        })
    }
}

/// Read-only key lookup into the host's configuration store
///
/// `extruder` selects a per-extruder value; `None` reads the global stack.
pub trait PropertySource {
    /// Look up one setting value
    fn property(&self, key: &str, extruder: Option<usize>) -> Option<Value>;
}

/// In-memory property source, keyed like the slicer's setting names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticSource {
    pub global: BTreeMap<String, Value>,
    pub extruders: Vec<BTreeMap<String, Value>>,
}

impl StaticSource {
    /// Set a global value
    pub fn with_global(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.global.insert(key.to_string(), value.into());
        self
    }

    /// Set a value on one extruder, growing the extruder list as needed
    pub fn with_extruder(mut self, index: usize, key: &str, value: impl Into<Value>) -> Self {
        if self.extruders.len() <= index {
            self.extruders.resize_with(index + 1, BTreeMap::new);
        }
        self.extruders[index].insert(key.to_string(), value.into());
        self
    }
}

impl PropertySource for StaticSource {
    fn property(&self, key: &str, extruder: Option<usize>) -> Option<Value> {
        match extruder {
            Some(index) => self
                .extruders
                .get(index)
                .and_then(|values| values.get(key))
                .or_else(|| self.global.get(key))
                .cloned(),
            None => self.global.get(key).cloned(),
        }
    }
}

fn lookup(
    source: &dyn PropertySource,
    key: &str,
    extruder: Option<usize>,
) -> Result<Value, ProfileError> {
    source
        .property(key, extruder)
        .ok_or_else(|| ProfileError::MissingKey {
            key: key.to_string(),
        })
}

fn number(
    source: &dyn PropertySource,
    key: &str,
    extruder: Option<usize>,
) -> Result<f64, ProfileError> {
    match lookup(source, key, extruder)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| invalid(key, "not a finite number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| invalid(key, &e.to_string())),
        _ => Err(invalid(key, "expected a number")),
    }
}

fn boolean(
    source: &dyn PropertySource,
    key: &str,
    extruder: Option<usize>,
) -> Result<bool, ProfileError> {
    match lookup(source, key, extruder)? {
        Value::Bool(b) => Ok(b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(invalid(key, "expected true or false")),
        },
        _ => Err(invalid(key, "expected a boolean")),
    }
}

fn text(
    source: &dyn PropertySource,
    key: &str,
    extruder: Option<usize>,
) -> Result<String, ProfileError> {
    match lookup(source, key, extruder)? {
        Value::String(s) => Ok(s),
        other => Ok(other.to_string()),
    }
}

fn invalid(key: &str, reason: &str) -> ProfileError {
    ProfileError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
