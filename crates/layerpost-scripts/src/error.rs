//! Error types for the scripts crate.
//!
//! Script passes are fail-soft: configuration problems degrade to a safe
//! default and are reported through the notification sink. These types
//! describe the one condition that stops a pass (an unusable stream) and
//! the configuration warnings produced while normalising settings.

use layerpost_core::StreamError;
use thiserror::Error;

/// Errors that stop a single script pass.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The stream is structurally unusable for this pass.
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

/// Errors related to script parameter validation.
///
/// Produced by `normalize()`; the offending value is replaced by its
/// nearest valid value and processing continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// A parameter value is out of the valid range.
    #[error("Parameter '{name}' out of range: {value} (valid: {min}..{max})")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },

    /// A parameter value is invalid.
    #[error("Invalid value for '{name}': {reason}")]
    InvalidValue { name: String, reason: String },

    /// A layer list entry is not a number.
    #[error("Layer list entry '{entry}' is not a number")]
    InvalidLayerEntry { entry: String },
}

/// Result type alias for script passes.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Clamp `value` into `min..=max`, recording a warning when it moved.
pub(crate) fn clamp_param(
    name: &str,
    value: &mut f64,
    min: f64,
    max: f64,
    warnings: &mut Vec<ParameterError>,
) {
    if !(min..=max).contains(&*value) {
        warnings.push(ParameterError::OutOfRange {
            name: name.to_string(),
            value: *value,
            min,
            max,
        });
        *value = if value.is_nan() { min } else { value.clamp(min, max) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_error_display() {
        let err = ParameterError::OutOfRange {
            name: "wipe_repetitions".to_string(),
            value: 5.0,
            min: 1.0,
            max: 3.0,
        };
        assert_eq!(
            err.to_string(),
            "Parameter 'wipe_repetitions' out of range: 5 (valid: 1..3)"
        );

        let err = ParameterError::InvalidLayerEntry {
            entry: "ten".to_string(),
        };
        assert_eq!(err.to_string(), "Layer list entry 'ten' is not a number");
    }

    #[test]
    fn test_script_error_from_stream() {
        let err: ScriptError = StreamError::TooShort {
            blocks: 1,
            required: 3,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Stream error: Layer stream too short: 1 blocks, need at least 3"
        );
    }

    #[test]
    fn test_clamp_param() {
        let mut warnings = Vec::new();
        let mut value = 90.0;
        clamp_param("stroke", &mut value, 10.0, 75.0, &mut warnings);
        assert_eq!(value, 75.0);
        assert_eq!(warnings.len(), 1);

        let mut ok = 20.0;
        clamp_param("stroke", &mut ok, 10.0, 75.0, &mut warnings);
        assert_eq!(ok, 20.0);
        assert_eq!(warnings.len(), 1);
    }
}
