//! [`Validator`] – synchronous admission check for control requests.
//!
//! Every submission passes through [`Validator::validate`] before it is
//! allowed anywhere near the queue.  The validator is a pure function over
//! the request kind and its JSON parameters: it checks required fields,
//! enumerated values, the explicit confirmation flag, and numeric ranges,
//! and produces a typed [`ControlIntent`] on success.
//!
//! Validation failures are caller errors.  They are reported synchronously
//! and are never retried.
//!
//! # Example
//!
//! ```
//! use gridshield_kernel::{Validator, ValidatorConfig};
//! use gridshield_types::RequestKind;
//! use serde_json::json;
//!
//! let validator = Validator::new(ValidatorConfig::default());
//!
//! // Confirmed + legal mode → accepted.
//! let ok = json!({ "mode": "eco", "confirm": true });
//! assert!(validator.validate(RequestKind::OperatingMode, &ok).is_ok());
//!
//! // Missing confirmation → rejected before enqueue.
//! let unconfirmed = json!({ "mode": "eco" });
//! assert!(validator.validate(RequestKind::OperatingMode, &unconfirmed).is_err());
//! ```

use std::ops::RangeInclusive;

use gridshield_types::{
    BoilerMode, ControlIntent, ExportMode, OperatingMode, RequestKind, ValidationError,
};
use serde_json::{Map, Value};

/// Allowed forced-charge duration, in minutes.
const FORCED_CHARGE_MINUTES: RangeInclusive<u32> = 1..=720;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunable validation bounds.
///
/// The export-limit range is deliberately configuration rather than a
/// constant: the downstream API documents two different ranges depending on
/// firmware generation, so deployments set the one their device actually
/// enforces.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Legal values for `limit_watts`, in watts.
    pub export_limit_range: RangeInclusive<u32>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            export_limit_range: 0..=10_000,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Validator
// ────────────────────────────────────────────────────────────────────────────

/// Per-kind request validation.  Pure and synchronous; holds only its
/// configured bounds.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    config: ValidatorConfig,
}

impl Validator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate `params` for `kind` and build the typed intent.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NotConfirmed`] – the `"confirm": true` flag is
    ///   absent or not `true`.
    /// - [`ValidationError::MissingField`] – a required field is absent.
    /// - [`ValidationError::WrongType`] – a field has the wrong JSON type.
    /// - [`ValidationError::UnknownValue`] – a mode value outside the kind's
    ///   enumerated set.
    /// - [`ValidationError::OutOfRange`] – a numeric field outside its bounds.
    pub fn validate(
        &self,
        kind: RequestKind,
        params: &Value,
    ) -> Result<ControlIntent, ValidationError> {
        let params = params.as_object().ok_or(ValidationError::WrongType {
            field: "params",
            expected: "object",
        })?;

        // The confirmation flag is checked first so the caller always learns
        // about a missing acknowledgement, even when other fields are bad too.
        require_confirmed(params)?;

        match kind {
            RequestKind::OperatingMode => {
                let mode = require_enum(params, "mode", OperatingMode::from_str)?;
                Ok(ControlIntent::SetOperatingMode { mode })
            }
            RequestKind::GridExport => {
                let mode = require_enum(params, "mode", ExportMode::from_str)?;
                // The watt limit is required only when the limited mode asks
                // for one; otherwise its absence is not an error.
                let limit_watts = if mode == ExportMode::Limited {
                    Some(require_u32(params, "limit_watts", &self.config.export_limit_range)?)
                } else {
                    None
                };
                Ok(ControlIntent::SetGridExport { mode, limit_watts })
            }
            RequestKind::ExportLimit => {
                let limit_watts =
                    require_u32(params, "limit_watts", &self.config.export_limit_range)?;
                Ok(ControlIntent::SetExportLimit { limit_watts })
            }
            RequestKind::Boiler => {
                let mode = require_enum(params, "mode", BoilerMode::from_str)?;
                Ok(ControlIntent::SetBoilerMode { mode })
            }
            RequestKind::ForcedCharge => {
                let enable = require_bool(params, "enable")?;
                let duration_minutes = if enable {
                    Some(require_u32(params, "duration_minutes", &FORCED_CHARGE_MINUTES)?)
                } else {
                    None
                };
                Ok(ControlIntent::SetForcedCharge {
                    enable,
                    duration_minutes,
                })
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Field helpers
// ────────────────────────────────────────────────────────────────────────────

/// The acknowledgement flag must be present and literally `true`.  A missing,
/// false, or non-boolean flag all mean the caller has not explicitly
/// confirmed a change to physical hardware.
fn require_confirmed(params: &Map<String, Value>) -> Result<(), ValidationError> {
    match params.get("confirm") {
        Some(Value::Bool(true)) => Ok(()),
        _ => Err(ValidationError::NotConfirmed),
    }
}

fn require_field<'a>(
    params: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ValidationError> {
    params
        .get(field)
        .ok_or(ValidationError::MissingField { field })
}

fn require_str<'a>(
    params: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    require_field(params, field)?
        .as_str()
        .ok_or(ValidationError::WrongType {
            field,
            expected: "string",
        })
}

fn require_bool(params: &Map<String, Value>, field: &'static str) -> Result<bool, ValidationError> {
    require_field(params, field)?
        .as_bool()
        .ok_or(ValidationError::WrongType {
            field,
            expected: "boolean",
        })
}

fn require_enum<T>(
    params: &Map<String, Value>,
    field: &'static str,
    parse: fn(&str) -> Option<T>,
) -> Result<T, ValidationError> {
    let raw = require_str(params, field)?;
    parse(raw).ok_or_else(|| ValidationError::UnknownValue {
        field,
        value: raw.to_string(),
    })
}

fn require_u32(
    params: &Map<String, Value>,
    field: &'static str,
    range: &RangeInclusive<u32>,
) -> Result<u32, ValidationError> {
    let value = require_field(params, field)?
        .as_i64()
        .ok_or(ValidationError::WrongType {
            field,
            expected: "integer",
        })?;
    let in_range = u32::try_from(value)
        .map(|v| range.contains(&v))
        .unwrap_or(false);
    if in_range {
        Ok(value as u32)
    } else {
        Err(ValidationError::OutOfRange {
            field,
            value,
            min: *range.start(),
            max: *range.end(),
        })
    }
}
