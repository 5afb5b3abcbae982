//! Validation and normalisation of inbound readings.
//!
//! Field devices are not consistent about types: flags arrive as `true`,
//! `1` or `"1"`, humidity sometimes as a string. Everything is accepted
//! as raw JSON and coerced here, so the HTTP layer only has to map
//! [`ValidationError`] to a 400.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::db::models::NewReading;

const MAX_CODE_LEN: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    Missing(&'static str),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl ValidationError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Request body for `POST /api/ingest`.
///
/// Fields are kept as raw JSON so the coercion rules live in one place.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct Submission {
    /// Sensor code (slug). Unknown codes are provisioned on the fly.
    #[schema(value_type = String, example = "SEN01")]
    pub code: Option<Value>,
    /// Soil humidity percentage, number or numeric string.
    #[schema(value_type = f64, example = 42.5)]
    pub humidity_pct: Option<Value>,
    /// Tilt alert: `true`/`false`, `0`/`1` or `"0"`/`"1"`.
    #[schema(value_type = bool)]
    pub tilt: Option<Value>,
    /// Vibration alert, same encodings as `tilt`.
    #[schema(value_type = bool)]
    pub vibration: Option<Value>,
    /// Raw vibration pulse count.
    #[schema(value_type = Option<i32>)]
    pub pulse: Option<Value>,
    /// ISO-8601 timestamp. Missing or unparsable means "now".
    #[schema(value_type = Option<String>, example = "2025-03-14T08:00:00Z")]
    pub recorded_at: Option<Value>,
}

impl Submission {
    /// Validate every field and produce a reading stamped with `now` when
    /// the submission carries no usable timestamp.
    pub fn validate(self, now: DateTime<Utc>) -> Result<NewReading, ValidationError> {
        let code = parse_code(present("code", self.code)?)?;
        let humidity_pct = parse_humidity(&present("humidity_pct", self.humidity_pct)?)?;
        let tilt = coerce_flag("tilt", &present("tilt", self.tilt)?)?;
        let vibration = coerce_flag("vibration", &present("vibration", self.vibration)?)?;
        let vibration_pulse = parse_pulse(self.pulse)?;
        let recorded_at = self
            .recorded_at
            .as_ref()
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(now);

        Ok(NewReading {
            sensor_code: code,
            humidity_pct,
            tilt,
            vibration,
            vibration_pulse,
            recorded_at,
        })
    }
}

/// `null` counts as missing.
fn present(field: &'static str, value: Option<Value>) -> Result<Value, ValidationError> {
    match value {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(v) => Ok(v),
    }
}

fn parse_code(value: Value) -> Result<String, ValidationError> {
    let Value::String(raw) = value else {
        return Err(ValidationError::invalid("code", "expected a string"));
    };
    validate_code(&raw).map(str::to_owned)
}

/// Sensor codes are slugs: ASCII letters, digits, `-` and `_`.
pub fn validate_code(raw: &str) -> Result<&str, ValidationError> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(ValidationError::Missing("code"));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(ValidationError::invalid(
            "code",
            format!("longer than {MAX_CODE_LEN} characters"),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::invalid(
            "code",
            "only letters, digits, '-' and '_' are allowed",
        ));
    }
    Ok(code)
}

fn parse_humidity(value: &Value) -> Result<f64, ValidationError> {
    let pct = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ValidationError::invalid("humidity_pct", "expected a number"))?;

    if !pct.is_finite() || !(0.0..=100.0).contains(&pct) {
        return Err(ValidationError::invalid(
            "humidity_pct",
            format!("{pct} is outside 0..=100"),
        ));
    }
    Ok(pct)
}

/// Coerce a boolean, integer or integer string into a flag. Non-zero is true.
pub fn coerce_flag(field: &'static str, value: &Value) -> Result<bool, ValidationError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => n
            .as_i64()
            .map(|i| i != 0)
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() != 0.0))
            .ok_or_else(|| ValidationError::invalid(field, "expected 0 or 1")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|i| i != 0)
            .map_err(|_| ValidationError::invalid(field, format!("{s:?} is not a number"))),
        _ => Err(ValidationError::invalid(field, "expected a boolean or 0/1")),
    }
}

fn parse_pulse(value: Option<Value>) -> Result<Option<i32>, ValidationError> {
    let pulse = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    pulse
        .and_then(|p| i32::try_from(p).ok())
        .filter(|p| *p >= 0)
        .map(Some)
        .ok_or_else(|| ValidationError::invalid("pulse", "expected a non-negative integer"))
}

/// Lenient ISO-8601 parsing.
///
/// Accepts RFC 3339 (`Z` or numeric offset), a space instead of `T`,
/// offset-less date-times and plain dates. Anything without an offset is
/// taken as UTC. Returns `None` instead of an error so callers choose the
/// fallback.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(raw, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    let naive = raw.strip_suffix(|c: char| c.eq_ignore_ascii_case(&'z')).unwrap_or(raw);
    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(ts.and_utc());
        }
    }
    NaiveDate::parse_from_str(naive, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}
