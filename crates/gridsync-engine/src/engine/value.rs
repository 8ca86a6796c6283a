//! Computed cell values and their display form.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Marker shown for any cell whose formula could not be evaluated.
pub const ERROR_MARKER: &str = "#ERR";

/// The evaluated result of a cell's raw text.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Error,
}

impl Value {
    pub fn empty() -> Value {
        Value::Text(String::new())
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Value::Text(s) if s.trim().is_empty())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error)
    }

    /// Numeric reading used by arithmetic and aggregates.
    /// Text counts only when it parses as a finite number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            Value::Error => None,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::empty()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Error => f.write_str(ERROR_MARKER),
        }
    }
}

/// Parse user text as a finite number (`"inf"` and `"NaN"` are text).
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Format a number for display: integers without a fraction, everything else
/// in the shortest form that reads back to the same value.
pub fn format_number(n: f64) -> String {
    if !n.is_finite() {
        ERROR_MARKER.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Text(s) => serializer.serialize_str(s),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                serializer.serialize_i64(*n as i64)
            }
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::Error => serializer.serialize_str(ERROR_MARKER),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Number(f64),
            Text(String),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Number(n) => Value::Number(n),
            Wire::Text(s) if s == ERROR_MARKER => Value::Error,
            Wire::Text(s) => Value::Text(s),
        })
    }
}
