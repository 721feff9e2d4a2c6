use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

/// Field name whose value is always stored as text, even when it looks numeric.
pub const TIMESTAMP_FIELD: &str = "TS";

/// A single stored reading: a JSON number or a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(Number),
    Text(String),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Parses `raw` as a number when the whole string (ignoring surrounding whitespace)
/// is a finite integer or decimal; otherwise keeps it as text.
///
/// Integers stay integers so `"100"` is stored as `100`, not `100.0`.
pub fn parse_field_value(raw: &str) -> FieldValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return FieldValue::Text(raw.to_string());
    }

    if let Ok(int) = trimmed.parse::<i64>() {
        return FieldValue::Number(int.into());
    }

    match trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(number) => FieldValue::Number(number),
        None => FieldValue::Text(raw.to_string()),
    }
}

/// Reading-set coercion: numeric-looking values become numbers, except under [`TIMESTAMP_FIELD`].
pub fn coerce_reading(field: &str, value: &Value) -> FieldValue {
    if field == TIMESTAMP_FIELD {
        return FieldValue::Text(value_text(value));
    }

    match value {
        Value::Number(n) => FieldValue::Number(n.clone()),
        Value::String(s) => parse_field_value(s),
        other => FieldValue::Text(other.to_string()),
    }
}

/// Positional payloads keep their values as sent; only numbers and strings map directly.
pub fn reading_as_is(value: &Value) -> FieldValue {
    match value {
        Value::Number(n) => FieldValue::Number(n.clone()),
        Value::String(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
