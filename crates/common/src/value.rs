use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fields::{Field, FieldKind};

/// A field value, either as stored natively or decoded to a field's canonical kind.
///
/// Serialized adjacently tagged (`{"kind": "duration_ms", "value": 185000}`) so
/// every variant reads back as itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Integer(i64),
    Pair(Option<i64>, Option<i64>),
    Text(String),
    DurationMs(u64),
    Timestamp(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    UnknownField(String),
    TypeMismatch { field: Field, value: String },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::UnknownField(name) => write!(f, "unknown field: {}", name),
            FieldError::TypeMismatch { field, value } => {
                write!(f, "value {:?} does not fit field {}", value, field)
            }
        }
    }
}

impl std::error::Error for FieldError {}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Decode a raw native value into `kind`. Unparseable or empty input is `None`.
    pub fn decode(kind: FieldKind, raw: &Value) -> Option<Value> {
        match kind {
            FieldKind::Text => match raw {
                Value::Text(text) if text.trim().is_empty() => None,
                Value::Text(text) => Some(Value::Text(text.clone())),
                Value::Integer(n) | Value::Timestamp(n) => Some(Value::Text(n.to_string())),
                Value::DurationMs(ms) => Some(Value::Text(format_duration(*ms))),
                Value::Pair(..) => raw.to_text().map(Value::Text),
            },
            FieldKind::Integer => match raw {
                Value::Integer(n) | Value::Timestamp(n) => Some(Value::Integer(*n)),
                Value::DurationMs(ms) => i64::try_from(*ms).ok().map(Value::Integer),
                Value::Pair(number, _) => number.map(Value::Integer),
                Value::Text(text) => parse_leading_int(text).map(Value::Integer),
            },
            FieldKind::NumberPair => match raw {
                Value::Pair(None, None) => None,
                Value::Pair(number, count) => Some(Value::Pair(*number, *count)),
                Value::Integer(n) => Some(Value::Pair(Some(*n), None)),
                Value::Text(text) => parse_pair(text),
                _ => None,
            },
            FieldKind::DurationMs => match raw {
                Value::DurationMs(ms) => Some(Value::DurationMs(*ms)),
                Value::Integer(n) if *n >= 0 => Some(Value::DurationMs(*n as u64)),
                Value::Text(text) => parse_duration(text).map(Value::DurationMs),
                _ => None,
            },
            FieldKind::Timestamp => match raw {
                Value::Timestamp(n) | Value::Integer(n) => Some(Value::Timestamp(*n)),
                Value::Text(text) => text.trim().parse().ok().map(Value::Timestamp),
                _ => None,
            },
        }
    }

    /// Decode for `field`, failing when a non-empty value cannot be represented.
    pub fn coerce(field: Field, raw: &Value) -> Result<Option<Value>, FieldError> {
        match Value::decode(field.kind(), raw) {
            Some(value) => Ok(Some(value)),
            None if raw.is_empty() => Ok(None),
            None => Err(FieldError::TypeMismatch {
                field,
                value: raw.to_text().unwrap_or_default(),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Text(text) => text.trim().is_empty(),
            Value::Pair(None, None) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(n) | Value::Timestamp(n) => Some(*n),
            Value::DurationMs(ms) => i64::try_from(*ms).ok(),
            Value::Pair(number, _) => *number,
            Value::Text(text) => parse_leading_int(text),
        }
    }

    pub fn as_pair(&self) -> (Option<i64>, Option<i64>) {
        match self {
            Value::Pair(number, count) => (*number, *count),
            Value::Integer(n) => (Some(*n), None),
            Value::Text(text) => match parse_pair(text) {
                Some(Value::Pair(number, count)) => (number, count),
                _ => (None, None),
            },
            _ => (None, None),
        }
    }

    /// Text form used when writing into string-valued stores such as tags.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(text) => Some(text.clone()),
            Value::Integer(n) | Value::Timestamp(n) => Some(n.to_string()),
            Value::DurationMs(ms) => Some(ms.to_string()),
            Value::Pair(Some(number), Some(count)) => Some(format!("{}/{}", number, count)),
            Value::Pair(Some(number), None) => Some(number.to_string()),
            Value::Pair(None, Some(count)) => Some(format!("/{}", count)),
            Value::Pair(None, None) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::DurationMs(ms) => f.write_str(&format_duration(*ms)),
            other => f.write_str(&other.to_text().unwrap_or_default()),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

/// Parse `"3"`, `"3/12"` or `"/12"` into a pair.
pub fn parse_pair(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let mut parts = text.splitn(2, '/');
    let number = parts.next().and_then(parse_leading_int);
    let count = parts.next().and_then(parse_leading_int);
    if number.is_none() && count.is_none() {
        return None;
    }
    Some(Value::Pair(number, count))
}

/// Leading run of ASCII digits, so `"2001-05-01"` reads as 2001.
pub fn parse_leading_int(text: &str) -> Option<i64> {
    let text = text.trim();
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let digits: String = rest.chars().take_while(|ch| ch.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Parse `"ss"`, `"m:ss"` or `"h:mm:ss"` (fractional seconds allowed) into milliseconds.
pub fn parse_duration(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() > 3 {
        return None;
    }
    let (last, leading) = parts.split_last()?;
    let seconds: f64 = last.trim().parse().ok()?;
    if !(0.0..f64::MAX).contains(&seconds) {
        return None;
    }
    if !leading.is_empty() && seconds >= 60.0 {
        return None;
    }
    let mut total_ms = (seconds * 1000.0).round() as u64;
    let mut scale = 60_000u64;
    for part in leading.iter().rev() {
        let part = part.trim();
        if part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        let amount: u64 = part.parse().ok()?;
        total_ms = total_ms.checked_add(amount.checked_mul(scale)?)?;
        scale *= 60;
    }
    Some(total_ms)
}

/// Format milliseconds as `m:ss` (or `h:mm:ss`), rounded to whole seconds.
pub fn format_duration(ms: u64) -> String {
    let total_secs = ms.saturating_add(500) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
