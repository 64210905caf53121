//! Value encoding for stored keys
//!
//! [`StoredValue`] is the untyped scalar form: numeric-looking strings decode
//! to numbers. [`ValueCodec`] is the per-key-family form used by the typed
//! [`Key`](super::keys::Key) accessors, so a stored `"123"` is only a number
//! where the key family says it is.

use std::fmt;

use serde_json::{Map, Value};

use crate::models::DomainRecord;

/// Untyped scalar read back from the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Absent,
    Undefined,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl StoredValue {
    /// Decode a raw stored string
    pub fn decode(raw: Option<&str>) -> Self {
        let raw = match raw {
            None | Some("") | Some("null") => return StoredValue::Absent,
            Some("undefined") => return StoredValue::Undefined,
            Some(raw) => raw,
        };

        let trimmed = raw.trim();
        if let Ok(int) = trimmed.parse::<i64>() {
            return StoredValue::Integer(int);
        }
        match trimmed.parse::<f64>() {
            Ok(float) if float.is_finite() => {
                if float.fract() == 0.0 && float.abs() < i64::MAX as f64 {
                    StoredValue::Integer(float as i64)
                } else {
                    StoredValue::Float(float)
                }
            }
            _ => StoredValue::Text(raw.to_string()),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, StoredValue::Absent)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StoredValue::Integer(int) => Some(*int),
            _ => None,
        }
    }
}

/// Canonical string form written to the store
impl fmt::Display for StoredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoredValue::Absent => f.write_str("null"),
            StoredValue::Undefined => f.write_str("undefined"),
            StoredValue::Integer(int) => write!(f, "{int}"),
            StoredValue::Float(float) => write!(f, "{float}"),
            StoredValue::Text(text) => f.write_str(text),
        }
    }
}

impl From<i64> for StoredValue {
    fn from(value: i64) -> Self {
        StoredValue::Integer(value)
    }
}

impl From<&str> for StoredValue {
    fn from(value: &str) -> Self {
        StoredValue::Text(value.to_string())
    }
}

impl From<String> for StoredValue {
    fn from(value: String) -> Self {
        StoredValue::Text(value)
    }
}

/// Declared value type of a key family
pub trait ValueCodec: Sized {
    fn encode(&self) -> crate::error::Result<String>;

    /// `None` when the stored text is not a valid value of this type
    fn decode(raw: &str) -> Option<Self>;
}

impl ValueCodec for u64 {
    fn encode(&self) -> crate::error::Result<String> {
        Ok(self.to_string())
    }

    fn decode(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl ValueCodec for i64 {
    fn encode(&self) -> crate::error::Result<String> {
        Ok(self.to_string())
    }

    fn decode(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

impl ValueCodec for String {
    fn encode(&self) -> crate::error::Result<String> {
        Ok(self.clone())
    }

    fn decode(raw: &str) -> Option<Self> {
        Some(raw.to_string())
    }
}

macro_rules! json_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ValueCodec for $ty {
                fn encode(&self) -> crate::error::Result<String> {
                    Ok(serde_json::to_string(self)?)
                }

                fn decode(raw: &str) -> Option<Self> {
                    serde_json::from_str(raw).ok()
                }
            }
        )+
    };
}

json_codec!(DomainRecord, Map<String, Value>, Value);
