//! Dynamic row value type.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic key or value stored in a table.
///
/// Keys are used to address lock state, so `Value` is `Eq + Hash + Ord`.
/// Floats are intentionally not supported for that reason. Composite
/// primary keys are expressed as [`Value::Array`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Text string (UTF-8).
    Text(String),
    /// Array of values (composite keys, small records).
    Array(Vec<Value>),
    /// Byte string, written as `{"bytes": [..]}` so it stays distinct from
    /// an array of integers.
    #[serde(with = "bytes_object")]
    Bytes(Bytes),
}

mod bytes_object {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Wrapped {
        bytes: Vec<u8>,
    }

    pub(super) fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        Wrapped {
            bytes: bytes.to_vec(),
        }
        .serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        Wrapped::deserialize(deserializer).map(|w| Bytes::from(w.bytes))
    }
}

impl Value {
    /// Returns the kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Integer(_) => ValueKind::Integer,
            Self::Text(_) => ValueKind::Text,
            Self::Array(_) => ValueKind::Array,
            Self::Bytes(_) => ValueKind::Bytes,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the text payload, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Bytes(b) => {
                f.write_str("0x")?;
                for byte in b.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Bytes> for Value {
    fn from(v: Bytes) -> Self {
        Self::Bytes(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

/// The declared type of a table's keys or values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Accepts every value.
    Any,
    /// Only [`Value::Null`].
    Null,
    /// Only [`Value::Bool`].
    Bool,
    /// Only [`Value::Integer`].
    Integer,
    /// Only [`Value::Text`].
    Text,
    /// Only [`Value::Array`].
    Array,
    /// Only [`Value::Bytes`].
    Bytes,
}

impl ValueKind {
    /// Returns true if `value` is of this kind.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        self == Self::Any || self == value.kind()
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Integer => "integer",
            Self::Text => "text",
            Self::Array => "array",
            Self::Bytes => "bytes",
        };
        f.write_str(name)
    }
}
