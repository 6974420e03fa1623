use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::{MigrateError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INTEGER",
            Self::Float(_) => "FLOAT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Value {
    /// Integral floats map onto the integer they hold, so `Integer(3)` and
    /// `Float(3.0)` compare and hash alike.
    fn number_key(&self) -> Option<NumberKey> {
        match self {
            Self::Integer(i) => Some(NumberKey::Integer(*i)),
            Self::Float(f) if f.is_nan() => Some(NumberKey::NaN),
            Self::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Some(NumberKey::Integer(*f as i64))
            }
            Self::Float(f) => Some(NumberKey::Bits(f.to_bits())),
            _ => None,
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
enum NumberKey {
    Integer(i64),
    Bits(u64),
    NaN,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            _ => match (self.number_key(), other.number_key()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Integer(_) | Self::Float(_) => {
                1u8.hash(state);
                self.number_key().hash(state);
            }
            Self::Text(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Self::Boolean(b) => {
                4u8.hash(state);
                b.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Float(fl) => write!(f, "{}", fl),
            Self::Text(s) => write!(f, "'{}'", s),
            Self::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

/// Column type. `Varchar` and `Enum` constrain text values; the stored
/// representation of all three text types is [`Value::Text`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Boolean,
    Text,
    Varchar(u32),
    Enum(Vec<String>),
}

impl DataType {
    pub fn enumeration<I, S>(variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum(variants.into_iter().map(Into::into).collect())
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Varchar(_) | Self::Enum(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }

    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Integer, Value::Integer(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Float, Value::Integer(_)) => true,
            (Self::Boolean, Value::Boolean(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Varchar(max), Value::Text(s)) => s.chars().count() <= *max as usize,
            (Self::Enum(variants), Value::Text(s)) => variants.iter().any(|v| v == s),
            _ => false,
        }
    }

    pub fn can_cast_to(&self, other: &DataType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (a, b) if a.is_textual() && b.is_textual() => true,
            (Self::Integer, Self::Float) => true,
            (Self::Integer | Self::Float | Self::Boolean, b) if b.is_textual() => true,
            _ => false,
        }
    }

    /// Converts a stored value into this type's representation. Range checks
    /// (length, enum membership) are left to [`DataType::is_compatible`].
    pub fn cast(&self, value: &Value) -> Result<Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
            (t, Value::Integer(_) | Value::Float(_) | Value::Boolean(_)) if t.is_textual() => {
                Ok(Value::Text(value.to_string()))
            }
            (t, v) if t.is_compatible(v) || (t.is_textual() && matches!(v, Value::Text(_))) => {
                Ok(v.clone())
            }
            (t, v) => Err(MigrateError::TypeMismatch(format!(
                "cannot cast {} to {}",
                v.type_name(),
                t
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Float => write!(f, "FLOAT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Text => write!(f, "TEXT"),
            Self::Varchar(len) => write!(f, "VARCHAR({})", len),
            Self::Enum(variants) => write!(f, "ENUM({})", variants.join(",")),
        }
    }
}
