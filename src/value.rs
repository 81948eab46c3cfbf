//! Runtime element representation.
//!
//! Every element flowing through a pipeline is a [`Value`]. The planner never
//! looks inside values; only user functions, the type bridge in
//! [`types`](crate::types) and the execution engine do.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// An opaque logical element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Bytes(Vec<u8>),
    Pair(Box<Value>, Box<Value>),
    Tuple(Vec<Value>),
    Collection(Vec<Value>),
    /// Named fields in declaration order.
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Build a pair (also used for table rows).
    pub fn pair(first: impl Into<Value>, second: impl Into<Value>) -> Self {
        Self::Pair(Box::new(first.into()), Box::new(second.into()))
    }

    pub fn collection<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Collection(items.into_iter().map(Into::into).collect())
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Double(_) => "double",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Pair(..) => "pair",
            Self::Tuple(_) => "tuple",
            Self::Collection(_) => "collection",
            Self::Record(_) => "record",
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Self::Long(v) => Some(*v),
            Self::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_pair(&self) -> Option<(&Value, &Value)> {
        match self {
            Self::Pair(a, b) => Some((a, b)),
            _ => None,
        }
    }

    /// Consume a pair into its halves.
    pub fn into_pair(self) -> Result<(Value, Value), Value> {
        match self {
            Self::Pair(a, b) => Ok((*a, *b)),
            other => Err(other),
        }
    }

    #[must_use]
    pub fn as_collection(&self) -> Option<&[Value]> {
        match self {
            Self::Collection(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_collection(self) -> Result<Vec<Value>, Value> {
        match self {
            Self::Collection(items) => Ok(items),
            other => Err(other),
        }
    }

    /// Look up a record field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Record(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((a, b): (A, B)) -> Self {
        Self::pair(a, b)
    }
}

/// Text rendering used by the text target: pairs become `key\tvalue`.
impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Bytes(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::Pair(a, b) => write!(f, "{a}\t{b}"),
            Self::Tuple(items) | Self::Collection(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Record(fields) => {
                f.write_str("{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}
