//! Type/codec bridge.
//!
//! A [`PType`] pairs a family-free [`LogicalType`] with the [`Family`] that
//! knows how to encode, decode, compare and hash it. Two families ship with
//! the crate:
//!
//! - [`Family::Json`]: self-describing JSON (records as named objects), see [`json`].
//! - [`Family::Binary`]: compact positional encoding built on `postcard`
//!   primitives, see [`binary`].
//!
//! Both families represent exactly the same logical types with the same
//! arity and field order, so a program can switch families with
//! [`PType::in_family`] without changing its meaning. Derived types are only
//! ever built from parts of one family; mixing is a construction error.
//!
//! ```
//! use ironcrunch::types::{Family, table_type};
//!
//! let f = Family::Binary;
//! let words = table_type(&f.strings(), &f.longs()).unwrap();
//! assert!(words.is_table());
//! assert!(words.key_type().unwrap().capabilities().hashing);
//! ```

pub mod binary;
pub mod json;

use crate::error::{CodecError, GraphConstructionError};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Encoding family a [`PType`] belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    Json,
    Binary,
}

impl Display for Family {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Json => f.write_str("json"),
            Self::Binary => f.write_str("binary"),
        }
    }
}

/// Primitive logical kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Int,
    Long,
    Double,
    String,
    Bytes,
}

/// Family-independent shape of an element.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Primitive(PrimitiveKind),
    Pair(Box<LogicalType>, Box<LogicalType>),
    /// A pair reserved for keyed data: the first half is the grouping key.
    Table(Box<LogicalType>, Box<LogicalType>),
    Tuple(Vec<LogicalType>),
    Collection(Box<LogicalType>),
    Record {
        name: String,
        fields: Vec<(String, LogicalType)>,
    },
}

impl Display for LogicalType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Primitive(k) => match k {
                PrimitiveKind::Boolean => f.write_str("boolean"),
                PrimitiveKind::Int => f.write_str("int"),
                PrimitiveKind::Long => f.write_str("long"),
                PrimitiveKind::Double => f.write_str("double"),
                PrimitiveKind::String => f.write_str("string"),
                PrimitiveKind::Bytes => f.write_str("bytes"),
            },
            Self::Pair(a, b) => write!(f, "pair<{a}, {b}>"),
            Self::Table(k, v) => write!(f, "table<{k}, {v}>"),
            Self::Tuple(items) => {
                f.write_str("tuple<")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{t}")?;
                }
                f.write_str(">")
            }
            Self::Collection(t) => write!(f, "collection<{t}>"),
            Self::Record { name, .. } => write!(f, "record<{name}>"),
        }
    }
}

/// What a type supports when used as a grouping key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Capabilities {
    pub equality: bool,
    pub hashing: bool,
    pub ordering: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        equality: true,
        hashing: true,
        ordering: true,
    };

    /// Equality and hashing: enough for a hash-partitioned shuffle.
    pub const HASH_GROUPING: Self = Self {
        equality: true,
        hashing: true,
        ordering: false,
    };

    #[must_use]
    pub fn intersect(self, other: Self) -> Self {
        Self {
            equality: self.equality && other.equality,
            hashing: self.hashing && other.hashing,
            ordering: self.ordering && other.ordering,
        }
    }

    /// Names of the capabilities in `required` that `self` lacks.
    #[must_use]
    pub fn missing(self, required: Self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if required.equality && !self.equality {
            out.push("equality");
        }
        if required.hashing && !self.hashing {
            out.push("hashing");
        }
        if required.ordering && !self.ordering {
            out.push("ordering");
        }
        out
    }
}

/// Per-family encode/decode/compare hooks.
pub trait FamilyCodec: Send + Sync {
    fn family(&self) -> Family;

    fn encode(&self, ty: &LogicalType, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, ty: &LogicalType, bytes: &[u8]) -> Result<Value, CodecError>;

    fn capabilities(&self, ty: &LogicalType) -> Capabilities;

    fn compare(&self, _ty: &LogicalType, a: &Value, b: &Value) -> Ordering {
        compare_values(a, b)
    }
}

static JSON_CODEC: json::JsonCodec = json::JsonCodec;
static BINARY_CODEC: binary::BinaryCodec = binary::BinaryCodec;

impl Family {
    #[must_use]
    pub fn codec(self) -> &'static dyn FamilyCodec {
        match self {
            Self::Json => &JSON_CODEC,
            Self::Binary => &BINARY_CODEC,
        }
    }

    #[must_use]
    pub fn base(self, kind: PrimitiveKind) -> PType {
        PType::new(self, LogicalType::Primitive(kind))
    }

    #[must_use]
    pub fn booleans(self) -> PType {
        self.base(PrimitiveKind::Boolean)
    }

    #[must_use]
    pub fn ints(self) -> PType {
        self.base(PrimitiveKind::Int)
    }

    #[must_use]
    pub fn longs(self) -> PType {
        self.base(PrimitiveKind::Long)
    }

    #[must_use]
    pub fn doubles(self) -> PType {
        self.base(PrimitiveKind::Double)
    }

    #[must_use]
    pub fn strings(self) -> PType {
        self.base(PrimitiveKind::String)
    }

    #[must_use]
    pub fn bytes(self) -> PType {
        self.base(PrimitiveKind::Bytes)
    }

    pub fn pair_of(self, a: &PType, b: &PType) -> Result<PType, GraphConstructionError> {
        self.check(a)?;
        self.check(b)?;
        Ok(PType::new(
            self,
            LogicalType::Pair(Box::new(a.logical.clone()), Box::new(b.logical.clone())),
        ))
    }

    pub fn table_of(self, key: &PType, value: &PType) -> Result<PType, GraphConstructionError> {
        self.check(key)?;
        self.check(value)?;
        Ok(PType::new(
            self,
            LogicalType::Table(Box::new(key.logical.clone()), Box::new(value.logical.clone())),
        ))
    }

    pub fn tuple_of(self, items: &[PType]) -> Result<PType, GraphConstructionError> {
        let mut logical = Vec::with_capacity(items.len());
        for t in items {
            self.check(t)?;
            logical.push(t.logical.clone());
        }
        Ok(PType::new(self, LogicalType::Tuple(logical)))
    }

    pub fn collection_of(self, element: &PType) -> Result<PType, GraphConstructionError> {
        self.check(element)?;
        Ok(PType::new(
            self,
            LogicalType::Collection(Box::new(element.logical.clone())),
        ))
    }

    pub fn record_of(
        self,
        name: &str,
        fields: &[(&str, PType)],
    ) -> Result<PType, GraphConstructionError> {
        let mut logical = Vec::with_capacity(fields.len());
        for (n, t) in fields {
            self.check(t)?;
            logical.push(((*n).to_string(), t.logical.clone()));
        }
        Ok(PType::new(
            self,
            LogicalType::Record {
                name: name.to_string(),
                fields: logical,
            },
        ))
    }

    fn check(self, t: &PType) -> Result<(), GraphConstructionError> {
        if t.family == self {
            Ok(())
        } else {
            Err(GraphConstructionError::MixedFamilies {
                left: self,
                right: t.family,
            })
        }
    }
}

/// A family-bound element type descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PType {
    family: Family,
    logical: LogicalType,
}

impl Display for PType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "{}:{}", self.family, self.logical)
    }
}

impl PType {
    #[must_use]
    pub fn new(family: Family, logical: LogicalType) -> Self {
        Self { family, logical }
    }

    #[must_use]
    pub fn family(&self) -> Family {
        self.family
    }

    #[must_use]
    pub fn logical(&self) -> &LogicalType {
        &self.logical
    }

    /// The same logical type expressed in another family.
    #[must_use]
    pub fn in_family(&self, family: Family) -> Self {
        Self::new(family, self.logical.clone())
    }

    /// True when both describe the same logical shape, whatever the family.
    #[must_use]
    pub fn same_logical(&self, other: &Self) -> bool {
        self.logical == other.logical
    }

    #[must_use]
    pub fn is_table(&self) -> bool {
        matches!(self.logical, LogicalType::Table(..))
    }

    /// Pairs and tables both have a key/value split.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        matches!(self.logical, LogicalType::Table(..) | LogicalType::Pair(..))
    }

    #[must_use]
    pub fn key_type(&self) -> Option<PType> {
        match &self.logical {
            LogicalType::Table(k, _) | LogicalType::Pair(k, _) => {
                Some(Self::new(self.family, (**k).clone()))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn value_type(&self) -> Option<PType> {
        match &self.logical {
            LogicalType::Table(_, v) | LogicalType::Pair(_, v) => {
                Some(Self::new(self.family, (**v).clone()))
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn element_type(&self) -> Option<PType> {
        match &self.logical {
            LogicalType::Collection(t) => Some(Self::new(self.family, (**t).clone())),
            _ => None,
        }
    }

    /// For `table<K, collection<V>>`, return `(K, V)`.
    #[must_use]
    pub fn grouped_parts(&self) -> Option<(PType, PType)> {
        match &self.logical {
            LogicalType::Table(k, v) => match &**v {
                LogicalType::Collection(inner) => Some((
                    Self::new(self.family, (**k).clone()),
                    Self::new(self.family, (**inner).clone()),
                )),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn codec(&self) -> &'static dyn FamilyCodec {
        self.family.codec()
    }

    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        self.codec().encode(&self.logical, value)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        self.codec().decode(&self.logical, bytes)
    }

    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        self.codec().compare(&self.logical, a, b)
    }

    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.codec().capabilities(&self.logical)
    }

    /// Check structurally that `value` is an instance of this type.
    pub fn conforms(&self, value: &Value) -> Result<(), CodecError> {
        conforms(&self.logical, value)
    }
}

/// Family-checked `pair<a, b>`.
pub fn pair_type(a: &PType, b: &PType) -> Result<PType, GraphConstructionError> {
    a.family.pair_of(a, b)
}

/// Family-checked `table<key, value>`.
pub fn table_type(key: &PType, value: &PType) -> Result<PType, GraphConstructionError> {
    key.family.table_of(key, value)
}

pub fn collection_type(element: &PType) -> Result<PType, GraphConstructionError> {
    element.family.collection_of(element)
}

/// Ordering under `ptype`'s family.
#[must_use]
pub fn compare(ptype: &PType, a: &Value, b: &Value) -> Ordering {
    ptype.compare(a, b)
}

pub(crate) fn conforms(ty: &LogicalType, value: &Value) -> Result<(), CodecError> {
    let ok = match (ty, value) {
        (LogicalType::Primitive(k), v) => matches!(
            (k, v),
            (PrimitiveKind::Boolean, Value::Bool(_))
                | (PrimitiveKind::Int, Value::Int(_))
                | (PrimitiveKind::Long, Value::Long(_))
                | (PrimitiveKind::Double, Value::Double(_))
                | (PrimitiveKind::String, Value::Str(_))
                | (PrimitiveKind::Bytes, Value::Bytes(_))
        ),
        (LogicalType::Pair(a, b) | LogicalType::Table(a, b), Value::Pair(x, y)) => {
            conforms(a, x)?;
            conforms(b, y)?;
            true
        }
        (LogicalType::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => {
            for (t, v) in types.iter().zip(items) {
                conforms(t, v)?;
            }
            true
        }
        (LogicalType::Collection(t), Value::Collection(items)) => {
            for v in items {
                conforms(t, v)?;
            }
            true
        }
        (LogicalType::Record { fields, .. }, Value::Record(values))
            if fields.len() == values.len() =>
        {
            for ((name, t), (vname, v)) in fields.iter().zip(values) {
                if name != vname {
                    return Err(mismatch(ty, value));
                }
                conforms(t, v)?;
            }
            true
        }
        _ => false,
    };
    if ok { Ok(()) } else { Err(mismatch(ty, value)) }
}

pub(crate) fn mismatch(ty: &LogicalType, value: &Value) -> CodecError {
    CodecError::Mismatch {
        expected: ty.to_string(),
        found: value.kind_name().to_string(),
    }
}

/// Capabilities shared by both families; `ordered_opaque` says whether bytes
/// and records carry a total order in the calling family.
pub(crate) fn structural_capabilities(ty: &LogicalType, ordered_opaque: bool) -> Capabilities {
    match ty {
        LogicalType::Primitive(PrimitiveKind::Double) => Capabilities {
            equality: false,
            hashing: false,
            ordering: true,
        },
        LogicalType::Primitive(PrimitiveKind::Bytes) => Capabilities {
            ordering: ordered_opaque,
            ..Capabilities::HASH_GROUPING
        },
        LogicalType::Primitive(_) => Capabilities::ALL,
        LogicalType::Pair(a, b) | LogicalType::Table(a, b) => {
            structural_capabilities(a, ordered_opaque)
                .intersect(structural_capabilities(b, ordered_opaque))
        }
        LogicalType::Tuple(items) => items.iter().fold(Capabilities::ALL, |acc, t| {
            acc.intersect(structural_capabilities(t, ordered_opaque))
        }),
        LogicalType::Collection(t) => structural_capabilities(t, ordered_opaque),
        LogicalType::Record { fields, .. } => {
            let own = Capabilities {
                ordering: ordered_opaque,
                ..Capabilities::HASH_GROUPING
            };
            fields.iter().fold(own, |acc, (_, t)| {
                acc.intersect(structural_capabilities(t, ordered_opaque))
            })
        }
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Bool(_) => 0,
        Value::Int(_) => 1,
        Value::Long(_) => 2,
        Value::Double(_) => 3,
        Value::Str(_) => 4,
        Value::Bytes(_) => 5,
        Value::Pair(..) => 6,
        Value::Tuple(_) => 7,
        Value::Collection(_) => 8,
        Value::Record(_) => 9,
    }
}

/// Structural total order over values of the same shape.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Long(x), Value::Long(y)) => x.cmp(y),
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Str(x), Value::Str(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Pair(a1, b1), Value::Pair(a2, b2)) => {
            compare_values(a1, a2).then_with(|| compare_values(b1, b2))
        }
        (Value::Tuple(x), Value::Tuple(y)) | (Value::Collection(x), Value::Collection(y)) => {
            compare_seq(x.iter(), y.iter())
        }
        (Value::Record(x), Value::Record(y)) => {
            compare_seq(x.iter().map(|(_, v)| v), y.iter().map(|(_, v)| v))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_seq<'a>(
    mut x: impl Iterator<Item = &'a Value>,
    mut y: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (x.next(), y.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => match compare_values(a, b) {
                Ordering::Equal => {}
                other => return other,
            },
        }
    }
}
