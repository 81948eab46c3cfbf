//! Binary family codec.
//!
//! A positional encoding: the schema lives in the [`LogicalType`], the bytes
//! carry only the values. Primitives use `postcard` (varint integers, LE
//! doubles, length-prefixed strings and bytes); composites are the
//! concatenation of their parts, with collections prefixed by their length.

use super::{Capabilities, Family, FamilyCodec, LogicalType, PrimitiveKind, mismatch};
use crate::error::CodecError;
use crate::value::Value;
use serde::{Deserialize, Serialize};

pub struct BinaryCodec;

impl FamilyCodec for BinaryCodec {
    fn family(&self) -> Family {
        Family::Binary
    }

    fn encode(&self, ty: &LogicalType, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        write_value(&mut out, ty, value)?;
        Ok(out)
    }

    fn decode(&self, ty: &LogicalType, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut cursor = bytes;
        let value = read_value(&mut cursor, ty)?;
        if !cursor.is_empty() {
            return Err(malformed(format!("{} trailing bytes", cursor.len())));
        }
        Ok(value)
    }

    fn capabilities(&self, ty: &LogicalType) -> Capabilities {
        super::structural_capabilities(ty, true)
    }
}

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        family: Family::Binary,
        reason: reason.into(),
    }
}

fn put<T: Serialize + ?Sized>(out: &mut Vec<u8>, v: &T) -> Result<(), CodecError> {
    let bytes = postcard::to_allocvec(v).map_err(|e| CodecError::Unencodable(e.to_string()))?;
    out.extend_from_slice(&bytes);
    Ok(())
}

fn take<'a, T: Deserialize<'a>>(input: &mut &'a [u8]) -> Result<T, CodecError> {
    let (v, rest) = postcard::take_from_bytes::<T>(input).map_err(|e| malformed(e.to_string()))?;
    *input = rest;
    Ok(v)
}

fn write_value(out: &mut Vec<u8>, ty: &LogicalType, value: &Value) -> Result<(), CodecError> {
    match (ty, value) {
        (LogicalType::Primitive(PrimitiveKind::Boolean), Value::Bool(b)) => put(out, b),
        (LogicalType::Primitive(PrimitiveKind::Int), Value::Int(v)) => put(out, v),
        (LogicalType::Primitive(PrimitiveKind::Long), Value::Long(v)) => put(out, v),
        (LogicalType::Primitive(PrimitiveKind::Double), Value::Double(v)) => put(out, v),
        (LogicalType::Primitive(PrimitiveKind::String), Value::Str(s)) => put(out, s.as_str()),
        (LogicalType::Primitive(PrimitiveKind::Bytes), Value::Bytes(b)) => put(out, b.as_slice()),
        (LogicalType::Pair(a, b) | LogicalType::Table(a, b), Value::Pair(x, y)) => {
            write_value(out, a, x)?;
            write_value(out, b, y)
        }
        (LogicalType::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => {
            for (t, v) in types.iter().zip(items) {
                write_value(out, t, v)?;
            }
            Ok(())
        }
        (LogicalType::Collection(t), Value::Collection(items)) => {
            put(out, &(items.len() as u64))?;
            for v in items {
                write_value(out, t, v)?;
            }
            Ok(())
        }
        (LogicalType::Record { fields, .. }, Value::Record(values))
            if fields.len() == values.len() =>
        {
            for ((name, t), (vname, v)) in fields.iter().zip(values) {
                if name != vname {
                    return Err(mismatch(ty, value));
                }
                write_value(out, t, v)?;
            }
            Ok(())
        }
        _ => Err(mismatch(ty, value)),
    }
}

fn read_value(input: &mut &[u8], ty: &LogicalType) -> Result<Value, CodecError> {
    Ok(match ty {
        LogicalType::Primitive(PrimitiveKind::Boolean) => Value::Bool(take(input)?),
        LogicalType::Primitive(PrimitiveKind::Int) => Value::Int(take(input)?),
        LogicalType::Primitive(PrimitiveKind::Long) => Value::Long(take(input)?),
        LogicalType::Primitive(PrimitiveKind::Double) => Value::Double(take(input)?),
        LogicalType::Primitive(PrimitiveKind::String) => Value::Str(take::<String>(input)?),
        LogicalType::Primitive(PrimitiveKind::Bytes) => Value::Bytes(take::<Vec<u8>>(input)?),
        LogicalType::Pair(a, b) | LogicalType::Table(a, b) => {
            let x = read_value(input, a)?;
            let y = read_value(input, b)?;
            Value::Pair(Box::new(x), Box::new(y))
        }
        LogicalType::Tuple(types) => Value::Tuple(
            types
                .iter()
                .map(|t| read_value(input, t))
                .collect::<Result<_, _>>()?,
        ),
        LogicalType::Collection(t) => {
            let len: u64 = take(input)?;
            // Every element takes at least one byte.
            if len > input.len() as u64 {
                return Err(malformed(format!(
                    "collection length {len} exceeds remaining {} bytes",
                    input.len()
                )));
            }
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_value(input, t)?);
            }
            Value::Collection(items)
        }
        LogicalType::Record { fields, .. } => {
            let mut out = Vec::with_capacity(fields.len());
            for (name, t) in fields {
                out.push((name.clone(), read_value(input, t)?));
            }
            Value::Record(out)
        }
    })
}
