//! JSON family codec.
//!
//! Pairs, tables, tuples and collections encode as arrays; records encode as
//! objects keyed by field name (key order is canonical, so equal values
//! produce equal bytes). Bytes encode as arrays of numbers. Non-finite doubles
//! encode as the strings `"NaN"`, `"Infinity"` and `"-Infinity"`.

use super::{Capabilities, Family, FamilyCodec, LogicalType, PrimitiveKind, mismatch};
use crate::error::CodecError;
use crate::value::Value;
use serde_json::{Map, Number, Value as Json};

pub struct JsonCodec;

impl FamilyCodec for JsonCodec {
    fn family(&self) -> Family {
        Family::Json
    }

    fn encode(&self, ty: &LogicalType, value: &Value) -> Result<Vec<u8>, CodecError> {
        let json = to_json(ty, value)?;
        serde_json::to_vec(&json).map_err(|e| CodecError::Unencodable(e.to_string()))
    }

    fn decode(&self, ty: &LogicalType, bytes: &[u8]) -> Result<Value, CodecError> {
        let json: Json = serde_json::from_slice(bytes).map_err(|e| malformed(e.to_string()))?;
        from_json(ty, json)
    }

    fn capabilities(&self, ty: &LogicalType) -> Capabilities {
        super::structural_capabilities(ty, false)
    }
}

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::Malformed {
        family: Family::Json,
        reason: reason.into(),
    }
}

pub(crate) fn to_json(ty: &LogicalType, value: &Value) -> Result<Json, CodecError> {
    Ok(match (ty, value) {
        (LogicalType::Primitive(PrimitiveKind::Boolean), Value::Bool(b)) => Json::Bool(*b),
        (LogicalType::Primitive(PrimitiveKind::Int), Value::Int(v)) => Json::from(*v),
        (LogicalType::Primitive(PrimitiveKind::Long), Value::Long(v)) => Json::from(*v),
        (LogicalType::Primitive(PrimitiveKind::Double), Value::Double(v)) => {
            match Number::from_f64(*v) {
                Some(n) => Json::Number(n),
                None if v.is_nan() => Json::String("NaN".into()),
                None if *v > 0.0 => Json::String("Infinity".into()),
                None => Json::String("-Infinity".into()),
            }
        }
        (LogicalType::Primitive(PrimitiveKind::String), Value::Str(s)) => Json::String(s.clone()),
        (LogicalType::Primitive(PrimitiveKind::Bytes), Value::Bytes(b)) => {
            Json::Array(b.iter().map(|x| Json::from(*x)).collect())
        }
        (LogicalType::Pair(a, b) | LogicalType::Table(a, b), Value::Pair(x, y)) => {
            Json::Array(vec![to_json(a, x)?, to_json(b, y)?])
        }
        (LogicalType::Tuple(types), Value::Tuple(items)) if types.len() == items.len() => {
            Json::Array(
                types
                    .iter()
                    .zip(items)
                    .map(|(t, v)| to_json(t, v))
                    .collect::<Result<_, _>>()?,
            )
        }
        (LogicalType::Collection(t), Value::Collection(items)) => Json::Array(
            items
                .iter()
                .map(|v| to_json(t, v))
                .collect::<Result<_, _>>()?,
        ),
        (LogicalType::Record { fields, .. }, Value::Record(values))
            if fields.len() == values.len() =>
        {
            let mut map = Map::new();
            for ((name, t), (vname, v)) in fields.iter().zip(values) {
                if name != vname {
                    return Err(mismatch(ty, value));
                }
                map.insert(name.clone(), to_json(t, v)?);
            }
            Json::Object(map)
        }
        _ => return Err(mismatch(ty, value)),
    })
}

fn from_json(ty: &LogicalType, json: Json) -> Result<Value, CodecError> {
    match (ty, json) {
        (LogicalType::Primitive(PrimitiveKind::Boolean), Json::Bool(b)) => Ok(Value::Bool(b)),
        (LogicalType::Primitive(PrimitiveKind::Int), Json::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(Value::Int)
            .ok_or_else(|| malformed(format!("{n} is not an int"))),
        (LogicalType::Primitive(PrimitiveKind::Long), Json::Number(n)) => n
            .as_i64()
            .map(Value::Long)
            .ok_or_else(|| malformed(format!("{n} is not a long"))),
        (LogicalType::Primitive(PrimitiveKind::Double), Json::Number(n)) => n
            .as_f64()
            .map(Value::Double)
            .ok_or_else(|| malformed(format!("{n} is not a double"))),
        (LogicalType::Primitive(PrimitiveKind::Double), Json::String(s)) => match s.as_str() {
            "NaN" => Ok(Value::Double(f64::NAN)),
            "Infinity" => Ok(Value::Double(f64::INFINITY)),
            "-Infinity" => Ok(Value::Double(f64::NEG_INFINITY)),
            other => Err(malformed(format!("`{other}` is not a double"))),
        },
        (LogicalType::Primitive(PrimitiveKind::String), Json::String(s)) => Ok(Value::Str(s)),
        (LogicalType::Primitive(PrimitiveKind::Bytes), Json::Array(items)) => items
            .into_iter()
            .map(|j| {
                j.as_u64()
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| malformed("byte out of range"))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Value::Bytes),
        (LogicalType::Pair(a, b) | LogicalType::Table(a, b), Json::Array(items)) => {
            let [x, y]: [Json; 2] = items
                .try_into()
                .map_err(|_| malformed("pair must have exactly two elements"))?;
            Ok(Value::Pair(
                Box::new(from_json(a, x)?),
                Box::new(from_json(b, y)?),
            ))
        }
        (LogicalType::Tuple(types), Json::Array(items)) => {
            if types.len() != items.len() {
                return Err(malformed(format!(
                    "tuple of arity {} has {} elements",
                    types.len(),
                    items.len()
                )));
            }
            types
                .iter()
                .zip(items)
                .map(|(t, j)| from_json(t, j))
                .collect::<Result<_, _>>()
                .map(Value::Tuple)
        }
        (LogicalType::Collection(t), Json::Array(items)) => items
            .into_iter()
            .map(|j| from_json(t, j))
            .collect::<Result<_, _>>()
            .map(Value::Collection),
        (LogicalType::Record { name, fields }, Json::Object(mut map)) => {
            let mut out = Vec::with_capacity(fields.len());
            for (field, t) in fields {
                let j = map
                    .remove(field)
                    .ok_or_else(|| malformed(format!("record {name} is missing field `{field}`")))?;
                out.push((field.clone(), from_json(t, j)?));
            }
            Ok(Value::Record(out))
        }
        (ty, other) => Err(malformed(format!("expected {ty}, found {other}"))),
    }
}
