//! Associative combiners for `combine_values`.
//!
//! A [`CombineFn`] folds two values of a group into one. The planner may apply
//! it on both sides of a shuffle (map-side pre-aggregation and reduce-side
//! final aggregation) and in any grouping, so implementations **must** be
//! associative and commutative. This is a documented precondition; misuse
//! shows up as wrong results, never as a runtime error.
//!
//! Built-ins:
//!
//! - [`SumLongs`], [`SumDoubles`] -- numeric sums.
//! - [`MaxLongs`], [`MinLongs`] -- extrema.
//! - [`Concat`] -- bag union of collection values.
//! - [`combine_with`] -- wrap a closure.

use crate::value::Value;
use anyhow::{Result, bail};

/// Binary associative, commutative fold over group members.
pub trait CombineFn: Send + Sync {
    fn combine(&self, a: Value, b: Value) -> Result<Value>;

    /// Label used in stage names and plan output.
    fn name(&self) -> &str {
        "combine"
    }
}

/// Fold a non-empty group with `c`. Returns `None` for an empty group.
pub fn fold_values(c: &dyn CombineFn, values: Vec<Value>) -> Result<Option<Value>> {
    let mut it = values.into_iter();
    let Some(mut acc) = it.next() else {
        return Ok(None);
    };
    for v in it {
        acc = c.combine(acc, v)?;
    }
    Ok(Some(acc))
}

fn longs(name: &str, a: &Value, b: &Value) -> Result<(i64, i64)> {
    match (a, b) {
        (Value::Long(x), Value::Long(y)) => Ok((*x, *y)),
        _ => bail!(
            "{name} expects longs, got {} and {}",
            a.kind_name(),
            b.kind_name()
        ),
    }
}

/// Sum of `long` values. Overflow is an error.
#[derive(Clone, Copy, Debug, Default)]
pub struct SumLongs;

impl CombineFn for SumLongs {
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        let (x, y) = longs("sum_longs", &a, &b)?;
        match x.checked_add(y) {
            Some(s) => Ok(Value::Long(s)),
            None => bail!("sum_longs overflowed adding {x} and {y}"),
        }
    }

    fn name(&self) -> &str {
        "sum_longs"
    }
}

/// Sum of `double` values.
#[derive(Clone, Copy, Debug, Default)]
pub struct SumDoubles;

impl CombineFn for SumDoubles {
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        match (&a, &b) {
            (Value::Double(x), Value::Double(y)) => Ok(Value::Double(x + y)),
            _ => bail!(
                "sum_doubles expects doubles, got {} and {}",
                a.kind_name(),
                b.kind_name()
            ),
        }
    }

    fn name(&self) -> &str {
        "sum_doubles"
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MaxLongs;

impl CombineFn for MaxLongs {
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        let (x, y) = longs("max_longs", &a, &b)?;
        Ok(Value::Long(x.max(y)))
    }

    fn name(&self) -> &str {
        "max_longs"
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MinLongs;

impl CombineFn for MinLongs {
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        let (x, y) = longs("min_longs", &a, &b)?;
        Ok(Value::Long(x.min(y)))
    }

    fn name(&self) -> &str {
        "min_longs"
    }
}

/// Bag union of `collection` values. Member order is unspecified.
#[derive(Clone, Copy, Debug, Default)]
pub struct Concat;

impl CombineFn for Concat {
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        match (a, b) {
            (Value::Collection(mut x), Value::Collection(y)) => {
                x.extend(y);
                Ok(Value::Collection(x))
            }
            (a, b) => bail!(
                "concat expects collections, got {} and {}",
                a.kind_name(),
                b.kind_name()
            ),
        }
    }

    fn name(&self) -> &str {
        "concat"
    }
}

/// A combiner backed by a closure.
pub struct FnCombiner<F> {
    name: String,
    f: F,
}

impl<F> CombineFn for FnCombiner<F>
where
    F: Fn(Value, Value) -> Result<Value> + Send + Sync,
{
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        (self.f)(a, b)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap `f` as a named [`CombineFn`]. `f` must be associative and commutative.
pub fn combine_with<F>(name: &str, f: F) -> FnCombiner<F>
where
    F: Fn(Value, Value) -> Result<Value> + Send + Sync,
{
    FnCombiner {
        name: name.to_string(),
        f,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_in_any_grouping_matches() {
        let vals: Vec<Value> = (1..=5i64).map(Value::Long).collect();
        let all = fold_values(&SumLongs, vals.clone()).unwrap().unwrap();
        let left = fold_values(&SumLongs, vals[..2].to_vec()).unwrap().unwrap();
        let right = fold_values(&SumLongs, vals[2..].to_vec()).unwrap().unwrap();
        assert_eq!(all, Value::Long(15));
        assert_eq!(SumLongs.combine(right, left).unwrap(), all);
    }

    #[test]
    fn empty_group_folds_to_none() {
        assert!(fold_values(&MaxLongs, vec![]).unwrap().is_none());
    }

    #[test]
    fn wrong_kinds_are_errors() {
        assert!(SumLongs.combine(Value::from("a"), Value::Long(1)).is_err());
        assert!(
            SumLongs
                .combine(Value::Long(i64::MAX), Value::Long(1))
                .is_err()
        );
        assert!(Concat.combine(Value::Long(1), Value::Long(2)).is_err());
    }

    #[test]
    fn closure_combiner_keeps_its_name() {
        let c = combine_with("longest", |a: Value, b: Value| {
            let la = a.as_str().map_or(0, str::len);
            let lb = b.as_str().map_or(0, str::len);
            Ok(if lb > la { b } else { a })
        });
        assert_eq!(c.name(), "longest");
        assert_eq!(
            c.combine(Value::from("ab"), Value::from("abc")).unwrap(),
            Value::from("abc")
        );
    }
}
