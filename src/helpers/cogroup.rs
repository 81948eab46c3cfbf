//! Two-way co-group.
//!
//! Each side is tagged into the shared value shape
//! `pair<collection<V1>, collection<V2>>` (its own value in one slot, an
//! empty collection in the other), the two are unioned and shuffled once, and
//! groups are concatenated slot-wise by [`CogroupConcat`]. Because that
//! combiner is associative and commutative the planner fuses it into the
//! shuffle, so tagging and pre-aggregation happen map-side.

use crate::collection::PCollection;
use crate::combiners::CombineFn;
use crate::error::GraphConstructionError;
use crate::types::{collection_type, pair_type, table_type};
use crate::value::Value;
use anyhow::{Result, anyhow, bail};

/// Slot-wise bag union of `pair<collection<_>, collection<_>>` values.
#[derive(Clone, Copy, Debug, Default)]
pub struct CogroupConcat;

impl CombineFn for CogroupConcat {
    fn combine(&self, a: Value, b: Value) -> Result<Value> {
        let (a1, a2) = a
            .into_pair()
            .map_err(|v| anyhow!("cogroup value must be a pair, got {}", v.kind_name()))?;
        let (b1, b2) = b
            .into_pair()
            .map_err(|v| anyhow!("cogroup value must be a pair, got {}", v.kind_name()))?;
        match (a1, a2, b1, b2) {
            (
                Value::Collection(mut l),
                Value::Collection(mut r),
                Value::Collection(l2),
                Value::Collection(r2),
            ) => {
                l.extend(l2);
                r.extend(r2);
                Ok(Value::pair(Value::Collection(l), Value::Collection(r)))
            }
            _ => bail!("cogroup slots must be collections"),
        }
    }

    fn name(&self) -> &str {
        "cogroup"
    }
}

impl PCollection {
    /// Group `self` (`table<K, V1>`) with `other` (`table<K, V2>`) into
    /// `table<K, pair<collection<V1>, collection<V2>>>`.
    ///
    /// Every key present on either side appears once; a side without values
    /// for a key contributes an empty collection.
    pub fn cogroup(&self, other: &PCollection) -> Result<PCollection, GraphConstructionError> {
        let not_keyed = |c: &PCollection| GraphConstructionError::NotATable {
            node: "cogroup".into(),
            found: c.ptype().to_string(),
        };
        let (k1, v1) = self
            .ptype()
            .key_type()
            .zip(self.ptype().value_type())
            .ok_or_else(|| not_keyed(self))?;
        let (k2, v2) = other
            .ptype()
            .key_type()
            .zip(other.ptype().value_type())
            .ok_or_else(|| not_keyed(other))?;
        if k1 != k2 {
            return Err(GraphConstructionError::TypeMismatch {
                node: "cogroup".into(),
                expected: k1.to_string(),
                found: k2.to_string(),
            });
        }

        let slots = pair_type(&collection_type(&v1)?, &collection_type(&v2)?)?;
        let tagged = table_type(&k1, &slots)?;
        let left = self.map("cogroup_tag_left", tagged.clone(), |kv| {
            let (k, v) = kv
                .into_pair()
                .map_err(|v| anyhow!("expected a pair, got {}", v.kind_name()))?;
            Ok(Value::pair(
                k,
                Value::pair(Value::Collection(vec![v]), Value::Collection(vec![])),
            ))
        })?;
        let right = other.map("cogroup_tag_right", tagged, |kv| {
            let (k, v) = kv
                .into_pair()
                .map_err(|v| anyhow!("expected a pair, got {}", v.kind_name()))?;
            Ok(Value::pair(
                k,
                Value::pair(Value::Collection(vec![]), Value::Collection(vec![v])),
            ))
        })?;
        left.union(&[&right])?
            .group_by_key()?
            .combine_values(CogroupConcat)
    }
}
