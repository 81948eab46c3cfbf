//! Inner join on key, expressed as a co-group followed by a per-key cross
//! product.

use crate::collection::PCollection;
use crate::error::GraphConstructionError;
use crate::types::{pair_type, table_type};
use crate::value::Value;
use anyhow::anyhow;

impl PCollection {
    /// `table<K, V1>` joined with `table<K, V2>` gives `table<K, pair<V1, V2>>`,
    /// one row per matching value pair. Keys missing on either side drop out.
    pub fn join(&self, other: &PCollection) -> Result<PCollection, GraphConstructionError> {
        let grouped = self.cogroup(other)?;
        let (k, slots) = grouped
            .ptype()
            .key_type()
            .zip(grouped.ptype().value_type())
            .ok_or_else(|| GraphConstructionError::NotATable {
                node: "join".into(),
                found: grouped.ptype().to_string(),
            })?;
        let (Some(left), Some(right)) = (
            slots.key_type().and_then(|c| c.element_type()),
            slots.value_type().and_then(|c| c.element_type()),
        ) else {
            return Err(GraphConstructionError::NotGrouped {
                node: "join".into(),
                found: slots.to_string(),
            });
        };
        let out = table_type(&k, &pair_type(&left, &right)?)?;
        grouped.flat_map("join", out, |row| {
            let (k, slots) = row
                .into_pair()
                .map_err(|v| anyhow!("join row must be a pair, got {}", v.kind_name()))?;
            let (ls, rs) = slots
                .into_pair()
                .map_err(|v| anyhow!("join slots must be a pair, got {}", v.kind_name()))?;
            let ls = ls
                .into_collection()
                .map_err(|v| anyhow!("left slot must be a collection, got {}", v.kind_name()))?;
            let rs = rs
                .into_collection()
                .map_err(|v| anyhow!("right slot must be a collection, got {}", v.kind_name()))?;
            let mut out = Vec::with_capacity(ls.len() * rs.len());
            for l in &ls {
                for r in &rs {
                    out.push(Value::pair(k.clone(), Value::pair(l.clone(), r.clone())));
                }
            }
            Ok(out)
        })
    }
}
