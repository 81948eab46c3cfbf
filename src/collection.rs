//! Lazy collection handles.
//!
//! A [`PCollection`] names one IR node plus its output [`PType`]. Every
//! operation records a new node and checks types locally; nothing runs until
//! [`Pipeline::run`]. Handles are cheap to clone and may be consumed any
//! number of times, which is how shared subgraphs arise.
//!
//! ```
//! use ironcrunch::*;
//!
//! let p = Pipeline::default();
//! let f = Family::Binary;
//! let lines = p.read(MemSource::new(f.strings(), ["a b", "b"]))?;
//! let words = lines.flat_map("split", f.strings(), |line| {
//!     let s = line.as_str().unwrap_or_default().to_string();
//!     Ok(s.split_whitespace().map(Value::from).collect())
//! })?;
//! assert_eq!(words.ptype(), &f.strings());
//! # Ok::<(), GraphConstructionError>(())
//! ```

use crate::combiners::CombineFn;
use crate::error::GraphConstructionError;
use crate::io::Target;
use crate::node::{DoFn, DoOp, Emitter, FilterOp, FlatMapOp, MapOp, NodeKind};
use crate::node_id::NodeId;
use crate::pipeline::Pipeline;
use crate::types::{PType, collection_type, pair_type, table_type};
use crate::value::Value;
use anyhow::{Result, anyhow};
use std::sync::Arc;

#[derive(Clone)]
pub struct PCollection {
    pipeline: Pipeline,
    id: NodeId,
    ptype: PType,
}

impl PCollection {
    pub(crate) fn new(pipeline: Pipeline, id: NodeId, ptype: PType) -> Self {
        Self {
            pipeline,
            id,
            ptype,
        }
    }

    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[must_use]
    pub fn ptype(&self) -> &PType {
        &self.ptype
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn derive(
        &self,
        name: &str,
        kind: NodeKind,
        ptype: PType,
    ) -> Result<PCollection, GraphConstructionError> {
        let id = self.pipeline.add_node(name, kind, vec![self.id], ptype.clone())?;
        Ok(PCollection::new(self.pipeline.clone(), id, ptype))
    }

    fn keyed_parts(&self, node: &str) -> Result<(PType, PType), GraphConstructionError> {
        match (self.ptype.key_type(), self.ptype.value_type()) {
            (Some(k), Some(v)) => Ok((k, v)),
            _ => Err(GraphConstructionError::NotATable {
                node: node.to_string(),
                found: self.ptype.to_string(),
            }),
        }
    }

    /// Generic element-wise transform with an explicit output type.
    ///
    /// When `f` declares an [`input_type`](DoFn::input_type) it must equal
    /// this collection's type.
    pub fn parallel_do_with(
        &self,
        name: &str,
        f: impl DoFn + 'static,
        out: PType,
    ) -> Result<PCollection, GraphConstructionError> {
        if let Some(expected) = f.input_type()
            && expected != self.ptype
        {
            return Err(GraphConstructionError::TypeMismatch {
                node: name.to_string(),
                expected: expected.to_string(),
                found: self.ptype.to_string(),
            });
        }
        self.derive(name, NodeKind::ParallelDo(Arc::new(f)), out)
    }

    /// Element-wise transform written against an [`Emitter`].
    pub fn parallel_do<F>(&self, name: &str, out: PType, f: F) -> Result<PCollection, GraphConstructionError>
    where
        F: Fn(Value, &mut Emitter) -> Result<()> + Send + Sync + 'static,
    {
        self.parallel_do_with(name, DoOp(f), out)
    }

    pub fn map<F>(&self, name: &str, out: PType, f: F) -> Result<PCollection, GraphConstructionError>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.parallel_do_with(name, MapOp(f), out)
    }

    pub fn flat_map<F>(&self, name: &str, out: PType, f: F) -> Result<PCollection, GraphConstructionError>
    where
        F: Fn(Value) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.parallel_do_with(name, FlatMapOp(f), out)
    }

    pub fn filter<F>(&self, name: &str, pred: F) -> Result<PCollection, GraphConstructionError>
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.parallel_do_with(name, FilterOp(pred), self.ptype.clone())
    }

    /// Transform the value half of each pair, keeping the key.
    pub fn map_values<F>(&self, name: &str, value_out: PType, f: F) -> Result<PCollection, GraphConstructionError>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let (k, _) = self.keyed_parts(name)?;
        let out = if self.ptype.is_table() {
            table_type(&k, &value_out)?
        } else {
            pair_type(&k, &value_out)?
        };
        self.map(name, out, move |kv| {
            let (k, v) = kv
                .into_pair()
                .map_err(|v| anyhow!("expected a pair, got {}", v.kind_name()))?;
            Ok(Value::pair(k, f(v)?))
        })
    }

    /// Transform the key half of each pair, keeping the value.
    pub fn map_keys<F>(&self, name: &str, key_out: PType, f: F) -> Result<PCollection, GraphConstructionError>
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        let (_, v) = self.keyed_parts(name)?;
        let out = if self.ptype.is_table() {
            table_type(&key_out, &v)?
        } else {
            pair_type(&key_out, &v)?
        };
        self.map(name, out, move |kv| {
            let (k, v) = kv
                .into_pair()
                .map_err(|v| anyhow!("expected a pair, got {}", v.kind_name()))?;
            Ok(Value::pair(f(k)?, v))
        })
    }

    /// Shuffle by key: `table<K, V>` becomes `table<K, collection<V>>`.
    ///
    /// The key type must support equality and hashing.
    pub fn group_by_key(&self) -> Result<PCollection, GraphConstructionError> {
        let name = "group_by_key";
        let (k, v) = self.keyed_parts(name)?;
        let missing = k.capabilities().missing(crate::types::Capabilities::HASH_GROUPING);
        if !missing.is_empty() {
            return Err(GraphConstructionError::UnsupportedKey {
                node: name.to_string(),
                key: k.to_string(),
                missing: missing.join(", "),
            });
        }
        let out = table_type(&k, &collection_type(&v)?)?;
        self.derive(name, NodeKind::GroupByKey, out)
    }

    /// Fold every group with an associative, commutative combiner:
    /// `table<K, collection<V>>` becomes `table<K, V>`.
    pub fn combine_values(&self, combiner: impl CombineFn + 'static) -> Result<PCollection, GraphConstructionError> {
        let name = combiner.name().to_string();
        let Some((k, v)) = self.ptype.grouped_parts() else {
            return Err(GraphConstructionError::NotGrouped {
                node: name,
                found: self.ptype.to_string(),
            });
        };
        let out = table_type(&k, &v)?;
        self.derive(&name, NodeKind::CombineValues(Arc::new(combiner)), out)
    }

    pub fn union(&self, others: &[&PCollection]) -> Result<PCollection, GraphConstructionError> {
        let mut all = Vec::with_capacity(others.len() + 1);
        all.push(self);
        all.extend_from_slice(others);
        self.pipeline.union(&all)
    }

    /// Persist this collection once, however many consumers it has. The
    /// result can be read back with [`Pipeline::read_materialized`].
    pub fn materialize(&self) -> Result<PCollection, GraphConstructionError> {
        self.derive("materialize", NodeKind::Materialize, self.ptype.clone())
    }

    pub fn write(&self, target: impl Target + 'static) -> Result<(), GraphConstructionError> {
        self.pipeline.write(self, target)
    }
}
