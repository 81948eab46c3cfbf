//! IR node kinds and element-wise function adapters.
//!
//! A transform is stored as data: a [`NodeKind`] tag plus the function it
//! carries. The planner pattern-matches on the tag and never calls the
//! function; only the execution engine does.

use crate::combiners::CombineFn;
use crate::io::{Source, Target};
use crate::node_id::NodeId;
use crate::types::PType;
use crate::value::Value;
use anyhow::Result;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Output channel for a [`DoFn`]: one input may emit zero or more outputs.
#[derive(Debug, Default)]
pub struct Emitter {
    out: Vec<Value>,
}

impl Emitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, v: impl Into<Value>) {
        self.out.push(v.into());
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Value> {
        self.out.drain(..)
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Value> {
        self.out
    }
}

/// An element-wise transform.
pub trait DoFn: Send + Sync {
    fn process(&self, input: Value, emitter: &mut Emitter) -> Result<()>;

    /// Declared input type, checked against the incoming edge when set.
    fn input_type(&self) -> Option<PType> {
        None
    }
}

/// One-to-one transform.
pub struct MapOp<F>(pub F);

impl<F> DoFn for MapOp<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn process(&self, input: Value, emitter: &mut Emitter) -> Result<()> {
        emitter.emit((self.0)(input)?);
        Ok(())
    }
}

/// One-to-many transform.
pub struct FlatMapOp<F>(pub F);

impl<F> DoFn for FlatMapOp<F>
where
    F: Fn(Value) -> Result<Vec<Value>> + Send + Sync,
{
    fn process(&self, input: Value, emitter: &mut Emitter) -> Result<()> {
        for v in (self.0)(input)? {
            emitter.emit(v);
        }
        Ok(())
    }
}

/// Keep elements matching a predicate.
pub struct FilterOp<F>(pub F);

impl<F> DoFn for FilterOp<F>
where
    F: Fn(&Value) -> bool + Send + Sync,
{
    fn process(&self, input: Value, emitter: &mut Emitter) -> Result<()> {
        if (self.0)(&input) {
            emitter.emit(input);
        }
        Ok(())
    }
}

/// Transform written directly against the emitter.
pub struct DoOp<F>(pub F);

impl<F> DoFn for DoOp<F>
where
    F: Fn(Value, &mut Emitter) -> Result<()> + Send + Sync,
{
    fn process(&self, input: Value, emitter: &mut Emitter) -> Result<()> {
        (self.0)(input, emitter)
    }
}

#[derive(Clone)]
pub enum NodeKind {
    Source(Arc<dyn Source>),
    ParallelDo(Arc<dyn DoFn>),
    /// Shuffle boundary: `table<K, V>` in, `table<K, collection<V>>` out.
    GroupByKey,
    /// Per-group fold: `table<K, collection<V>>` in, `table<K, V>` out.
    CombineValues(Arc<dyn CombineFn>),
    Union,
    Materialize,
    Target(Arc<dyn Target>),
}

impl NodeKind {
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Source(_) => "Source",
            Self::ParallelDo(_) => "ParallelDo",
            Self::GroupByKey => "GroupByKey",
            Self::CombineValues(_) => "CombineValues",
            Self::Union => "Union",
            Self::Materialize => "Materialize",
            Self::Target(_) => "Target",
        }
    }

    /// Required input count as `(min, max)`.
    #[must_use]
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Self::Source(_) => (0, Some(0)),
            Self::Union => (1, None),
            _ => (1, Some(1)),
        }
    }
}

impl Debug for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(self.tag())
    }
}

/// One vertex of the IR. Edges are plain ids of upstream nodes.
#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub inputs: Vec<NodeId>,
    /// Output type; for targets, the type of the data written.
    pub ptype: PType,
}
