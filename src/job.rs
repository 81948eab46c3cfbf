//! Job assembly: a direct, deterministic lowering of each [`Stage`] into an
//! immutable [`Job`] the execution engine can run.
//!
//! Per pipe, the nodes between its input and the shuffle are composed into one
//! [`FnChain`] applied to every input element. The post-shuffle nodes become
//! the reduce chain, applied to every grouped row. Unions and explicit
//! materializations are identities inside a chain and are dropped.

use crate::combiners::{CombineFn, fold_values};
use crate::error::PlanningError;
use crate::io::{Source, Target};
use crate::node::{DoFn, Emitter, Node, NodeKind};
use crate::node_id::NodeId;
use crate::stage::{Stage, StageGraph, StageId, StageInput, StageOutput};
use crate::types::PType;
use crate::value::Value;
use anyhow::{Result, anyhow};
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    MapOnly,
    MapReduce,
}

/// One element-wise step with its declared types.
#[derive(Clone)]
pub enum TransformStep {
    Do {
        name: String,
        func: Arc<dyn DoFn>,
        input_type: PType,
        output_type: PType,
    },
    /// `table<K, collection<V>>` rows folded to `table<K, V>`.
    FoldGroups {
        name: String,
        combiner: Arc<dyn CombineFn>,
        input_type: PType,
        output_type: PType,
    },
}

impl TransformStep {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Do { name, .. } | Self::FoldGroups { name, .. } => name,
        }
    }

    #[must_use]
    pub fn input_type(&self) -> &PType {
        match self {
            Self::Do { input_type, .. } | Self::FoldGroups { input_type, .. } => input_type,
        }
    }

    #[must_use]
    pub fn output_type(&self) -> &PType {
        match self {
            Self::Do { output_type, .. } | Self::FoldGroups { output_type, .. } => output_type,
        }
    }

    fn apply(&self, input: Value, out: &mut Vec<Value>) -> Result<()> {
        match self {
            Self::Do { func, .. } => {
                let mut emitter = Emitter::new();
                func.process(input, &mut emitter)?;
                out.extend(emitter.drain());
                Ok(())
            }
            Self::FoldGroups { name, combiner, .. } => {
                let (k, vs) = input
                    .into_pair()
                    .map_err(|v| anyhow!("{name}: expected a grouped row, got {}", v.kind_name()))?;
                let vs = vs
                    .into_collection()
                    .map_err(|v| anyhow!("{name}: expected a collection, got {}", v.kind_name()))?;
                if let Some(folded) = fold_values(combiner.as_ref(), vs)? {
                    out.push(Value::pair(k, folded));
                }
                Ok(())
            }
        }
    }
}

impl Debug for TransformStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let kind = match self {
            Self::Do { .. } => "Do",
            Self::FoldGroups { .. } => "FoldGroups",
        };
        write!(
            f,
            "{kind}({}: {} -> {})",
            self.name(),
            self.input_type(),
            self.output_type()
        )
    }
}

/// An ordered composition of steps.
#[derive(Clone, Debug, Default)]
pub struct FnChain {
    pub steps: Vec<TransformStep>,
}

impl FnChain {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Run one element through every step.
    pub fn apply(&self, input: Value) -> Result<Vec<Value>> {
        let mut cur = vec![input];
        for step in &self.steps {
            let mut next = Vec::with_capacity(cur.len());
            for v in cur {
                step.apply(v, &mut next)?;
            }
            if next.is_empty() {
                return Ok(next);
            }
            cur = next;
        }
        Ok(cur)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(TransformStep::name)
    }
}

#[derive(Clone)]
pub enum InputSpec {
    Source(Arc<dyn Source>),
    Materialized { location: String, ptype: PType },
}

impl Debug for InputSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Source(s) => write!(f, "Source({})", s.describe()),
            Self::Materialized { location, ptype } => write!(f, "Materialized({location}: {ptype})"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct JobInput {
    pub spec: InputSpec,
    pub map_chain: FnChain,
}

#[derive(Clone)]
pub struct ShuffleSpec {
    pub key_type: PType,
    pub value_type: PType,
    /// Applied map-side per partition and reduce-side per key.
    pub combiner: Option<Arc<dyn CombineFn>>,
    /// Order groups by key; requires an ordered key type.
    pub sorted: bool,
}

impl Debug for ShuffleSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.debug_struct("ShuffleSpec")
            .field("key_type", &self.key_type.to_string())
            .field("value_type", &self.value_type.to_string())
            .field("combiner", &self.combiner.as_ref().map(|c| c.name().to_string()))
            .field("sorted", &self.sorted)
            .finish()
    }
}

#[derive(Clone)]
pub enum JobOutput {
    Target(Arc<dyn Target>),
    Temp { location: String },
}

impl JobOutput {
    #[must_use]
    pub fn location(&self) -> String {
        match self {
            Self::Target(t) => t.location(),
            Self::Temp { location } => location.clone(),
        }
    }
}

impl Debug for JobOutput {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Target(t) => write!(f, "Target({})", t.location()),
            Self::Temp { location } => write!(f, "Temp({location})"),
        }
    }
}

/// Immutable description of one stage's work.
#[derive(Clone, Debug)]
pub struct Job {
    pub stage: StageId,
    pub label: String,
    pub inputs: Vec<JobInput>,
    pub shuffle: Option<ShuffleSpec>,
    pub reduce_chain: FnChain,
    pub output_type: PType,
    pub outputs: Vec<JobOutput>,
}

impl Job {
    #[must_use]
    pub fn kind(&self) -> JobKind {
        if self.shuffle.is_some() {
            JobKind::MapReduce
        } else {
            JobKind::MapOnly
        }
    }

    /// Where dependents read this job's output; falls back to the first target.
    #[must_use]
    pub fn output_location(&self) -> Option<String> {
        self.outputs
            .iter()
            .find(|o| matches!(o, JobOutput::Temp { .. }))
            .or_else(|| self.outputs.first())
            .map(JobOutput::location)
    }
}

/// Lower every stage of `plan`, in stage order.
pub fn assemble(plan: &StageGraph, sorted_shuffle: bool) -> Result<Vec<Job>, PlanningError> {
    plan.stages()
        .iter()
        .map(|s| assemble_stage(plan, s, sorted_shuffle))
        .collect()
}

fn node<'a>(plan: &'a StageGraph, stage: &Stage, id: NodeId) -> Result<&'a Node, PlanningError> {
    plan.graph()
        .get(id)
        .ok_or(PlanningError::DanglingReference {
            node: stage.root,
            missing: id,
        })
}

fn chain(plan: &StageGraph, stage: &Stage, ids: &[NodeId]) -> Result<FnChain, PlanningError> {
    let mut steps = Vec::new();
    for &id in ids {
        let n = node(plan, stage, id)?;
        let input_type = match n.inputs.first() {
            Some(i) => node(plan, stage, *i)?.ptype.clone(),
            None => n.ptype.clone(),
        };
        match &n.kind {
            NodeKind::ParallelDo(func) => steps.push(TransformStep::Do {
                name: n.name.clone(),
                func: Arc::clone(func),
                input_type,
                output_type: n.ptype.clone(),
            }),
            NodeKind::CombineValues(c) => steps.push(TransformStep::FoldGroups {
                name: n.name.clone(),
                combiner: Arc::clone(c),
                input_type,
                output_type: n.ptype.clone(),
            }),
            NodeKind::Union | NodeKind::Materialize => {}
            other => {
                return Err(PlanningError::InvalidNode {
                    node: id,
                    reason: format!("{} cannot be part of a function chain", other.tag()),
                });
            }
        }
    }
    Ok(FnChain { steps })
}

fn assemble_stage(plan: &StageGraph, stage: &Stage, sorted_shuffle: bool) -> Result<Job, PlanningError> {
    let mut inputs = Vec::with_capacity(stage.pipes.len());
    for pipe in &stage.pipes {
        let spec = match &pipe.input {
            StageInput::Source(id) => match &node(plan, stage, *id)?.kind {
                NodeKind::Source(s) => InputSpec::Source(Arc::clone(s)),
                other => {
                    return Err(PlanningError::InvalidNode {
                        node: *id,
                        reason: format!("{} read as a source", other.tag()),
                    });
                }
            },
            StageInput::Stage { node: id, location, .. } => InputSpec::Materialized {
                location: location.clone(),
                ptype: node(plan, stage, *id)?.ptype.clone(),
            },
        };
        inputs.push(JobInput {
            spec,
            map_chain: chain(plan, stage, &pipe.chain)?,
        });
    }

    let shuffle = match stage.shuffle {
        Some(sh) => {
            let gbk = node(plan, stage, sh.gbk)?;
            let Some((key_type, value_type)) = gbk.ptype.grouped_parts() else {
                return Err(PlanningError::InvalidNode {
                    node: sh.gbk,
                    reason: format!("shuffle output {} is not grouped", gbk.ptype),
                });
            };
            let combiner = match sh.combiner {
                Some(c) => match &node(plan, stage, c)?.kind {
                    NodeKind::CombineValues(f) => Some(Arc::clone(f)),
                    other => {
                        return Err(PlanningError::InvalidNode {
                            node: c,
                            reason: format!("{} used as a combiner", other.tag()),
                        });
                    }
                },
                None => None,
            };
            Some(ShuffleSpec {
                key_type,
                value_type,
                combiner,
                sorted: sorted_shuffle,
            })
        }
        None => None,
    };

    let outputs = stage
        .outputs
        .iter()
        .map(|o| match o {
            StageOutput::Target(t) => match &node(plan, stage, *t)?.kind {
                NodeKind::Target(target) => Ok(JobOutput::Target(Arc::clone(target))),
                other => Err(PlanningError::InvalidNode {
                    node: *t,
                    reason: format!("{} used as a target", other.tag()),
                }),
            },
            StageOutput::Temp { location, .. } => Ok(JobOutput::Temp {
                location: location.clone(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Job {
        stage: stage.id,
        label: stage.label.clone(),
        inputs,
        shuffle,
        reduce_chain: chain(plan, stage, &stage.post)?,
        output_type: node(plan, stage, stage.root)?.ptype.clone(),
        outputs,
    })
}
