//! Physical stages produced by the planner.
//!
//! A [`Stage`] is a single-rooted piece of the IR with at most one shuffle:
//!
//! ```text
//!   pipe 0: input ─ chain ─┐
//!   pipe 1: input ─ chain ─┼─ [shuffle (+combiner)] ─ post chain ─ root
//!   ...                    ┘
//! ```
//!
//! Pipes are the pre-shuffle half: one per leaf input as seen from the root,
//! each with the element-wise nodes on its path (unions on the path are
//! identities). The post-shuffle half is a linear chain. A [`StageGraph`]
//! holds stages in topological order; a stage only depends on stages with a
//! smaller id.

use crate::graph::Graph;
use crate::node::NodeKind;
use crate::node_id::NodeId;
use crate::types::PType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FormatResult};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct StageId(usize);

impl StageId {
    #[must_use]
    pub fn new(v: usize) -> Self {
        Self(v)
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl Display for StageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "s{}", self.0)
    }
}

/// Where a pipe reads from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageInput {
    /// Read a source node directly.
    Source(NodeId),
    /// Read the durable output another stage wrote for `node`.
    Stage {
        stage: StageId,
        node: NodeId,
        location: String,
    },
}

impl StageInput {
    /// The IR node whose output this input delivers.
    #[must_use]
    pub fn node(&self) -> NodeId {
        match self {
            Self::Source(n) | Self::Stage { node: n, .. } => *n,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pipe {
    pub input: StageInput,
    /// Nodes applied in order between the input and the shuffle (or root).
    pub chain: Vec<NodeId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShufflePoint {
    pub gbk: NodeId,
    /// A `CombineValues` applied on both sides of the shuffle.
    pub combiner: Option<NodeId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutput {
    Target(NodeId),
    Temp {
        location: String,
        /// Requested with `materialize`; kept after the run.
        explicit: bool,
    },
}

#[derive(Clone, Debug)]
pub struct Stage {
    pub id: StageId,
    pub label: String,
    /// Node whose output the stage produces.
    pub root: NodeId,
    pub pipes: Vec<Pipe>,
    pub shuffle: Option<ShufflePoint>,
    pub post: Vec<NodeId>,
    pub outputs: Vec<StageOutput>,
    /// Stages producing this stage's inputs, sorted and deduplicated.
    pub deps: Vec<StageId>,
}

impl Stage {
    #[must_use]
    pub fn is_map_only(&self) -> bool {
        self.shuffle.is_none()
    }

    /// Every IR node computed by this stage (inputs excluded, except a
    /// source the stage itself copies to its targets).
    #[must_use]
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        let mut out: BTreeSet<NodeId> = self
            .pipes
            .iter()
            .flat_map(|p| p.chain.iter().copied())
            .collect();
        if let Some(s) = &self.shuffle {
            out.insert(s.gbk);
            out.extend(s.combiner);
        }
        out.extend(self.post.iter().copied());
        out.insert(self.root);
        out
    }

    /// Temp location of the root's output, if it is consumed by later stages
    /// or explicitly materialized.
    #[must_use]
    pub fn temp_location(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| match o {
            StageOutput::Temp { location, .. } => Some(location.as_str()),
            StageOutput::Target(_) => None,
        })
    }
}

/// DAG of stages in topological order.
#[derive(Clone, Debug)]
pub struct StageGraph {
    graph: Graph,
    stages: Vec<Stage>,
    materialization_points: BTreeSet<NodeId>,
    induced: BTreeSet<NodeId>,
}

impl StageGraph {
    pub(crate) fn new(
        graph: Graph,
        stages: Vec<Stage>,
        materialization_points: BTreeSet<NodeId>,
        induced: BTreeSet<NodeId>,
    ) -> Self {
        Self {
            graph,
            stages,
            materialization_points,
            induced,
        }
    }

    /// The frozen IR this plan was built from.
    #[must_use]
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Nodes marked by fan-out analysis: shared, explicitly materialized or
    /// targeted. Shared sources are included; they are read in place.
    #[must_use]
    pub fn materialization_points(&self) -> Vec<NodeId> {
        self.materialization_points.iter().copied().collect()
    }

    /// Post-shuffle nodes that had to be persisted because they feed another
    /// shuffle or a union.
    #[must_use]
    pub fn induced_boundaries(&self) -> Vec<NodeId> {
        self.induced.iter().copied().collect()
    }

    #[must_use]
    pub fn shuffle_count(&self) -> usize {
        self.stages.iter().filter(|s| s.shuffle.is_some()).count()
    }

    /// Stage that computes `node`, if any.
    #[must_use]
    pub fn stage_of(&self, node: NodeId) -> Option<StageId> {
        self.stages
            .iter()
            .find(|s| s.nodes().contains(&node))
            .map(|s| s.id)
    }

    /// Location written for an explicit `materialize` node.
    #[must_use]
    pub fn materialized_location(&self, node: NodeId) -> Option<&str> {
        self.stages.iter().find(|s| s.root == node).and_then(|s| {
            s.outputs.iter().find_map(|o| match o {
                StageOutput::Temp {
                    location,
                    explicit: true,
                } => Some(location.as_str()),
                _ => None,
            })
        })
    }

    /// Direct dependents of each stage, indexed by stage id.
    #[must_use]
    pub fn dependents(&self) -> Vec<Vec<StageId>> {
        let mut out = vec![Vec::new(); self.stages.len()];
        for s in &self.stages {
            for d in &s.deps {
                out[d.0].push(s.id);
            }
        }
        out
    }

    /// Longest-path layering: a stage sits one layer after its deepest dependency.
    #[must_use]
    pub fn layers(&self) -> Vec<Vec<StageId>> {
        let mut depth = vec![0usize; self.stages.len()];
        let mut layers: Vec<Vec<StageId>> = Vec::new();
        for s in &self.stages {
            let d = s.deps.iter().map(|d| depth[d.0] + 1).max().unwrap_or(0);
            depth[s.id.0] = d;
            if layers.len() <= d {
                layers.resize_with(d + 1, Vec::new);
            }
            layers[d].push(s.id);
        }
        layers
    }

    fn name_of(&self, id: NodeId) -> String {
        self.graph
            .get(id)
            .map_or_else(|| id.to_string(), |n| n.name.clone())
    }

    fn ptype_of(&self, id: NodeId) -> Option<&PType> {
        self.graph.get(id).map(|n| &n.ptype)
    }

    /// Structured description of the plan; `Display` renders it as a report.
    #[must_use]
    pub fn explain(&self) -> PlanExplanation {
        let stages = self
            .stages
            .iter()
            .map(|s| {
                let inputs = s
                    .pipes
                    .iter()
                    .map(|p| {
                        let chain: Vec<String> = p
                            .chain
                            .iter()
                            .filter(|n| {
                                !matches!(self.graph.get(**n).map(|x| &x.kind), Some(NodeKind::Union))
                            })
                            .map(|n| self.name_of(*n))
                            .collect();
                        let from = match &p.input {
                            StageInput::Source(n) => format!("source {}", self.name_of(*n)),
                            StageInput::Stage { stage, location, .. } => {
                                format!("{stage} @ {location}")
                            }
                        };
                        if chain.is_empty() {
                            from
                        } else {
                            format!("{from} -> {}", chain.join(" -> "))
                        }
                    })
                    .collect();
                let shuffle = s.shuffle.map(|sh| {
                    let key = self
                        .ptype_of(sh.gbk)
                        .and_then(PType::key_type)
                        .map_or_else(String::new, |k| format!(" by {k}"));
                    match sh.combiner {
                        Some(c) => format!(
                            "{}{key} (combiner: {})",
                            self.name_of(sh.gbk),
                            self.name_of(c)
                        ),
                        None => format!("{}{key}", self.name_of(sh.gbk)),
                    }
                });
                let outputs = s
                    .outputs
                    .iter()
                    .map(|o| match o {
                        StageOutput::Target(t) => format!("target {}", self.name_of(*t)),
                        StageOutput::Temp { location, explicit } => {
                            if *explicit {
                                format!("materialized {location}")
                            } else {
                                format!("temp {location}")
                            }
                        }
                    })
                    .collect();
                ExplainStage {
                    id: s.id,
                    label: s.label.clone(),
                    map_only: s.is_map_only(),
                    inputs,
                    shuffle,
                    reduce: s.post.iter().map(|n| self.name_of(*n)).collect(),
                    outputs,
                    deps: s.deps.clone(),
                }
            })
            .collect();
        PlanExplanation {
            stages,
            shuffles: self.shuffle_count(),
            layers: self.layers().len(),
            materialization_points: self.materialization_points.len(),
            induced_boundaries: self.induced.len(),
        }
    }
}

/// One stage as shown by [`StageGraph::explain`].
#[derive(Debug, Clone)]
pub struct ExplainStage {
    pub id: StageId,
    pub label: String,
    pub map_only: bool,
    pub inputs: Vec<String>,
    pub shuffle: Option<String>,
    pub reduce: Vec<String>,
    pub outputs: Vec<String>,
    pub deps: Vec<StageId>,
}

#[derive(Debug, Clone)]
pub struct PlanExplanation {
    pub stages: Vec<ExplainStage>,
    pub shuffles: usize,
    pub layers: usize,
    pub materialization_points: usize,
    pub induced_boundaries: usize,
}

impl Display for PlanExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(
            f,
            "╔═══════════════════════════════════════════════════════════════╗"
        )?;
        writeln!(
            f,
            "║                     PHYSICAL STAGE PLAN                       ║"
        )?;
        writeln!(
            f,
            "╚═══════════════════════════════════════════════════════════════╝"
        )?;
        writeln!(f)?;

        writeln!(
            f,
            "┌─ SUMMARY ────────────────────────────────────────────────────┐"
        )?;
        writeln!(f, "│ Stages:            {:>10}", self.stages.len())?;
        writeln!(f, "│ Shuffles:          {:>10}", self.shuffles)?;
        writeln!(f, "│ Layers:            {:>10}", self.layers)?;
        writeln!(f, "│ Mat. Points:       {:>10}", self.materialization_points)?;
        writeln!(f, "│ Induced Bounds:    {:>10}", self.induced_boundaries)?;
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )?;
        writeln!(f)?;

        writeln!(
            f,
            "┌─ STAGES ─────────────────────────────────────────────────────┐"
        )?;
        for s in &self.stages {
            writeln!(f, "│")?;
            let kind = if s.map_only { "map-only" } else { "map-reduce" };
            writeln!(f, "│ [{}] {kind}: {}", s.id, s.label)?;
            for i in &s.inputs {
                writeln!(f, "│   in:      {i}")?;
            }
            if let Some(sh) = &s.shuffle {
                writeln!(f, "│   shuffle: {sh}")?;
            }
            if !s.reduce.is_empty() {
                writeln!(f, "│   reduce:  {}", s.reduce.join(" -> "))?;
            }
            for o in &s.outputs {
                writeln!(f, "│   out:     {o}")?;
            }
            if !s.deps.is_empty() {
                let deps: Vec<String> = s.deps.iter().map(ToString::to_string).collect();
                writeln!(f, "│   after:   {}", deps.join(", "))?;
            }
        }
        writeln!(f, "│")?;
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )
    }
}
