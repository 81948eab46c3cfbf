//! Logical-to-physical planner.
//!
//! The planner turns a frozen [`Graph`] into a [`StageGraph`] in two passes:
//!
//! 1. **Fan-out analysis** -- restrict to live nodes (ancestors of targets and
//!    explicit materializations), count live consumers per node, and mark
//!    *materialization points*: nodes with two or more consumers, explicit
//!    `Materialize` nodes, and nodes that feed a target.
//! 2. **Stage partition** -- walk live nodes in topological order assigning
//!    each a phase (pre- or post-shuffle). A post-shuffle node that feeds
//!    another `GroupByKey` or a `Union` is promoted to a boundary so a stage
//!    never holds two shuffles. Every boundary then roots one stage, built by
//!    walking inputs back to the previous boundaries or sources.
//!
//! A boundary that is also the input of a shuffle ends its stage *before*
//! that shuffle. A `CombineValues` directly on its stage's own (non-boundary)
//! `GroupByKey` becomes the stage combiner; any other `CombineValues` runs as
//! a per-group fold.
//!
//! Sources are durable already: a shared source is read in place by every
//! consuming stage and only gets a copy stage when it is itself a target.

use crate::error::PlanningError;
use crate::graph::Graph;
use crate::node::NodeKind;
use crate::node_id::NodeId;
use crate::pipeline::TempLocations;
use crate::stage::{Pipe, ShufflePoint, Stage, StageGraph, StageId, StageInput, StageOutput};
use crate::types::Capabilities;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Pre,
    Post,
}

/// Plan `graph`, allocating temp locations for intermediates from `temps`.
///
/// `key_requirements` are the capabilities the execution engine needs from a
/// shuffle key; a `GroupByKey` whose key type lacks one is rejected.
pub fn plan(
    graph: &Graph,
    key_requirements: Capabilities,
    temps: &mut TempLocations,
) -> Result<StageGraph, PlanningError> {
    validate(graph)?;
    let order = topo_order(graph)?;
    check_keys(graph, key_requirements)?;

    let live = live_nodes(graph);
    let mut consumers: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for n in graph.iter().filter(|n| live.contains(&n.id)) {
        for &i in &n.inputs {
            consumers.entry(i).or_default().push(n.id);
        }
    }
    let consumers_of = |id: NodeId| consumers.get(&id).map_or(&[][..], Vec::as_slice);
    let is_target = |id: NodeId| matches!(graph.get(id).map(|n| &n.kind), Some(NodeKind::Target(_)));
    let targeted = |id: NodeId| consumers_of(id).iter().any(|c| is_target(*c));

    // Pass 1: fan-out analysis.
    let mut mat_points = BTreeSet::new();
    for &id in order.iter().filter(|id| live.contains(id)) {
        let Some(node) = graph.get(id) else { continue };
        if matches!(node.kind, NodeKind::Target(_)) {
            continue;
        }
        let fan_out = consumers_of(id).len();
        if fan_out >= 2 || matches!(node.kind, NodeKind::Materialize) || targeted(id) {
            debug!(node = %id, name = %node.name, fan_out, "materialization point");
            mat_points.insert(id);
        }
    }

    // Pass 2a: phases and induced boundaries.
    let mut boundary = mat_points.clone();
    let mut induced = BTreeSet::new();
    let mut phase: HashMap<NodeId, Phase> = HashMap::new();
    let mut fused = BTreeSet::new();
    let is_source = |id: NodeId| matches!(graph.get(id).map(|n| &n.kind), Some(NodeKind::Source(_)));

    for &id in order.iter().filter(|id| live.contains(id)) {
        let Some(node) = graph.get(id) else { continue };
        let eff = |i: NodeId, boundary: &BTreeSet<NodeId>| {
            if is_source(i) || boundary.contains(&i) {
                Phase::Pre
            } else {
                phase.get(&i).copied().unwrap_or(Phase::Pre)
            }
        };
        let p = match &node.kind {
            NodeKind::Target(_) => continue,
            NodeKind::Source(_) => Phase::Pre,
            NodeKind::ParallelDo(_) | NodeKind::Materialize => eff(node.inputs[0], &boundary),
            NodeKind::Union => {
                for &i in &node.inputs {
                    if eff(i, &boundary) == Phase::Post && boundary.insert(i) {
                        debug!(node = %i, "post-shuffle node feeds a union; persisting it");
                        induced.insert(i);
                    }
                }
                Phase::Pre
            }
            NodeKind::GroupByKey => {
                let i = node.inputs[0];
                if eff(i, &boundary) == Phase::Post && boundary.insert(i) {
                    debug!(node = %i, "post-shuffle node feeds a shuffle; persisting it");
                    induced.insert(i);
                }
                Phase::Post
            }
            NodeKind::CombineValues(_) => {
                let i = node.inputs[0];
                let on_own_gbk = matches!(graph.get(i).map(|n| &n.kind), Some(NodeKind::GroupByKey))
                    && !boundary.contains(&i);
                if on_own_gbk {
                    fused.insert(id);
                    Phase::Post
                } else {
                    eff(i, &boundary)
                }
            }
        };
        phase.insert(id, p);
    }

    // Pass 2b: one stage per boundary root.
    let topo_index: HashMap<NodeId, usize> =
        order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut stage_of_root: HashMap<NodeId, StageId> = HashMap::new();
    let mut stages: Vec<Stage> = Vec::new();

    for &root in order.iter().filter(|id| live.contains(id)) {
        if !boundary.contains(&root) || (is_source(root) && !targeted(root)) {
            continue;
        }
        let id = StageId::new(stages.len());
        let builder = StageBuilder {
            graph,
            root,
            boundary: &boundary,
            stage_of_root: &stage_of_root,
            stages: &stages,
        };

        let mut post = Vec::new();
        let mut shuffle = None;
        let mut pipes = Vec::new();
        if phase.get(&root) == Some(&Phase::Post) {
            let mut cur = root;
            loop {
                let node = builder.node(cur)?;
                match node.kind {
                    NodeKind::GroupByKey => {
                        let combiner = post.last().copied().filter(|c| fused.contains(c));
                        if combiner.is_some() {
                            post.pop();
                        }
                        shuffle = Some(ShufflePoint { gbk: cur, combiner });
                        builder.collect(node.inputs[0], Vec::new(), &mut pipes)?;
                        break;
                    }
                    NodeKind::ParallelDo(_) | NodeKind::Materialize | NodeKind::CombineValues(_) => {
                        post.push(cur);
                        cur = node.inputs[0];
                    }
                    _ => {
                        return Err(PlanningError::InvalidNode {
                            node: cur,
                            reason: format!("{} cannot follow a shuffle", node.kind.tag()),
                        });
                    }
                }
            }
            post.reverse();
        } else {
            builder.collect(root, Vec::new(), &mut pipes)?;
        }

        let mut deps: Vec<StageId> = pipes
            .iter()
            .filter_map(|p| match &p.input {
                StageInput::Stage { stage, .. } => Some(*stage),
                StageInput::Source(_) => None,
            })
            .collect();
        deps.sort();
        deps.dedup();

        let mut outputs: Vec<StageOutput> = consumers_of(root)
            .iter()
            .filter(|c| is_target(**c))
            .map(|c| StageOutput::Target(*c))
            .collect();
        let explicit = matches!(builder.node(root)?.kind, NodeKind::Materialize);
        let feeds_stages = consumers_of(root).iter().any(|c| !is_target(*c));
        if !is_source(root) && (explicit || feeds_stages) {
            outputs.push(StageOutput::Temp {
                location: temps.allocate(),
                explicit,
            });
        }

        let mut stage = Stage {
            id,
            label: String::new(),
            root,
            pipes,
            shuffle,
            post,
            outputs,
            deps,
        };
        let mut members: Vec<NodeId> = stage.nodes().into_iter().collect();
        members.sort_by_key(|n| topo_index.get(n).copied().unwrap_or(usize::MAX));
        stage.label = members
            .iter()
            .filter_map(|n| graph.get(*n))
            .filter(|n| !matches!(n.kind, NodeKind::Union))
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>()
            .join("+");
        debug!(
            stage = %id,
            label = %stage.label,
            pipes = stage.pipes.len(),
            shuffle = stage.shuffle.is_some(),
            deps = ?stage.deps,
            "planned stage"
        );
        stage_of_root.insert(root, id);
        stages.push(stage);
    }

    let plan = StageGraph::new(graph.clone(), stages, mat_points, induced);
    info!(
        stages = plan.len(),
        shuffles = plan.shuffle_count(),
        materialization_points = plan.materialization_points().len(),
        "plan complete"
    );
    Ok(plan)
}

struct StageBuilder<'a> {
    graph: &'a Graph,
    root: NodeId,
    boundary: &'a BTreeSet<NodeId>,
    stage_of_root: &'a HashMap<NodeId, StageId>,
    stages: &'a [Stage],
}

impl StageBuilder<'_> {
    fn node(&self, id: NodeId) -> Result<&crate::node::Node, PlanningError> {
        self.graph.get(id).ok_or(PlanningError::DanglingReference {
            node: self.root,
            missing: id,
        })
    }

    /// Walk from `n` back to the stage's leaf inputs, emitting one pipe per
    /// leaf. `suffix` holds the nodes already visited between `n` and the
    /// pre-shuffle root, in execution order.
    fn collect(&self, n: NodeId, suffix: Vec<NodeId>, out: &mut Vec<Pipe>) -> Result<(), PlanningError> {
        let node = self.node(n)?;
        if matches!(node.kind, NodeKind::Source(_)) {
            out.push(Pipe {
                input: StageInput::Source(n),
                chain: suffix,
            });
            return Ok(());
        }
        if n != self.root && self.boundary.contains(&n) {
            let location = self
                .stage_of_root
                .get(&n)
                .and_then(|s| self.stages.get(s.index()))
                .and_then(|s| s.temp_location().map(|l| (s.id, l.to_string())));
            let Some((stage, location)) = location else {
                return Err(PlanningError::InvalidNode {
                    node: n,
                    reason: "boundary has no persisted output".into(),
                });
            };
            out.push(Pipe {
                input: StageInput::Stage {
                    stage,
                    node: n,
                    location,
                },
                chain: suffix,
            });
            return Ok(());
        }
        let mut with_self = Vec::with_capacity(suffix.len() + 1);
        with_self.push(n);
        with_self.extend_from_slice(&suffix);
        match node.kind {
            NodeKind::Union => {
                for &i in &node.inputs {
                    self.collect(i, with_self.clone(), out)?;
                }
                Ok(())
            }
            NodeKind::ParallelDo(_) | NodeKind::Materialize | NodeKind::CombineValues(_) => {
                self.collect(node.inputs[0], with_self, out)
            }
            _ => Err(PlanningError::InvalidNode {
                node: n,
                reason: format!("{} found before a shuffle", node.kind.tag()),
            }),
        }
    }
}

fn validate(graph: &Graph) -> Result<(), PlanningError> {
    for node in graph.iter() {
        for &i in &node.inputs {
            if !graph.contains(i) {
                return Err(PlanningError::DanglingReference {
                    node: node.id,
                    missing: i,
                });
            }
        }
        let (min, max) = node.kind.arity();
        let n = node.inputs.len();
        if n < min || max.is_some_and(|m| n > m) {
            return Err(PlanningError::InvalidNode {
                node: node.id,
                reason: format!("{} with {n} inputs", node.kind.tag()),
            });
        }
        if matches!(node.kind, NodeKind::Target(_))
            && graph.iter().any(|c| c.inputs.contains(&node.id))
        {
            return Err(PlanningError::InvalidNode {
                node: node.id,
                reason: "a target cannot be consumed".into(),
            });
        }
    }
    Ok(())
}

/// Kahn's algorithm, smallest id first. Fails with the nodes left on cycles.
fn topo_order(graph: &Graph) -> Result<Vec<NodeId>, PlanningError> {
    let mut indegree: BTreeMap<NodeId, usize> =
        graph.iter().map(|n| (n.id, n.inputs.len())).collect();
    let consumers = graph.consumers();
    let mut ready: BTreeSet<NodeId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(graph.len());
    while let Some(id) = ready.pop_first() {
        order.push(id);
        for c in consumers.get(&id).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(c) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*c);
                }
            }
        }
    }
    if order.len() < graph.len() {
        let placed: BTreeSet<NodeId> = order.iter().copied().collect();
        let nodes: Vec<NodeId> = graph.ids().filter(|id| !placed.contains(id)).collect();
        return Err(PlanningError::Cycle { nodes });
    }
    Ok(order)
}

fn check_keys(graph: &Graph, required: Capabilities) -> Result<(), PlanningError> {
    for node in graph.iter() {
        match node.kind {
            NodeKind::GroupByKey => {
                let input = graph
                    .get(node.inputs[0])
                    .ok_or(PlanningError::DanglingReference {
                        node: node.id,
                        missing: node.inputs[0],
                    })?;
                let key = input.ptype.key_type().ok_or_else(|| PlanningError::InvalidNode {
                    node: node.id,
                    reason: format!("grouping non-pair input {}", input.ptype),
                })?;
                let missing = key.capabilities().missing(required);
                if !missing.is_empty() {
                    return Err(PlanningError::UnsupportedKey {
                        node: node.id,
                        key: key.to_string(),
                        missing: missing.join(", "),
                    });
                }
            }
            NodeKind::CombineValues(_) => {
                let grouped = graph
                    .get(node.inputs[0])
                    .and_then(|i| i.ptype.grouped_parts());
                if grouped.is_none() {
                    return Err(PlanningError::InvalidNode {
                        node: node.id,
                        reason: "combining ungrouped input".into(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn live_nodes(graph: &Graph) -> BTreeSet<NodeId> {
    let mut live = BTreeSet::new();
    let mut stack: Vec<NodeId> = graph.sinks().collect();
    while let Some(id) = stack.pop() {
        if live.insert(id)
            && let Some(node) = graph.get(id)
        {
            stack.extend(node.inputs.iter().copied());
        }
    }
    live
}
