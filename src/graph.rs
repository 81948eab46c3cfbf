//! Arena that owns every IR node.
//!
//! Nodes are keyed by [`NodeId`] and iterate in id (creation) order. Only
//! upstream edges are stored; downstream consumers are derived when needed,
//! so there are no back-references to keep consistent.

use crate::node::{Node, NodeKind};
use crate::node_id::NodeId;
use crate::types::PType;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    next_id: u64,
}

impl Graph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node and return its freshly allocated id.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        kind: NodeKind,
        inputs: Vec<NodeId>,
        ptype: PType,
    ) -> NodeId {
        let id = NodeId::new(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                id,
                name: name.into(),
                kind,
                inputs,
                ptype,
            },
        );
        id
    }

    /// Insert a fully formed node without any checking.
    ///
    /// The planner validates structure, so tests use this to build graphs
    /// with cycles or dangling edges that the collection API cannot express.
    pub fn push_unchecked(&mut self, node: Node) {
        self.next_id = self.next_id.max(node.id.raw() + 1);
        self.nodes.insert(node.id, node);
    }

    #[must_use]
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct consumers of every node, one entry per edge, in id order.
    #[must_use]
    pub fn consumers(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        let mut out: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
        for n in self.nodes.values() {
            for &i in &n.inputs {
                out.entry(i).or_default().push(n.id);
            }
        }
        out
    }

    /// Ids of `Target` and `Materialize` nodes: the roots liveness starts from.
    pub fn sinks(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .values()
            .filter(|n| matches!(n.kind, NodeKind::Target(_) | NodeKind::Materialize))
            .map(|n| n.id)
    }
}
