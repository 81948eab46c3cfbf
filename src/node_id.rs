//! Lightweight unique identifier for nodes within a [`Pipeline`](crate::pipeline::Pipeline).
//!
//! Each [`Node`](crate::node::Node) inserted into the graph is assigned a
//! sequential `NodeId`. Ids are never reused within a pipeline, so they double
//! as a stable creation order for deterministic planning.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Unique numeric identifier for a node in a pipeline graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// Create a `NodeId`. The pipeline allocates these; tests that build raw
    /// graphs may construct them directly.
    #[must_use]
    pub fn new(v: u64) -> Self {
        Self(v)
    }

    /// Return the underlying numeric value.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "n{}", self.0)
    }
}
