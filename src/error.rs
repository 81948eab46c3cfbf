//! Error taxonomy.
//!
//! Graph construction and planning problems are programming errors and are
//! reported eagerly. Job failures come from the execution engine after its own
//! retry budget is spent; cancellations are reported separately so callers can
//! tell "this failed" from "this was aborted because something else failed".
//!
//! [`PipelineError`] is `Clone` so a finished run can hand back the same
//! outcome on every later `run()` call.

use crate::NodeId;
use crate::stage::StageId;
use crate::types::Family;
use thiserror::Error;

/// Raised synchronously while building the IR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphConstructionError {
    #[error("type mismatch on edge into `{node}`: expected {expected}, found {found}")]
    TypeMismatch {
        node: String,
        expected: String,
        found: String,
    },

    #[error("cannot combine a {left} type with a {right} type")]
    MixedFamilies { left: Family, right: Family },

    #[error("`{node}` needs a pair or table input, found {found}")]
    NotATable { node: String, found: String },

    #[error("`{node}` needs grouped input (table of key to collection), found {found}")]
    NotGrouped { node: String, found: String },

    #[error("key type {key} of `{node}` does not support {missing}")]
    UnsupportedKey {
        node: String,
        key: String,
        missing: String,
    },

    #[error("union needs at least one input")]
    EmptyUnion,

    #[error("collection `{node}` belongs to a different pipeline")]
    ForeignCollection { node: String },

    #[error("pipeline is frozen after planning; cannot add `{node}`")]
    Frozen { node: String },
}

/// Structural violation found while planning a frozen IR.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("cycle detected through nodes {nodes:?}")]
    Cycle { nodes: Vec<NodeId> },

    #[error("node {node} references missing node {missing}")]
    DanglingReference { node: NodeId, missing: NodeId },

    #[error("node {node} has an invalid shape: {reason}")]
    InvalidNode { node: NodeId, reason: String },

    #[error("grouping key {key} at node {node} does not support {missing} required by the engine")]
    UnsupportedKey {
        node: NodeId,
        key: String,
        missing: String,
    },
}

/// Encoding or decoding an element through a family codec failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("value of kind {found} does not conform to {expected}")]
    Mismatch { expected: String, found: String },

    #[error("malformed {family} data: {reason}")]
    Malformed { family: Family, reason: String },

    #[error("{0}")]
    Unencodable(String),
}

/// Failure reported by an execution engine outside of a job's own run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("submit failed: {0}")]
    Submit(String),

    #[error("unknown job handle {0}")]
    UnknownHandle(u64),

    #[error("job {0} has not succeeded; no output location yet")]
    NotFinished(u64),

    #[error("storage error: {0}")]
    Storage(String),
}

/// The first stage that ultimately failed, plus what was aborted because of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: StageId,
    /// Human-readable stage label (names of the fused transforms).
    pub label: String,
    /// Underlying engine error message.
    pub message: String,
    /// Stages that were in flight and received a cancellation request.
    pub cancelled: Vec<StageId>,
}

/// Overall outcome of `Pipeline::run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Construction(#[from] GraphConstructionError),

    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error("stage {} ({}) failed: {}", .0.stage, .0.label, .0.message)]
    JobFailure(StageFailure),

    #[error("stage {stage} was cancelled after stage {cause} failed")]
    Cancelled { stage: StageId, cause: StageId },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("node {node} is not an explicit materialization of a successful run")]
    NotMaterialized { node: NodeId },
}

impl StageFailure {
    /// One [`PipelineError::Cancelled`] per stage aborted by this failure.
    #[must_use]
    pub fn cancellations(&self) -> Vec<PipelineError> {
        self.cancelled
            .iter()
            .map(|s| PipelineError::Cancelled {
                stage: *s,
                cause: self.stage,
            })
            .collect()
    }
}

impl PipelineError {
    /// The stage a job failure originated from, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageId> {
        match self {
            Self::JobFailure(f) => Some(f.stage),
            Self::Cancelled { cause, .. } => Some(*cause),
            _ => None,
        }
    }
}
