//! Execution engine interface.
//!
//! The coordinator only talks to an engine through [`ExecutionEngine`]:
//! submit a [`Job`], poll its handle until it is terminal, ask where it wrote
//! its output, and request best-effort cancellation. Retrying failed tasks is
//! the engine's business; by the time `poll` reports
//! [`JobStatus::Failed`], the engine's own retry budget is spent.

pub mod local;
pub mod storage;

pub use local::LocalEngine;

use crate::error::EngineError;
use crate::job::Job;
use crate::types::{Capabilities, PType};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;

/// Named per-job counters (records read, written, groups, attempts...).
pub type Counters = BTreeMap<String, u64>;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
pub struct JobHandle(u64);

impl JobHandle {
    #[must_use]
    pub fn new(v: u64) -> Self {
        Self(v)
    }

    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Display for JobHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "job-{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

pub trait ExecutionEngine: Send + Sync {
    fn submit(&self, job: Arc<Job>) -> Result<JobHandle, EngineError>;

    fn poll(&self, handle: JobHandle) -> Result<JobStatus, EngineError>;

    /// Valid only once the job has succeeded.
    fn output_location(&self, handle: JobHandle) -> Result<String, EngineError>;

    /// Best-effort and asynchronous: the job may still finish or leave
    /// partial output behind.
    fn cancel(&self, handle: JobHandle);

    /// What a shuffle key type must support on this engine.
    fn key_requirements(&self) -> Capabilities {
        Capabilities::HASH_GROUPING
    }

    /// Read a committed intermediate written by one of this engine's jobs.
    fn read_output(&self, location: &str, ptype: &PType) -> Result<Vec<Value>, EngineError> {
        storage::read_records(location, ptype).map_err(|e| EngineError::Storage(format!("{e:#}")))
    }

    fn counters(&self, _handle: JobHandle) -> Counters {
        Counters::new()
    }

    /// The caller is done with `handle`. An engine may forget a released
    /// job; later calls with the handle can then report
    /// [`EngineError::UnknownHandle`]. Releasing a job that is still running
    /// does not stop it.
    fn release(&self, _handle: JobHandle) {}
}
