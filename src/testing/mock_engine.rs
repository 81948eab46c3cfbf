//! A scripted execution engine for coordinator tests.
//!
//! [`ScriptedEngine`] never runs a job. Each submitted job follows the
//! [`Script`] registered for its stage (default [`Script::Succeed`]) and the
//! engine records what the coordinator asked of it.

use crate::engine::{ExecutionEngine, JobHandle, JobStatus};
use crate::error::EngineError;
use crate::job::Job;
use crate::stage::StageId;
use crate::types::Capabilities;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What a stage's job does once submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Script {
    /// Succeeds on the first poll.
    Succeed,
    /// Reports `Running` for this many polls, then succeeds.
    SucceedAfter(u32),
    /// Fails on the first poll with this message.
    Fail(String),
    /// Runs until cancelled, then fails with `"cancelled"`.
    Hang,
    /// Rejected at submission.
    RejectSubmit,
}

struct Scripted {
    stage: StageId,
    script: Script,
    polls: u32,
    cancelled: bool,
    status: JobStatus,
    location: Option<String>,
}

#[derive(Default)]
struct Journal {
    scripts: HashMap<StageId, Script>,
    jobs: HashMap<JobHandle, Scripted>,
    next: u64,
    submitted: Vec<StageId>,
    cancelled: Vec<StageId>,
    completed: Vec<StageId>,
    released: Vec<StageId>,
    running: usize,
    max_running: usize,
}

pub struct ScriptedEngine {
    journal: Mutex<Journal>,
    key_requirements: Capabilities,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            journal: Mutex::new(Journal::default()),
            key_requirements: Capabilities::HASH_GROUPING,
        }
    }

    #[must_use]
    pub fn with_key_requirements(mut self, caps: Capabilities) -> Self {
        self.key_requirements = caps;
        self
    }

    #[must_use]
    pub fn script(self, stage: usize, script: Script) -> Self {
        self.lock().scripts.insert(StageId::new(stage), script);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stages in submission order.
    #[must_use]
    pub fn submitted(&self) -> Vec<StageId> {
        self.lock().submitted.clone()
    }

    /// Stages a cancellation was requested for, in request order.
    #[must_use]
    pub fn cancelled(&self) -> Vec<StageId> {
        self.lock().cancelled.clone()
    }

    /// Stages in the order they were observed to succeed.
    #[must_use]
    pub fn completed(&self) -> Vec<StageId> {
        self.lock().completed.clone()
    }

    /// Stages whose handle the coordinator released, in release order.
    #[must_use]
    pub fn released(&self) -> Vec<StageId> {
        self.lock().released.clone()
    }

    /// Most jobs that were non-terminal at the same time.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.lock().max_running
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn submit(&self, job: std::sync::Arc<Job>) -> Result<JobHandle, EngineError> {
        let mut j = self.lock();
        let script = j.scripts.get(&job.stage).cloned().unwrap_or(Script::Succeed);
        if script == Script::RejectSubmit {
            return Err(EngineError::Submit(format!("{} rejected by script", job.stage)));
        }
        j.next += 1;
        let handle = JobHandle::new(j.next);
        j.submitted.push(job.stage);
        j.running += 1;
        j.max_running = j.max_running.max(j.running);
        j.jobs.insert(
            handle,
            Scripted {
                stage: job.stage,
                script,
                polls: 0,
                cancelled: false,
                status: JobStatus::Running,
                location: job.output_location(),
            },
        );
        Ok(handle)
    }

    fn poll(&self, handle: JobHandle) -> Result<JobStatus, EngineError> {
        let mut j = self.lock();
        let job = j
            .jobs
            .get_mut(&handle)
            .ok_or(EngineError::UnknownHandle(handle.raw()))?;
        if job.status.is_terminal() {
            return Ok(job.status.clone());
        }
        job.polls += 1;
        let next = match &job.script {
            Script::Succeed => JobStatus::Succeeded,
            Script::SucceedAfter(n) if job.polls > *n => JobStatus::Succeeded,
            Script::SucceedAfter(_) => JobStatus::Running,
            Script::Fail(msg) => JobStatus::Failed(msg.clone()),
            Script::Hang if job.cancelled => JobStatus::Failed("cancelled".into()),
            Script::Hang | Script::RejectSubmit => JobStatus::Running,
        };
        job.status = next.clone();
        let stage = job.stage;
        if next.is_terminal() {
            j.running -= 1;
            if next == JobStatus::Succeeded {
                j.completed.push(stage);
            }
        }
        Ok(next)
    }

    fn output_location(&self, handle: JobHandle) -> Result<String, EngineError> {
        let j = self.lock();
        let job = j
            .jobs
            .get(&handle)
            .ok_or(EngineError::UnknownHandle(handle.raw()))?;
        if job.status != JobStatus::Succeeded {
            return Err(EngineError::NotFinished(handle.raw()));
        }
        job.location
            .clone()
            .ok_or(EngineError::NotFinished(handle.raw()))
    }

    fn cancel(&self, handle: JobHandle) {
        let mut j = self.lock();
        let stage = match j.jobs.get_mut(&handle) {
            Some(job) => {
                job.cancelled = true;
                job.stage
            }
            None => return,
        };
        j.cancelled.push(stage);
    }

    fn key_requirements(&self) -> Capabilities {
        self.key_requirements
    }

    fn release(&self, handle: JobHandle) {
        let mut j = self.lock();
        if let Some(stage) = j.jobs.get(&handle).map(|job| job.stage) {
            j.released.push(stage);
        }
    }
}
