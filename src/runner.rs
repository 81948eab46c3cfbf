//! Execution coordinator.
//!
//! [`Runner`] drives a planned run to completion. It keeps a dependency
//! counter per stage, submits every stage whose counter reaches zero (bounded
//! by `max_in_flight`), and polls outstanding handles without blocking on any
//! single one, so independent branches overlap.
//!
//! On the first stage that reports `Failed`, every other in-flight stage gets
//! a cancellation request, nothing else is submitted, and the run fails with
//! [`PipelineError::JobFailure`] naming that stage. Outputs already written
//! are left in place.

use crate::config::PipelineConfig;
use crate::engine::{Counters, ExecutionEngine, JobHandle, JobStatus};
use crate::error::{PipelineError, StageFailure};
use crate::job::Job;
use crate::stage::{StageGraph, StageId};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one succeeded stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageId,
    pub label: String,
    pub status: JobStatus,
    pub location: Option<String>,
    pub counters: Counters,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunReport {
    /// Per-stage results in completion order.
    pub stages: Vec<StageReport>,
    /// Topological layers of the stage graph.
    pub layers: Vec<Vec<StageId>>,
}

impl RunReport {
    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == id)
    }

    /// Stage ids in the order they completed.
    #[must_use]
    pub fn completion_order(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.stage).collect()
    }
}

struct InFlight {
    stage: StageId,
    handle: JobHandle,
    started: Instant,
}

pub struct Runner<'a> {
    engine: &'a dyn ExecutionEngine,
    config: &'a PipelineConfig,
}

impl<'a> Runner<'a> {
    #[must_use]
    pub fn new(engine: &'a dyn ExecutionEngine, config: &'a PipelineConfig) -> Self {
        Self { engine, config }
    }

    /// Run every stage of `plan`; `jobs[i]` is the job of stage `i`.
    pub fn execute(&self, plan: &StageGraph, jobs: &[Arc<Job>]) -> Result<RunReport, PipelineError> {
        let n = plan.len();
        let dependents = plan.dependents();
        let mut waiting: Vec<usize> = plan.stages().iter().map(|s| s.deps.len()).collect();
        let mut ready: BTreeSet<StageId> = plan
            .stages()
            .iter()
            .filter(|s| s.deps.is_empty())
            .map(|s| s.id)
            .collect();
        let mut in_flight: Vec<InFlight> = Vec::new();
        let mut reports = Vec::with_capacity(n);
        let max_in_flight = self.config.max_in_flight.max(1);
        let layers = plan.layers();
        info!(stages = n, layers = layers.len(), max_in_flight, "executing plan");

        while reports.len() < n {
            while in_flight.len() < max_in_flight
                && let Some(stage) = ready.pop_first()
            {
                let Some(job) = jobs.get(stage.index()) else {
                    return Err(self.fail(stage, plan, "no job assembled for stage".into(), &in_flight));
                };
                match self.engine.submit(Arc::clone(job)) {
                    Ok(handle) => {
                        debug!(%stage, %handle, label = %job.label, "stage submitted");
                        in_flight.push(InFlight {
                            stage,
                            handle,
                            started: Instant::now(),
                        });
                    }
                    Err(e) => return Err(self.fail(stage, plan, e.to_string(), &in_flight)),
                }
            }

            if in_flight.is_empty() {
                // Nothing running and nothing ready: the remaining stages can
                // never become eligible.
                let stuck = (0..n)
                    .map(StageId::new)
                    .find(|s| !reports.iter().any(|r: &StageReport| r.stage == *s))
                    .unwrap_or_else(|| StageId::new(0));
                return Err(self.fail(stuck, plan, "stage dependencies can never be satisfied".into(), &in_flight));
            }

            let mut progressed = false;
            let mut i = 0;
            while i < in_flight.len() {
                let f = &in_flight[i];
                let status = match self.engine.poll(f.handle) {
                    Ok(s) => s,
                    Err(e) => JobStatus::Failed(e.to_string()),
                };
                match status {
                    JobStatus::Succeeded => {
                        let f = in_flight.swap_remove(i);
                        progressed = true;
                        let elapsed = f.started.elapsed();
                        let label = plan.stage(f.stage).map(|s| s.label.clone()).unwrap_or_default();
                        debug!(stage = %f.stage, ?elapsed, "stage succeeded");
                        reports.push(StageReport {
                            stage: f.stage,
                            label,
                            status: JobStatus::Succeeded,
                            location: self.engine.output_location(f.handle).ok(),
                            counters: self.engine.counters(f.handle),
                            elapsed,
                        });
                        self.engine.release(f.handle);
                        for d in dependents.get(f.stage.index()).into_iter().flatten() {
                            waiting[d.index()] -= 1;
                            if waiting[d.index()] == 0 {
                                ready.insert(*d);
                            }
                        }
                    }
                    JobStatus::Failed(message) => {
                        let f = in_flight.swap_remove(i);
                        self.engine.release(f.handle);
                        return Err(self.fail(f.stage, plan, message, &in_flight));
                    }
                    JobStatus::Pending | JobStatus::Running => i += 1,
                }
            }

            if !progressed {
                thread::sleep(self.config.poll_interval);
            }
        }

        info!(stages = reports.len(), "all stages succeeded");
        Ok(RunReport {
            stages: reports,
            layers,
        })
    }

    /// Cancel everything still in flight and describe the failure.
    fn fail(&self, stage: StageId, plan: &StageGraph, message: String, in_flight: &[InFlight]) -> PipelineError {
        let label = plan.stage(stage).map(|s| s.label.clone()).unwrap_or_default();
        warn!(%stage, %label, error = %message, "stage failed; cancelling in-flight stages");
        let mut cancelled = Vec::with_capacity(in_flight.len());
        for f in in_flight {
            warn!(stage = %f.stage, handle = %f.handle, cause = %stage, "cancelling");
            self.engine.cancel(f.handle);
            self.engine.release(f.handle);
            cancelled.push(f.stage);
        }
        cancelled.sort();
        PipelineError::JobFailure(StageFailure {
            stage,
            label,
            message,
            cancelled,
        })
    }
}
