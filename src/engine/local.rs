//! In-process reference engine.
//!
//! Jobs run on a dedicated `rayon` pool. Each job:
//!
//! 1. reads its inputs (sources, or committed intermediates via
//!    [`storage`](super::storage)) and splits them into partitions;
//! 2. runs each input's map chain over the partitions in parallel;
//! 3. for map-reduce jobs, groups each partition by encoded key bytes,
//!    pre-aggregating with the combiner when there is one, then merges
//!    partitions key by key (hash order or key order for a sorted shuffle)
//!    and applies the combiner again reduce-side;
//! 4. runs the reduce chain, then commits: temp outputs first, then targets.
//!
//! A failed attempt is retried up to `max_attempts` times, unless it failed
//! after a target write already succeeded; targets are not transactional, so
//! that job fails instead of writing the same rows twice. Cancellation is a
//! flag checked between phases and partitions. Slots are kept until the
//! handle is released.

use super::{Counters, ExecutionEngine, JobHandle, JobStatus, storage};
use crate::combiners::CombineFn;
use crate::config::LocalEngineConfig;
use crate::error::EngineError;
use crate::job::{InputSpec, Job, JobOutput, ShuffleSpec};
use crate::types::Capabilities;
use crate::value::Value;
use anyhow::{Result, anyhow, bail};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

struct JobSlot {
    job: Arc<Job>,
    status: Mutex<JobStatus>,
    cancel: AtomicBool,
    counters: Mutex<Counters>,
}

impl JobSlot {
    fn set_status(&self, s: JobStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = s;
    }

    fn status(&self) -> JobStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            bail!("cancelled");
        }
        Ok(())
    }
}

pub struct LocalEngine {
    config: LocalEngineConfig,
    /// `None` falls back to the global rayon pool.
    pool: Option<ThreadPool>,
    jobs: Mutex<HashMap<JobHandle, Arc<JobSlot>>>,
    next: AtomicU64,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new(LocalEngineConfig::default())
    }
}

impl LocalEngine {
    #[must_use]
    pub fn new(config: LocalEngineConfig) -> Self {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("ironcrunch-{i}"));
        if let Some(n) = config.threads {
            builder = builder.num_threads(n.max(1));
        }
        let pool = match builder.build() {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(error = %e, "cannot start a dedicated pool; using the global rayon pool");
                None
            }
        };
        Self {
            config,
            pool,
            jobs: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &LocalEngineConfig {
        &self.config
    }

    /// Handles submitted and not yet released.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn slot(&self, handle: JobHandle) -> Result<Arc<JobSlot>, EngineError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle)
            .cloned()
            .ok_or(EngineError::UnknownHandle(handle.raw()))
    }
}

impl ExecutionEngine for LocalEngine {
    fn submit(&self, job: Arc<Job>) -> Result<JobHandle, EngineError> {
        let handle = JobHandle::new(self.next.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(JobSlot {
            job,
            status: Mutex::new(JobStatus::Pending),
            cancel: AtomicBool::new(false),
            counters: Mutex::new(Counters::new()),
        });
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, Arc::clone(&slot));

        let config = self.config.clone();
        let task = move || run_with_retries(&slot, &config, handle);
        match &self.pool {
            Some(pool) => pool.spawn(task),
            None => rayon::spawn(task),
        }
        Ok(handle)
    }

    fn poll(&self, handle: JobHandle) -> Result<JobStatus, EngineError> {
        Ok(self.slot(handle)?.status())
    }

    fn output_location(&self, handle: JobHandle) -> Result<String, EngineError> {
        let slot = self.slot(handle)?;
        if slot.status() != JobStatus::Succeeded {
            return Err(EngineError::NotFinished(handle.raw()));
        }
        slot.job
            .output_location()
            .ok_or(EngineError::NotFinished(handle.raw()))
    }

    fn cancel(&self, handle: JobHandle) {
        if let Ok(slot) = self.slot(handle) {
            debug!(%handle, "cancel requested");
            slot.cancel.store(true, Ordering::Relaxed);
        }
    }

    fn key_requirements(&self) -> Capabilities {
        Capabilities {
            ordering: self.config.sort_shuffle,
            ..Capabilities::HASH_GROUPING
        }
    }

    fn counters(&self, handle: JobHandle) -> Counters {
        self.slot(handle)
            .map(|s| {
                s.counters
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            })
            .unwrap_or_default()
    }

    fn release(&self, handle: JobHandle) {
        let removed = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);
        if removed.is_some() {
            debug!(%handle, "released");
        }
    }
}

/// Why an attempt did not succeed. `targets_written` counts target writes
/// that returned `Ok` before the error; such an attempt is never retried.
struct AttemptError {
    error: anyhow::Error,
    targets_written: usize,
}

impl From<anyhow::Error> for AttemptError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            error,
            targets_written: 0,
        }
    }
}

fn run_with_retries(slot: &JobSlot, config: &LocalEngineConfig, handle: JobHandle) {
    slot.set_status(JobStatus::Running);
    let attempts = config.max_attempts.max(1);
    for attempt in 1..=attempts {
        let mut counters = Counters::new();
        let outcome = compute(&slot.job, slot, config, &mut counters)
            .map_err(AttemptError::from)
            .and_then(|rows| commit(&slot.job, slot, &rows));
        match outcome {
            Ok(()) => {
                counters.insert("attempts".into(), attempt as u64);
                debug!(%handle, stage = %slot.job.stage, ?counters, "job succeeded");
                *slot.counters.lock().unwrap_or_else(PoisonError::into_inner) = counters;
                slot.set_status(JobStatus::Succeeded);
                return;
            }
            Err(AttemptError { error, targets_written }) => {
                let mut message = format!("{error:#}");
                let cancelled = slot.cancel.load(Ordering::Relaxed);
                if targets_written > 0 {
                    message = format!("{message} (after {targets_written} target write(s) committed; not retried)");
                }
                if cancelled || targets_written > 0 || attempt == attempts {
                    warn!(%handle, stage = %slot.job.stage, attempt, error = %message, "job failed");
                    counters.insert("attempts".into(), attempt as u64);
                    *slot.counters.lock().unwrap_or_else(PoisonError::into_inner) = counters;
                    slot.set_status(JobStatus::Failed(message));
                    return;
                }
                warn!(%handle, stage = %slot.job.stage, attempt, error = %message, "attempt failed; retrying");
            }
        }
    }
}

fn bump(counters: &mut Counters, name: &str, by: usize) {
    *counters.entry(name.to_string()).or_default() += by as u64;
}

fn partition(values: Vec<Value>, parts: usize) -> Vec<Vec<Value>> {
    let parts = parts.max(1);
    let chunk = values.len().div_ceil(parts).max(1);
    let mut out = Vec::with_capacity(parts);
    let mut it = values.into_iter().peekable();
    while it.peek().is_some() {
        out.push(it.by_ref().take(chunk).collect());
    }
    out
}

/// Map, shuffle and reduce. Has no side effects on the job's outputs.
fn compute(job: &Job, slot: &JobSlot, config: &LocalEngineConfig, counters: &mut Counters) -> Result<Vec<Value>> {
    // Map phase, one partition list per input, in input order.
    let mut mapped: Vec<Vec<Value>> = Vec::new();
    for input in &job.inputs {
        slot.cancelled()?;
        let values = match &input.spec {
            InputSpec::Source(s) => s.read()?,
            InputSpec::Materialized { location, ptype } => storage::read_records(location, ptype)?,
        };
        bump(counters, "records_read", values.len());
        let parts: Vec<Vec<Value>> = partition(values, config.partitions)
            .into_par_iter()
            .map(|part| {
                slot.cancelled()?;
                let mut out = Vec::with_capacity(part.len());
                for v in part {
                    out.extend(input.map_chain.apply(v)?);
                }
                Ok(out)
            })
            .collect::<Result<_>>()?;
        mapped.extend(parts);
    }
    bump(counters, "map_output", mapped.iter().map(Vec::len).sum());

    let rows = match &job.shuffle {
        None => mapped.into_iter().flatten().collect(),
        Some(spec) => {
            slot.cancelled()?;
            let rows = shuffle(spec, mapped, counters)?;
            slot.cancelled()?;
            let reduced: Vec<Vec<Value>> = partition(rows, config.partitions)
                .into_par_iter()
                .map(|part| {
                    let mut out = Vec::with_capacity(part.len());
                    for v in part {
                        out.extend(job.reduce_chain.apply(v)?);
                    }
                    Ok(out)
                })
                .collect::<Result<_>>()?;
            reduced.into_iter().flatten().collect::<Vec<_>>()
        }
    };
    bump(counters, "records_written", rows.len());

    Ok(rows)
}

/// Write `rows` to every output. Temp outputs go first: they commit
/// atomically, so a failed temp write leaves nothing behind to duplicate.
fn commit(job: &Job, slot: &JobSlot, rows: &[Value]) -> Result<(), AttemptError> {
    slot.cancelled()?;
    for output in &job.outputs {
        if let JobOutput::Temp { location } = output {
            storage::write_records(location, &job.output_type, rows)?;
        }
    }
    let mut targets_written = 0;
    for output in &job.outputs {
        if let JobOutput::Target(t) = output {
            t.write(rows.to_vec()).map_err(|error| AttemptError { error, targets_written })?;
            targets_written += 1;
        }
    }
    Ok(())
}

/// Per-key state inside one partition: the decoded key plus either the
/// running combined value or every value seen.
enum Group {
    Combined(Value, Value),
    Listed(Value, Vec<Value>),
}

fn local_groups(
    spec: &ShuffleSpec,
    part: Vec<Value>,
) -> Result<HashMap<Vec<u8>, Group>> {
    let mut groups: HashMap<Vec<u8>, Group> = HashMap::new();
    for row in part {
        let (k, v) = row
            .into_pair()
            .map_err(|v| anyhow!("shuffle input must be a pair, got {}", v.kind_name()))?;
        let bytes = spec.key_type.encode(&k)?;
        match (groups.remove(&bytes), &spec.combiner) {
            (None, Some(_)) => {
                groups.insert(bytes, Group::Combined(k, v));
            }
            (None, None) => {
                groups.insert(bytes, Group::Listed(k, vec![v]));
            }
            (Some(Group::Combined(k0, acc)), Some(c)) => {
                groups.insert(bytes, Group::Combined(k0, c.combine(acc, v)?));
            }
            (Some(Group::Listed(k0, mut vs)), _) => {
                vs.push(v);
                groups.insert(bytes, Group::Listed(k0, vs));
            }
            (Some(Group::Combined(..)), None) => bail!("combined group without a combiner"),
        }
    }
    Ok(groups)
}

fn merge(c: Option<&dyn CombineFn>, into: Group, from: Group) -> Result<Group> {
    match (into, from, c) {
        (Group::Combined(k, a), Group::Combined(_, b), Some(c)) => Ok(Group::Combined(k, c.combine(a, b)?)),
        (Group::Listed(k, mut a), Group::Listed(_, b), _) => {
            a.extend(b);
            Ok(Group::Listed(k, a))
        }
        _ => bail!("inconsistent shuffle groups"),
    }
}

fn shuffle(spec: &ShuffleSpec, mapped: Vec<Vec<Value>>, counters: &mut Counters) -> Result<Vec<Value>> {
    let local: Vec<HashMap<Vec<u8>, Group>> = mapped
        .into_par_iter()
        .map(|part| local_groups(spec, part))
        .collect::<Result<_>>()?;
    bump(counters, "map_side_groups", local.iter().map(HashMap::len).sum());

    // Merge in partition order so value order within a group is stable.
    let mut merged: BTreeMap<Vec<u8>, Group> = BTreeMap::new();
    for part in local {
        let mut entries: Vec<(Vec<u8>, Group)> = part.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        for (bytes, g) in entries {
            let g = match merged.remove(&bytes) {
                Some(prev) => merge(spec.combiner.as_deref(), prev, g)?,
                None => g,
            };
            merged.insert(bytes, g);
        }
    }
    bump(counters, "shuffle_groups", merged.len());

    let mut rows: Vec<(Value, Value)> = merged
        .into_values()
        .map(|g| match g {
            Group::Combined(k, v) => (k, v),
            Group::Listed(k, vs) => (k, Value::Collection(vs)),
        })
        .collect();
    if spec.sorted {
        rows.sort_by(|a, b| spec.key_type.compare(&a.0, &b.0));
    }
    Ok(rows.into_iter().map(|(k, v)| Value::pair(k, v)).collect())
}
