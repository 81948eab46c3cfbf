//! Pipeline handle and per-run state.
//!
//! A [`Pipeline`] is a cheap, clonable handle to one *pipeline run*: the IR
//! under construction, the temp-location counter, and, once triggered, the
//! plan and the cached outcome. Building the IR performs no data processing.
//! The first [`plan`](Pipeline::plan) or [`run`](Pipeline::run) freezes the
//! graph; later mutations fail with
//! [`GraphConstructionError::Frozen`].
//!
//! Lifecycle: `Building -> Planned -> Running -> {Done, Failed}`. Both
//! triggers are idempotent: a second `plan()` returns the same plan and a
//! second `run()` returns the cached outcome without submitting anything.

use crate::collection::PCollection;
use crate::config::{LocalEngineConfig, PipelineConfig};
use crate::engine::{ExecutionEngine, LocalEngine, storage};
use crate::error::{EngineError, GraphConstructionError, PipelineError};
use crate::graph::Graph;
use crate::io::{Source, Target};
use crate::job::{self, Job};
use crate::node::NodeKind;
use crate::node_id::NodeId;
use crate::planner;
use crate::runner::{RunReport, Runner};
use crate::stage::{StageGraph, StageOutput};
use crate::types::PType;
use crate::value::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Lifecycle state of a pipeline run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunState {
    Building,
    Planned,
    Running,
    Done,
    Failed,
}

/// Deterministic temp locations `<dir>/p<N>` for one run.
#[derive(Clone, Debug)]
pub struct TempLocations {
    dir: PathBuf,
    next: u64,
}

impl TempLocations {
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            next: 0,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of locations handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next
    }

    pub fn allocate(&mut self) -> String {
        let loc = self.dir.join(format!("p{}", self.next));
        self.next += 1;
        loc.display().to_string()
    }
}

/// Plan plus assembled jobs, produced once per run.
#[derive(Clone)]
pub struct Planned {
    pub stages: Arc<StageGraph>,
    pub jobs: Arc<Vec<Arc<Job>>>,
}

pub(crate) struct PipelineInner {
    pub(crate) graph: Graph,
    pub(crate) state: RunState,
    temps: Option<TempLocations>,
    planned: Option<Planned>,
    plan_error: Option<PipelineError>,
    outcome: Option<Result<RunReport, PipelineError>>,
}

#[derive(Clone)]
pub struct Pipeline {
    pub(crate) inner: Arc<Mutex<PipelineInner>>,
    engine: Arc<dyn ExecutionEngine>,
    config: Arc<PipelineConfig>,
    run_gate: Arc<Mutex<()>>,
}

impl Default for Pipeline {
    /// A pipeline on a [`LocalEngine`] with default settings.
    fn default() -> Self {
        Self::local(LocalEngineConfig::default(), PipelineConfig::default())
    }
}

impl Pipeline {
    pub fn new(engine: Arc<dyn ExecutionEngine>, config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PipelineInner {
                graph: Graph::new(),
                state: RunState::Building,
                temps: None,
                planned: None,
                plan_error: None,
                outcome: None,
            })),
            engine,
            config: Arc::new(config),
            run_gate: Arc::new(Mutex::new(())),
        }
    }

    /// A pipeline on a fresh [`LocalEngine`].
    #[must_use]
    pub fn local(engine: LocalEngineConfig, config: PipelineConfig) -> Self {
        Self::new(Arc::new(LocalEngine::new(engine)), config)
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PipelineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.lock().state
    }

    /// A copy of the IR as built so far.
    #[must_use]
    pub fn graph(&self) -> Graph {
        self.lock().graph.clone()
    }

    pub(crate) fn same_run(&self, other: &Pipeline) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn add_node(
        &self,
        name: &str,
        kind: NodeKind,
        inputs: Vec<NodeId>,
        ptype: PType,
    ) -> Result<NodeId, GraphConstructionError> {
        let mut g = self.lock();
        if g.state != RunState::Building {
            return Err(GraphConstructionError::Frozen {
                node: name.to_string(),
            });
        }
        Ok(g.graph.add(name, kind, inputs, ptype))
    }

    /// Wrap `source` as a collection of its declared type.
    pub fn read(&self, source: impl Source + 'static) -> Result<PCollection, GraphConstructionError> {
        let ptype = source.ptype();
        let name = source.describe();
        let id = self.add_node(&name, NodeKind::Source(Arc::new(source)), Vec::new(), ptype.clone())?;
        Ok(PCollection::new(self.clone(), id, ptype))
    }

    /// Concatenate collections of identical type. Order is unspecified.
    pub fn union(&self, inputs: &[&PCollection]) -> Result<PCollection, GraphConstructionError> {
        let Some(first) = inputs.first() else {
            return Err(GraphConstructionError::EmptyUnion);
        };
        for c in inputs {
            if !self.same_run(c.pipeline()) {
                return Err(GraphConstructionError::ForeignCollection {
                    node: "union".into(),
                });
            }
            if c.ptype() != first.ptype() {
                return Err(GraphConstructionError::TypeMismatch {
                    node: "union".into(),
                    expected: first.ptype().to_string(),
                    found: c.ptype().to_string(),
                });
            }
        }
        let ids = inputs.iter().map(|c| c.id()).collect();
        let ptype = first.ptype().clone();
        let id = self.add_node("union", NodeKind::Union, ids, ptype.clone())?;
        Ok(PCollection::new(self.clone(), id, ptype))
    }

    /// Register `target` as a terminal output of `coll`.
    pub fn write(
        &self,
        coll: &PCollection,
        target: impl Target + 'static,
    ) -> Result<(), GraphConstructionError> {
        if !self.same_run(coll.pipeline()) {
            return Err(GraphConstructionError::ForeignCollection {
                node: target.location(),
            });
        }
        let declared = target.ptype();
        if !declared.same_logical(coll.ptype()) {
            return Err(GraphConstructionError::TypeMismatch {
                node: target.location(),
                expected: declared.to_string(),
                found: coll.ptype().to_string(),
            });
        }
        let name = format!("write:{}", target.location());
        self.add_node(
            &name,
            NodeKind::Target(Arc::new(target)),
            vec![coll.id()],
            coll.ptype().clone(),
        )?;
        Ok(())
    }

    /// Freeze the IR and produce the stage plan. Idempotent.
    pub fn plan(&self) -> Result<Arc<StageGraph>, PipelineError> {
        self.planned().map(|p| p.stages)
    }

    /// The assembled jobs, one per stage, in stage order.
    pub fn jobs(&self) -> Result<Arc<Vec<Arc<Job>>>, PipelineError> {
        self.planned().map(|p| p.jobs)
    }

    fn planned(&self) -> Result<Planned, PipelineError> {
        let mut g = self.lock();
        if let Some(p) = &g.planned {
            return Ok(p.clone());
        }
        if let Some(e) = &g.plan_error {
            return Err(e.clone());
        }
        let result = self.plan_locked(&mut g);
        match &result {
            Ok(p) => {
                g.planned = Some(p.clone());
                g.state = RunState::Planned;
            }
            Err(e) => {
                g.plan_error = Some(e.clone());
                g.state = RunState::Failed;
            }
        }
        result
    }

    fn plan_locked(&self, g: &mut PipelineInner) -> Result<Planned, PipelineError> {
        let dir = create_run_dir(&self.config.temp_root)?;
        let mut temps = TempLocations::new(&dir);
        let requirements = self.engine.key_requirements();
        let stages = planner::plan(&g.graph, requirements, &mut temps)?;
        let jobs = job::assemble(&stages, requirements.ordering)?;
        debug!(dir = %dir.display(), temps = temps.issued(), "run directory prepared");
        g.temps = Some(temps);
        Ok(Planned {
            stages: Arc::new(stages),
            jobs: Arc::new(jobs.into_iter().map(Arc::new).collect()),
        })
    }

    /// Plan if needed, then execute every stage and block until the run is
    /// done or has failed. Repeated calls return the cached outcome.
    pub fn run(&self) -> Result<RunReport, PipelineError> {
        let _gate = self.run_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(outcome) = &self.lock().outcome {
            debug!("run already finished; returning cached outcome");
            return outcome.clone();
        }

        let planned = match self.planned() {
            Ok(p) => p,
            Err(e) => {
                self.lock().outcome = Some(Err(e.clone()));
                return Err(e);
            }
        };
        self.lock().state = RunState::Running;
        info!(stages = planned.stages.len(), "pipeline run started");

        let runner = Runner::new(self.engine.as_ref(), &self.config);
        let outcome = runner.execute(&planned.stages, &planned.jobs);

        let mut g = self.lock();
        match &outcome {
            Ok(report) => {
                g.state = RunState::Done;
                info!(stages = report.stages.len(), "pipeline run done");
                if self.config.cleanup_intermediates
                    && let Some(temps) = &g.temps
                {
                    cleanup_intermediates(temps.dir(), &planned.stages);
                }
            }
            Err(e) => {
                g.state = RunState::Failed;
                warn!(error = %e, "pipeline run failed; intermediates kept for inspection");
            }
        }
        g.outcome = Some(outcome.clone());
        outcome
    }

    /// Read back an explicitly materialized collection after a successful run.
    pub fn read_materialized(&self, coll: &PCollection) -> Result<Vec<Value>, PipelineError> {
        let not_materialized = || PipelineError::NotMaterialized { node: coll.id() };
        let planned = {
            let g = self.lock();
            if g.state != RunState::Done || !self.same_run(coll.pipeline()) {
                return Err(not_materialized());
            }
            g.planned.clone().ok_or_else(not_materialized)?
        };
        let location = planned
            .stages
            .materialized_location(coll.id())
            .ok_or_else(not_materialized)?;
        Ok(self.engine.read_output(location, coll.ptype())?)
    }

    /// Scratch directory of this run, once planned.
    #[must_use]
    pub fn run_dir(&self) -> Option<PathBuf> {
        self.lock().temps.as_ref().map(|t| t.dir().to_path_buf())
    }
}

fn create_run_dir(root: &Path) -> Result<PathBuf, EngineError> {
    fs::create_dir_all(root)
        .map_err(|e| EngineError::Storage(format!("mkdir -p {}: {e}", root.display())))?;
    let dir = tempfile::Builder::new()
        .prefix("ironcrunch-")
        .tempdir_in(root)
        .map_err(|e| EngineError::Storage(format!("create run dir in {}: {e}", root.display())))?;
    Ok(dir.keep())
}

/// Remove every `p*` file of the run except explicit materializations.
fn cleanup_intermediates(dir: &Path, plan: &StageGraph) {
    let keep: Vec<&str> = plan
        .stages()
        .iter()
        .flat_map(|s| s.outputs.iter())
        .filter_map(|o| match o {
            StageOutput::Temp {
                location,
                explicit: true,
            } => Some(location.as_str()),
            _ => None,
        })
        .collect();
    let pattern = format!("{}/p*", glob::Pattern::escape(&dir.display().to_string()));
    let Ok(paths) = glob::glob(&pattern) else {
        warn!(%pattern, "invalid cleanup pattern");
        return;
    };
    // A leftover `<loc>.partial` names the same location as `<loc>`.
    let locations: BTreeSet<String> = paths
        .flatten()
        .map(|path| {
            let s = path.display().to_string();
            s.strip_suffix(".partial").unwrap_or(&s).to_string()
        })
        .filter(|loc| !keep.contains(&loc.as_str()))
        .collect();
    let mut removed = 0usize;
    for location in &locations {
        match storage::remove(location) {
            Ok(()) => removed += 1,
            Err(e) => warn!(%location, error = %e, "failed to remove intermediate"),
        }
    }
    if keep.is_empty() {
        let _ = fs::remove_dir(dir);
    }
    debug!(removed, "intermediates cleaned up");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemSource, MemTarget};
    use crate::testing::TestPipeline;
    use crate::types::Family;

    #[test]
    fn cleanup_sweeps_leftover_partial_writes() -> anyhow::Result<()> {
        let p = TestPipeline::new()?;
        let f = Family::Binary;
        let shared = p.read(MemSource::new(f.strings(), ["a"]))?.map("shared", f.strings(), Ok)?;
        shared.materialize()?;
        shared
            .map("after", f.strings(), Ok)?
            .write(MemTarget::new("out", f.strings()))?;
        let plan = p.plan()?;
        let dir = p.run_dir().expect("planned");

        for name in ["p0", "p0.partial", "p1", "p7.partial"] {
            fs::write(dir.join(name), b"x")?;
        }
        cleanup_intermediates(&dir, &plan);

        assert!(!dir.join("p0").exists());
        assert!(!dir.join("p0.partial").exists());
        assert!(!dir.join("p7.partial").exists());
        assert!(dir.join("p1").exists(), "explicit materialization kept");
        Ok(())
    }
}
