//! # Ironcrunch
//!
//! A **lazy dataflow library** for Rust. Programs describe transformations on
//! logical collections; nothing runs until [`Pipeline::run`], at which point
//! the recorded operation graph is planned into a small DAG of map-only and
//! map/shuffle/reduce stages and handed to an execution engine.
//!
//! ## Key Features
//!
//! - **Lazy collection API** - `parallel_do`, `map`, `filter`, `group_by_key`,
//!   `combine_values`, `union`, `materialize` and `write` only record nodes
//! - **Type/codec bridge** - every collection carries a [`PType`]: a logical
//!   type bound to one serialization [`Family`] (JSON or compact binary)
//! - **Stage planner** - fuses element-wise chains, moves combiners map-side
//!   and places intermediate outputs only where data is shared or requested
//! - **Coordinator** - submits independent stages concurrently, polls without
//!   blocking and cancels in-flight work on the first failure
//! - **Local engine** - an in-process engine on `rayon` with partitioned
//!   hash or sort shuffles and checksummed intermediate files
//!
//! ## Quick Start
//!
//! ```
//! use ironcrunch::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = Pipeline::default();
//! let f = Family::Binary;
//! let words_t = f.table_of(&f.strings(), &f.longs())?;
//! let out = MemTarget::new("counts", words_t.clone());
//!
//! p.read(MemSource::new(f.strings(), ["hello world", "hello rust"]))?
//!     .flat_map("split", f.strings(), |line| {
//!         let line = line.as_str().unwrap_or_default().to_string();
//!         Ok(line.split_whitespace().map(Value::from).collect())
//!     })?
//!     .map("pair_with_one", words_t, |w| Ok(Value::pair(w, 1i64)))?
//!     .group_by_key()?
//!     .combine_values(SumLongs)?
//!     .write(out.clone())?;
//!
//! let report = p.run()?;
//! assert_eq!(report.stages.len(), 1);
//! assert_eq!(out.contents().len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Pipeline
//!
//! A [`Pipeline`] owns the operation graph and a handle to an
//! [`ExecutionEngine`]. `Pipeline::default()` runs on a [`LocalEngine`] with
//! default settings.
//!
//! ### PCollection
//!
//! A [`PCollection`] is a handle to one node of the graph plus its
//! [`PType`]. Handles are cheap to clone and may be consumed many times;
//! shared subgraphs are computed once and materialized for every consumer.
//!
//! ### Planning
//!
//! [`Pipeline::plan`] returns the [`StageGraph`]; its
//! [`explain`](StageGraph::explain) renders one block per stage with its
//! inputs, fused chain, shuffle and outputs.
//!
//! ## Module Overview
//!
//! - [`types`] - logical types, serialization families and codecs
//! - [`collection`] - `PCollection` and its transforms
//! - [`graph`], [`node`] - the recorded operation graph
//! - [`planner`], [`stage`] - stage planning
//! - [`job`] - lowering stages into engine jobs
//! - [`engine`] - the engine interface and the local engine
//! - [`runner`] - the stage coordinator
//! - [`io`] - sources and targets
//! - [`helpers`] - cogroup, join and count built from core nodes
//! - [`testing`] - assertions, a scripted engine and test pipelines

pub mod collection;
pub mod combiners;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod helpers;
pub mod io;
pub mod job;
pub mod node;
pub mod node_id;
pub mod pipeline;
pub mod planner;
pub mod runner;
pub mod stage;
pub mod testing;
pub mod types;
pub mod value;

pub use collection::PCollection;
pub use combiners::{CombineFn, Concat, MaxLongs, MinLongs, SumDoubles, SumLongs, combine_with};
pub use config::{LocalEngineConfig, PipelineConfig};
pub use engine::{ExecutionEngine, JobHandle, JobStatus, LocalEngine};
pub use error::{CodecError, EngineError, GraphConstructionError, PipelineError, PlanningError, StageFailure};
pub use helpers::CogroupConcat;
pub use io::{MemSource, MemTarget, Source, Target};
pub use node::{DoFn, Emitter};
pub use node_id::NodeId;
pub use pipeline::{Pipeline, RunState};
pub use runner::{RunReport, StageReport};
pub use stage::{StageGraph, StageId};
pub use types::{Capabilities, Family, PType};
pub use value::Value;

#[cfg(feature = "io-text")]
pub use io::{TextFileSource, TextFileTarget};
