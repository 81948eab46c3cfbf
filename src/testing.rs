//! Testing utilities for pipelines.
//!
//! - **Assertions** over element lists, order-sensitive or not.
//! - [`TestPipeline`]: a pipeline whose scratch directory lives in a
//!   temporary directory removed on drop.
//! - [`ScriptedEngine`]: an engine that runs nothing and instead follows a
//!   per-stage script (succeed, fail, hang) while recording submissions and
//!   cancellation requests.
//! - [`init_test_logging`]: install an `EnvFilter`-driven subscriber once.
//!
//! # Quick Start
//!
//! ```
//! use ironcrunch::*;
//! use ironcrunch::testing::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let p = TestPipeline::new()?;
//! let f = Family::Json;
//! let out = MemTarget::new("out", f.longs());
//! p.read(MemSource::new(f.longs(), [1i64, 2, 3]))?
//!     .map("double", f.longs(), |v| Ok(Value::Long(v.as_long().unwrap_or(0) * 2)))?
//!     .write(out.clone())?;
//! p.run()?;
//! assert_collections_unordered_equal(
//!     &out.contents(),
//!     &[Value::Long(2), Value::Long(4), Value::Long(6)],
//! );
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod mock_engine;

pub use assertions::*;
pub use mock_engine::{Script, ScriptedEngine};

use crate::config::{LocalEngineConfig, PipelineConfig};
use crate::engine::{ExecutionEngine, LocalEngine};
use crate::pipeline::Pipeline;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber honoring `RUST_LOG`, writing through the
/// test harness. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A [`Pipeline`] with a private scratch root and fast polling.
#[derive(Clone)]
pub struct TestPipeline {
    pipeline: Pipeline,
    scratch: Arc<TempDir>,
}

impl TestPipeline {
    /// On a [`LocalEngine`] with two threads and a few partitions, so tests
    /// exercise the parallel paths.
    pub fn new() -> std::io::Result<Self> {
        let engine = LocalEngine::new(LocalEngineConfig {
            threads: Some(2),
            partitions: 3,
            ..LocalEngineConfig::default()
        });
        Self::with_engine(Arc::new(engine))
    }

    pub fn with_engine(engine: Arc<dyn ExecutionEngine>) -> std::io::Result<Self> {
        let scratch = tempfile::tempdir()?;
        let config = PipelineConfig {
            temp_root: scratch.path().to_path_buf(),
            poll_interval: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        Ok(Self {
            pipeline: Pipeline::new(engine, config),
            scratch: Arc::new(scratch),
        })
    }

    /// Number of nodes recorded so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.pipeline.graph().len()
    }

    #[must_use]
    pub fn scratch(&self) -> &std::path::Path {
        self.scratch.path()
    }

    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl std::ops::Deref for TestPipeline {
    type Target = Pipeline;

    fn deref(&self) -> &Self::Target {
        &self.pipeline
    }
}

impl AsRef<Pipeline> for TestPipeline {
    fn as_ref(&self) -> &Pipeline {
        &self.pipeline
    }
}
