use anyhow::Result;
use ironcrunch::runner::Runner;
use ironcrunch::testing::{Script, ScriptedEngine, TestPipeline, init_test_logging};
use ironcrunch::*;
use std::sync::Arc;
use std::time::Duration;

fn s(i: usize) -> StageId {
    StageId::new(i)
}

fn branch(p: &Pipeline, name: &str) -> Result<PCollection> {
    let f = Family::Binary;
    let c = p
        .read(MemSource::new(f.strings(), ["a", "b"]))?
        .map(name, f.strings(), Ok)?;
    Ok(c)
}

fn with_config(engine: &Arc<ScriptedEngine>, max_in_flight: usize) -> Result<(Pipeline, tempfile::TempDir)> {
    let scratch = tempfile::tempdir()?;
    let engine: Arc<dyn ExecutionEngine> = engine.clone();
    let p = Pipeline::new(
        engine,
        PipelineConfig {
            temp_root: scratch.path().to_path_buf(),
            poll_interval: Duration::from_millis(1),
            max_in_flight,
            ..PipelineConfig::default()
        },
    );
    Ok((p, scratch))
}

#[test]
fn independent_stages_are_outstanding_together() -> Result<()> {
    init_test_logging();
    let engine = Arc::new(
        ScriptedEngine::new()
            .script(0, Script::SucceedAfter(3))
            .script(1, Script::SucceedAfter(3)),
    );
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Binary;
    branch(&p, "one")?.write(MemTarget::new("one", f.strings()))?;
    branch(&p, "two")?.write(MemTarget::new("two", f.strings()))?;

    let report = p.run()?;
    assert_eq!(engine.max_concurrency(), 2);
    assert_eq!(report.layers, vec![vec![s(0), s(1)]]);
    assert_eq!(report.stages.len(), 2);
    Ok(())
}

#[test]
fn max_in_flight_bounds_submissions() -> Result<()> {
    let engine = Arc::new(
        ScriptedEngine::new()
            .script(0, Script::SucceedAfter(2))
            .script(1, Script::SucceedAfter(2))
            .script(2, Script::SucceedAfter(2)),
    );
    let (p, _scratch) = with_config(&engine, 1)?;
    let f = Family::Binary;
    for name in ["x", "y", "z"] {
        branch(&p, name)?.write(MemTarget::new(name, f.strings()))?;
    }

    let report = p.run()?;
    assert_eq!(engine.max_concurrency(), 1);
    assert_eq!(engine.submitted(), vec![s(0), s(1), s(2)]);
    assert_eq!(report.completion_order(), vec![s(0), s(1), s(2)]);
    Ok(())
}

#[test]
fn dependents_wait_for_their_producers() -> Result<()> {
    let engine = Arc::new(ScriptedEngine::new().script(0, Script::SucceedAfter(4)));
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Binary;
    let shared = branch(&p, "shared")?;
    shared
        .map("left", f.strings(), Ok)?
        .write(MemTarget::new("l", f.strings()))?;
    shared
        .map("right", f.strings(), Ok)?
        .write(MemTarget::new("r", f.strings()))?;

    let report = p.run()?;
    assert_eq!(engine.completed()[0], s(0));
    assert_eq!(engine.submitted()[0], s(0));
    assert_eq!(engine.max_concurrency(), 2, "both readers run together");
    assert_eq!(report.layers, vec![vec![s(0)], vec![s(1), s(2)]]);
    let mut released = engine.released();
    released.sort();
    assert_eq!(released, vec![s(0), s(1), s(2)]);
    let producer = report.stage(s(0)).expect("producer report");
    assert!(producer.location.as_deref().is_some_and(|l| l.ends_with("p0")));
    Ok(())
}

#[test]
fn first_failure_cancels_siblings_and_stops_submission() -> Result<()> {
    let engine = Arc::new(
        ScriptedEngine::new()
            .script(0, Script::Hang)
            .script(1, Script::Fail("disk full".into())),
    );
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Binary;
    branch(&p, "slow")?.write(MemTarget::new("slow", f.strings()))?;
    let fails = branch(&p, "fails")?;
    fails
        .map("after_x", f.strings(), Ok)?
        .write(MemTarget::new("x", f.strings()))?;
    fails
        .map("after_y", f.strings(), Ok)?
        .write(MemTarget::new("y", f.strings()))?;

    let err = p.run().unwrap_err();
    let PipelineError::JobFailure(failure) = &err else {
        panic!("expected a job failure, got {err}");
    };
    assert_eq!(failure.stage, s(1));
    assert_eq!(failure.label, "fails");
    assert_eq!(failure.message, "disk full");
    assert_eq!(failure.cancelled, vec![s(0)]);
    assert_eq!(
        failure.cancellations(),
        vec![PipelineError::Cancelled {
            stage: s(0),
            cause: s(1),
        }]
    );
    assert_eq!(err.to_string(), "stage s1 (fails) failed: disk full");

    assert_eq!(engine.submitted(), vec![s(0), s(1)], "dependents never start");
    assert_eq!(engine.cancelled(), vec![s(0)]);
    assert_eq!(engine.released(), vec![s(1), s(0)]);
    assert_eq!(p.state(), RunState::Failed);
    Ok(())
}

#[test]
fn rejected_submission_fails_the_run() -> Result<()> {
    let engine = Arc::new(ScriptedEngine::new().script(0, Script::RejectSubmit));
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Binary;
    branch(&p, "only")?.write(MemTarget::new("only", f.strings()))?;

    match p.run() {
        Err(PipelineError::JobFailure(failure)) => {
            assert_eq!(failure.stage, s(0));
            assert!(failure.message.contains("rejected"), "{}", failure.message);
        }
        other => panic!("expected a job failure, got {other:?}"),
    }
    assert!(engine.submitted().is_empty());
    Ok(())
}

#[test]
fn repeated_run_does_not_resubmit() -> Result<()> {
    let engine = Arc::new(ScriptedEngine::new());
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Binary;
    branch(&p, "a")?.write(MemTarget::new("a", f.strings()))?;
    branch(&p, "b")?.write(MemTarget::new("b", f.strings()))?;

    let first = p.run()?;
    let second = p.run()?;
    assert_eq!(first, second);
    assert_eq!(engine.submitted().len(), 2);
    Ok(())
}

#[test]
fn runner_executes_a_plan_directly() -> Result<()> {
    let engine = Arc::new(ScriptedEngine::new().script(1, Script::SucceedAfter(1)));
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Binary;
    let shared = branch(&p, "root")?;
    shared.write(MemTarget::new("root", f.strings()))?;
    shared
        .map("child", f.strings(), Ok)?
        .write(MemTarget::new("child", f.strings()))?;

    let plan = p.plan()?;
    let jobs = p.jobs()?;
    let config = PipelineConfig {
        poll_interval: Duration::from_millis(1),
        ..PipelineConfig::default()
    };
    let report = Runner::new(engine.as_ref(), &config).execute(&plan, &jobs)?;
    assert_eq!(report.completion_order(), vec![s(0), s(1)]);
    assert_eq!(report.stage(s(1)).map(|r| r.label.as_str()), Some("child"));
    assert!(report.stages.iter().all(|r| r.status == JobStatus::Succeeded));
    // Running the plan does not change the pipeline's own state.
    assert_eq!(p.state(), RunState::Planned);
    Ok(())
}
