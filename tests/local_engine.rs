use anyhow::{Result, bail};
use ironcrunch::engine::storage;
use ironcrunch::testing::TestPipeline;
use ironcrunch::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait(engine: &LocalEngine, handle: JobHandle) -> Result<JobStatus> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = engine.poll(handle)?;
        if status.is_terminal() {
            return Ok(status);
        }
        if Instant::now() > deadline {
            bail!("job {handle} did not finish");
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn submitted_job_writes_its_temp_output() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    let shared = p
        .read(MemSource::new(t.clone(), [Value::pair("a", 2i64), Value::pair("a", 3i64)]))?
        .group_by_key()?
        .combine_values(SumLongs)?;
    shared.write(MemTarget::new("x", t.clone()))?;
    shared
        .map("copy", t.clone(), Ok)?
        .write(MemTarget::new("y", t.clone()))?;
    let jobs = p.jobs()?;

    let engine = LocalEngine::new(LocalEngineConfig {
        threads: Some(2),
        partitions: 2,
        ..LocalEngineConfig::default()
    });
    let handle = engine.submit(Arc::clone(&jobs[0]))?;
    assert_eq!(wait(&engine, handle)?, JobStatus::Succeeded);

    let location = engine.output_location(handle)?;
    assert_eq!(Some(location.clone()), jobs[0].output_location());
    assert_eq!(storage::read_records(&location, &t)?, vec![Value::pair("a", 5i64)]);
    assert_eq!(engine.read_output(&location, &t)?, vec![Value::pair("a", 5i64)]);

    let counters = engine.counters(handle);
    assert_eq!(counters.get("shuffle_groups"), Some(&1));
    assert_eq!(counters.get("attempts"), Some(&1));

    assert_eq!(engine.tracked(), 1);
    engine.release(handle);
    assert_eq!(engine.tracked(), 0);
    assert_eq!(engine.poll(handle), Err(EngineError::UnknownHandle(handle.raw())));
    Ok(())
}

#[test]
fn finished_runs_leave_no_tracked_jobs() -> Result<()> {
    let engine = Arc::new(LocalEngine::new(LocalEngineConfig {
        threads: Some(2),
        ..LocalEngineConfig::default()
    }));
    let p = TestPipeline::with_engine(engine.clone())?;
    let f = Family::Json;
    let shared = p
        .read(MemSource::new(f.strings(), ["a", "b"]))?
        .map("shared", f.strings(), Ok)?;
    shared.write(MemTarget::new("one", f.strings()))?;
    shared
        .map("again", f.strings(), Ok)?
        .write(MemTarget::new("two", f.strings()))?;

    let report = p.run()?;
    assert_eq!(report.stages.len(), 2);
    assert_eq!(engine.tracked(), 0);
    Ok(())
}

#[test]
fn unknown_handles_and_unfinished_jobs_are_errors() -> Result<()> {
    let engine = LocalEngine::default();
    let ghost = JobHandle::new(42);
    assert_eq!(engine.poll(ghost), Err(EngineError::UnknownHandle(42)));
    assert_eq!(engine.output_location(ghost), Err(EngineError::UnknownHandle(42)));
    assert!(engine.counters(ghost).is_empty());
    engine.cancel(ghost);
    Ok(())
}

#[test]
fn failed_job_has_no_output_location() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    p.read(MemSource::new(f.strings(), ["a"]))?
        .map("broken", f.strings(), |_| bail!("broken on purpose"))?
        .write(MemTarget::new("out", f.strings()))?;
    let jobs = p.jobs()?;

    let engine = LocalEngine::default();
    let handle = engine.submit(Arc::clone(&jobs[0]))?;
    match wait(&engine, handle)? {
        JobStatus::Failed(message) => assert!(message.contains("broken on purpose"), "{message}"),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        engine.output_location(handle),
        Err(EngineError::NotFinished(handle.raw()))
    );
    Ok(())
}

#[test]
fn corrupt_intermediate_fails_the_reader() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let location = dir.path().join("p7").display().to_string();
    let t = Family::Json.strings();
    storage::write_records(&location, &t, &[Value::from("ok")])?;
    std::fs::write(&location, b"this is not an intermediate file at all, only a long line of text")?;

    let engine = LocalEngine::default();
    match engine.read_output(&location, &t) {
        Err(EngineError::Storage(msg)) => assert!(msg.contains("checksum"), "{msg}"),
        other => panic!("expected a storage error, got {other:?}"),
    }
    Ok(())
}
