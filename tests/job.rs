use anyhow::Result;
use ironcrunch::job::{InputSpec, JobKind, JobOutput, TransformStep};
use ironcrunch::testing::TestPipeline;
use ironcrunch::*;

#[test]
fn map_only_stage_becomes_one_chain() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Json;
    p.read(MemSource::new(f.longs(), [1i64, 2, 3, 4]))?
        .filter("even", |v| v.as_long().is_some_and(|x| x % 2 == 0))?
        .flat_map("twice", f.longs(), |v| Ok(vec![v.clone(), v]))?
        .write(MemTarget::new("out", f.longs()))?;

    let jobs = p.jobs()?;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.kind(), JobKind::MapOnly);
    assert_eq!(job.inputs.len(), 1);
    assert!(matches!(job.inputs[0].spec, InputSpec::Source(_)));

    let chain = &job.inputs[0].map_chain;
    assert_eq!(chain.names().collect::<Vec<_>>(), vec!["even", "twice"]);
    assert_eq!(chain.apply(Value::Long(2))?, vec![Value::Long(2), Value::Long(2)]);
    assert!(chain.apply(Value::Long(3))?.is_empty());
    assert!(job.reduce_chain.is_empty());
    assert!(matches!(job.outputs.as_slice(), [JobOutput::Target(_)]));
    assert_eq!(job.output_location().as_deref(), Some("mem://out"));
    Ok(())
}

#[test]
fn map_reduce_stage_carries_shuffle_types_and_reduce_chain() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    let grouped = p
        .read(MemSource::new(t.clone(), [Value::pair("a", 1i64)]))?
        .group_by_key()?;
    let maxed = grouped.combine_values(MaxLongs)?;
    let doubled = maxed.map_values("double", f.longs(), |v| Ok(Value::Long(v.as_long().unwrap_or(0) * 2)))?;
    doubled.write(MemTarget::new("out", t))?;

    let jobs = p.jobs()?;
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.kind(), JobKind::MapReduce);
    let shuffle = job.shuffle.as_ref().expect("shuffle spec");
    assert_eq!(shuffle.key_type, f.strings());
    assert_eq!(shuffle.value_type, f.longs());
    assert!(shuffle.combiner.is_some());
    assert!(!shuffle.sorted);

    let steps = &job.reduce_chain.steps;
    assert_eq!(steps.len(), 1);
    assert!(matches!(&steps[0], TransformStep::Do { name, .. } if name == "double"));
    assert!(job.inputs[0].map_chain.is_empty());
    Ok(())
}

#[test]
fn combine_after_a_persisted_group_becomes_a_fold() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    let grouped = p
        .read(MemSource::new(
            t.clone(),
            [Value::pair("a", 1i64), Value::pair("a", 5i64), Value::pair("b", 2i64)],
        ))?
        .group_by_key()?;
    let out_grouped = MemTarget::new("groups", grouped.ptype().clone());
    let out_min = MemTarget::new("min", t);
    grouped.write(out_grouped.clone())?;
    grouped.combine_values(MinLongs)?.write(out_min.clone())?;

    let jobs = p.jobs()?;
    assert_eq!(jobs.len(), 2);
    assert!(jobs[0].shuffle.as_ref().is_some_and(|s| s.combiner.is_none()));
    assert_eq!(jobs[1].kind(), JobKind::MapOnly);
    assert!(matches!(jobs[1].inputs[0].spec, InputSpec::Materialized { .. }));
    assert!(matches!(
        jobs[1].inputs[0].map_chain.steps.as_slice(),
        [TransformStep::FoldGroups { .. }]
    ));

    p.run()?;
    let mins = ironcrunch::testing::long_table(&out_min.contents());
    assert_eq!(mins.get("a"), Some(&1));
    assert_eq!(mins.get("b"), Some(&2));
    assert_eq!(out_grouped.contents().len(), 2);
    Ok(())
}

#[test]
fn sort_shuffle_request_reaches_the_job() -> Result<()> {
    let engine = LocalEngine::new(LocalEngineConfig {
        sort_shuffle: true,
        ..LocalEngineConfig::default()
    });
    let p = TestPipeline::with_engine(std::sync::Arc::new(engine))?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    p.read(MemSource::new(t.clone(), [Value::pair("a", 1i64)]))?
        .group_by_key()?
        .combine_values(SumLongs)?
        .write(MemTarget::new("out", t))?;

    let jobs = p.jobs()?;
    assert!(jobs[0].shuffle.as_ref().is_some_and(|s| s.sorted));
    Ok(())
}
