use anyhow::Result;
use ironcrunch::graph::Graph;
use ironcrunch::node::{MapOp, Node, NodeKind};
use ironcrunch::pipeline::TempLocations;
use ironcrunch::planner;
use ironcrunch::stage::{StageInput, StageOutput};
use ironcrunch::testing::{ScriptedEngine, TestPipeline, init_test_logging};
use ironcrunch::*;
use std::sync::Arc;

fn words(p: &TestPipeline, text: &[&str]) -> Result<PCollection> {
    let f = Family::Binary;
    Ok(p.read(MemSource::new(f.strings(), text.iter().copied()))?)
}

fn ones(c: &PCollection) -> Result<PCollection> {
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    Ok(c.map("pair_with_one", t, |w| Ok(Value::pair(w, 1i64)))?)
}

fn identity_kind() -> NodeKind {
    NodeKind::ParallelDo(Arc::new(MapOp(|v: Value| -> Result<Value> { Ok(v) })))
}

#[test]
fn map_only_chain_fuses_into_one_stage() -> Result<()> {
    init_test_logging();
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let out = MemTarget::new("out", f.strings());
    words(&p, &["a", "bb", "ccc"])?
        .map("upper", f.strings(), |v| {
            Ok(Value::from(v.as_str().unwrap_or_default().to_uppercase()))
        })?
        .filter("long", |v| v.as_str().is_some_and(|s| s.len() > 1))?
        .map("suffix", f.strings(), |v| Ok(Value::from(format!("{v}!"))))?
        .write(out)?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 1);
    let s = &plan.stages()[0];
    assert!(s.is_map_only());
    assert_eq!(s.label, "upper+long+suffix");
    assert_eq!(s.pipes.len(), 1);
    assert_eq!(s.pipes[0].chain.len(), 3);
    assert!(s.temp_location().is_none());
    assert_eq!(plan.materialization_points().len(), 1);
    Ok(())
}

#[test]
fn shared_node_is_materialized_once() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let shared = words(&p, &["x", "y"])?.map("tag", f.strings(), |v| Ok(Value::from(format!("#{v}"))))?;
    shared
        .map("left", f.strings(), Ok)?
        .write(MemTarget::new("l", f.strings()))?;
    shared
        .map("right", f.strings(), Ok)?
        .write(MemTarget::new("r", f.strings()))?;

    let plan = p.plan()?;
    assert!(plan.materialization_points().contains(&shared.id()));
    let computing: Vec<_> = plan
        .stages()
        .iter()
        .filter(|s| s.nodes().contains(&shared.id()))
        .collect();
    assert_eq!(computing.len(), 1, "upstream chain must not be duplicated");

    let producer = computing[0];
    let loc = producer.temp_location().expect("shared output is persisted");
    let readers: Vec<_> = plan
        .stages()
        .iter()
        .filter(|s| {
            s.pipes.iter().any(|pipe| {
                matches!(&pipe.input, StageInput::Stage { location, .. } if location == loc)
            })
        })
        .collect();
    assert_eq!(readers.len(), 2);
    assert!(readers.iter().all(|s| s.deps == vec![producer.id]));
    assert_eq!(plan.len(), 3);
    Ok(())
}

#[test]
fn independent_shuffles_give_one_stage_each_plus_a_join_stage() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    let n = 3;
    let mut branches = Vec::new();
    for i in 0..n {
        let counted = ones(&words(&p, &["a", "b", "a"])?)?
            .group_by_key()?
            .combine_values(SumLongs)?;
        branches.push(counted.map(&format!("rename{i}"), t.clone(), Ok)?);
    }
    let refs: Vec<&PCollection> = branches.iter().collect();
    p.union(&refs)?.write(MemTarget::new("all", t))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), n + 1);
    assert_eq!(plan.shuffle_count(), n);
    assert_eq!(plan.induced_boundaries().len(), n);
    let last = &plan.stages()[n];
    assert!(last.is_map_only());
    assert_eq!(last.deps.len(), n);
    assert_eq!(plan.layers().len(), 2);
    Ok(())
}

#[test]
fn combiner_runs_on_both_sides_of_the_shuffle() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    let summed = ones(&words(&p, &["a", "b", "a"])?)?
        .group_by_key()?
        .combine_values(SumLongs)?;
    summed.write(MemTarget::new("out", t))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 1);
    let shuffle = plan.stages()[0].shuffle.expect("map-reduce stage");
    assert_eq!(shuffle.combiner, Some(summed.id()));
    assert!(plan.stages()[0].post.is_empty());
    let text = plan.explain().to_string();
    assert!(text.contains("combiner: sum_longs"), "{text}");
    assert!(text.contains("map-reduce"), "{text}");

    let jobs = p.jobs()?;
    let spec = jobs[0].shuffle.as_ref().expect("job shuffles");
    assert_eq!(spec.combiner.as_ref().map(|c| c.name().to_string()), Some("sum_longs".into()));
    Ok(())
}

#[test]
fn chained_shuffles_split_after_the_first_reduce() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.strings(), &f.longs())?;
    let first_letter = ones(&words(&p, &["ant", "bee", "ape"])?)?
        .group_by_key()?
        .combine_values(SumLongs)?
        .map_keys("first_letter", f.strings(), |k| {
            Ok(Value::from(k.as_str().unwrap_or_default().chars().take(1).collect::<String>()))
        })?;
    first_letter
        .group_by_key()?
        .combine_values(SumLongs)?
        .write(MemTarget::new("out", t))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 2);
    assert_eq!(plan.induced_boundaries(), vec![first_letter.id()]);
    let s0 = &plan.stages()[0];
    let s1 = &plan.stages()[1];
    assert_eq!(s0.root, first_letter.id());
    assert_eq!(s0.post, vec![first_letter.id()]);
    assert_eq!(s1.deps, vec![s0.id]);
    assert!(s1.shuffle.is_some());
    Ok(())
}

#[test]
fn explicit_materialize_keeps_a_named_output() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Json;
    let m = p
        .read(MemSource::new(f.longs(), [1i64, 2]))?
        .map("inc", f.longs(), |v| Ok(Value::Long(v.as_long().unwrap_or(0) + 1)))?
        .materialize()?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 1);
    let s = &plan.stages()[0];
    assert!(matches!(s.outputs.as_slice(), [StageOutput::Temp { explicit: true, .. }]));
    let loc = plan.materialized_location(m.id()).expect("explicit location");
    assert!(loc.ends_with("p0"), "{loc}");
    Ok(())
}

#[test]
fn stages_follow_topological_order_with_lowest_id_first() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let a = words(&p, &["a"])?.map("first", f.strings(), Ok)?;
    let b = words(&p, &["b"])?.map("second", f.strings(), Ok)?;
    b.write(MemTarget::new("b", f.strings()))?;
    a.write(MemTarget::new("a", f.strings()))?;

    let plan = p.plan()?;
    let roots: Vec<NodeId> = plan.stages().iter().map(|s| s.root).collect();
    assert_eq!(roots, vec![a.id(), b.id()]);
    assert_eq!(plan.layers(), vec![vec![StageId::new(0), StageId::new(1)]]);
    Ok(())
}

#[test]
fn unconsumed_branches_are_not_planned() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let src = words(&p, &["a"])?;
    let dead = src.map("dead", f.strings(), Ok)?;
    src.map("live", f.strings(), Ok)?
        .write(MemTarget::new("out", f.strings()))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.stage_of(dead.id()), None);
    assert!(!plan.materialization_points().contains(&src.id()));
    Ok(())
}

#[test]
fn shared_source_is_read_in_place() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let src = words(&p, &["a", "b"])?;
    src.map("one", f.strings(), Ok)?
        .write(MemTarget::new("one", f.strings()))?;
    src.map("two", f.strings(), Ok)?
        .write(MemTarget::new("two", f.strings()))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 2);
    for s in plan.stages() {
        assert!(s.deps.is_empty());
        assert_eq!(s.pipes[0].input, StageInput::Source(src.id()));
    }
    Ok(())
}

#[test]
fn plan_is_idempotent_and_freezes_the_graph() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let src = words(&p, &["a"])?;
    src.write(MemTarget::new("copy", f.strings()))?;

    let first = p.plan()?;
    let second = p.plan()?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(p.state(), RunState::Planned);

    let err = src.map("late", f.strings(), Ok).err();
    assert!(matches!(err, Some(GraphConstructionError::Frozen { .. })));
    Ok(())
}

#[test]
fn targeted_source_gets_a_copy_stage() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let src = words(&p, &["a", "b"])?;
    src.write(MemTarget::new("copy", f.strings()))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 1);
    let s = &plan.stages()[0];
    assert_eq!(s.root, src.id());
    assert!(s.pipes[0].chain.is_empty());
    Ok(())
}

#[test]
fn engine_key_requirements_are_enforced_at_planning() -> Result<()> {
    let engine = ScriptedEngine::new().with_key_requirements(Capabilities::ALL);
    let p = TestPipeline::with_engine(Arc::new(engine))?;
    let f = Family::Json;
    let t = f.table_of(&f.bytes(), &f.longs())?;
    p.read(MemSource::new(t.clone(), [Value::pair(vec![1u8], 1i64)]))?
        .group_by_key()?
        .write(MemTarget::new("out", f.table_of(&f.bytes(), &f.collection_of(&f.longs())?)?))?;

    match p.plan() {
        Err(PipelineError::Planning(PlanningError::UnsupportedKey { missing, .. })) => {
            assert_eq!(missing, "ordering");
        }
        other => panic!("expected an unsupported key, got {other:?}"),
    }
    assert_eq!(p.state(), RunState::Failed);
    Ok(())
}

#[test]
fn unhashable_keys_are_rejected_while_building() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let t = f.table_of(&f.doubles(), &f.longs())?;
    let err = p
        .read(MemSource::new(t, [Value::pair(1.5, 1i64)]))?
        .group_by_key()
        .err();
    assert!(matches!(err, Some(GraphConstructionError::UnsupportedKey { .. })));
    Ok(())
}

#[test]
fn cycles_are_reported_with_their_nodes() -> Result<()> {
    let f = Family::Binary;
    let mut g = Graph::new();
    let src = g.add(
        "src",
        NodeKind::Source(Arc::new(MemSource::new(f.strings(), ["a"]))),
        vec![],
        f.strings(),
    );
    let (a, b) = (NodeId::new(1), NodeId::new(2));
    let union = |id, inputs| Node {
        id,
        name: format!("u{}", id.raw()),
        kind: NodeKind::Union,
        inputs,
        ptype: f.strings(),
    };
    g.push_unchecked(union(a, vec![src, b]));
    g.push_unchecked(union(b, vec![a]));
    g.add(
        "out",
        NodeKind::Target(Arc::new(MemTarget::new("out", f.strings()))),
        vec![b],
        f.strings(),
    );

    let dir = tempfile::tempdir()?;
    let err = planner::plan(&g, Capabilities::HASH_GROUPING, &mut TempLocations::new(dir.path()))
        .unwrap_err();
    match err {
        PlanningError::Cycle { nodes } => {
            assert!(nodes.contains(&a) && nodes.contains(&b));
            assert!(!nodes.contains(&src));
        }
        other => panic!("expected a cycle, got {other}"),
    }
    Ok(())
}

#[test]
fn dangling_and_malformed_nodes_are_rejected() -> Result<()> {
    let f = Family::Binary;
    let dir = tempfile::tempdir()?;

    let mut g = Graph::new();
    g.push_unchecked(Node {
        id: NodeId::new(0),
        name: "orphan".into(),
        kind: identity_kind(),
        inputs: vec![NodeId::new(9)],
        ptype: f.strings(),
    });
    let err = planner::plan(&g, Capabilities::HASH_GROUPING, &mut TempLocations::new(dir.path()));
    assert_eq!(
        err.err(),
        Some(PlanningError::DanglingReference {
            node: NodeId::new(0),
            missing: NodeId::new(9),
        })
    );

    let mut g = Graph::new();
    let a = g.add(
        "src",
        NodeKind::Source(Arc::new(MemSource::new(f.strings(), ["a"]))),
        vec![],
        f.strings(),
    );
    let b = g.add(
        "src2",
        NodeKind::Source(Arc::new(MemSource::new(f.strings(), ["b"]))),
        vec![],
        f.strings(),
    );
    g.add("two_inputs", identity_kind(), vec![a, b], f.strings());
    let err = planner::plan(&g, Capabilities::HASH_GROUPING, &mut TempLocations::new(dir.path()));
    assert!(matches!(err, Err(PlanningError::InvalidNode { .. })));
    Ok(())
}

#[test]
fn temp_locations_are_sequential_within_a_run() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let shared = words(&p, &["a"])?.map("shared", f.strings(), Ok)?;
    let m = shared.materialize()?;
    shared
        .map("other", f.strings(), Ok)?
        .write(MemTarget::new("o", f.strings()))?;

    let plan = p.plan()?;
    let dir = p.run_dir().expect("planned run has a directory");
    let temps: Vec<String> = plan
        .stages()
        .iter()
        .filter_map(|s| s.temp_location().map(str::to_string))
        .collect();
    assert_eq!(
        temps,
        vec![
            dir.join("p0").display().to_string(),
            dir.join("p1").display().to_string(),
        ]
    );
    assert_eq!(plan.materialized_location(m.id()), Some(temps[1].as_str()));
    Ok(())
}
