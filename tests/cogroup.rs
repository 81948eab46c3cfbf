use anyhow::{Result, anyhow};
use ironcrunch::testing::*;
use ironcrunch::*;

fn pairs(p: &TestPipeline, f: Family, text: &str) -> Result<PCollection> {
    let t = f.table_of(&f.strings(), &f.longs())?;
    Ok(p
        .read(MemSource::new(f.strings(), [text]))?
        .flat_map("split", f.strings(), |line| {
            let line = line.as_str().unwrap_or_default().to_string();
            Ok(line.split_whitespace().map(Value::from).collect())
        })?
        .map("pair_with_one", t, |w| Ok(Value::pair(w, 1i64)))?)
}

fn sum_slots(slots: Value) -> Result<Value> {
    let (l, r) = slots
        .into_pair()
        .map_err(|v| anyhow!("expected cogroup slots, got {}", v.kind_name()))?;
    let mut total = 0;
    for side in [l, r] {
        for v in side.as_collection().unwrap_or_default() {
            total += v.as_long().unwrap_or(0);
        }
    }
    Ok(Value::Long(total))
}

#[test]
fn word_counts_by_first_letter_across_two_sources() -> Result<()> {
    init_test_logging();
    for f in [Family::Binary, Family::Json] {
        let p = TestPipeline::new()?;
        let per_word = MemTarget::new("per_word", f.table_of(&f.strings(), &f.longs())?);
        let per_letter = MemTarget::new("per_letter", f.table_of(&f.strings(), &f.longs())?);

        let left = pairs(&p, f, "the quick brown fox")?;
        let right = pairs(&p, f, "the lazy dog the fox ran")?;
        let words = left
            .cogroup(&right)?
            .map_values("sum_sides", f.longs(), sum_slots)?;
        words.write(per_word.clone())?;
        words
            .map_keys("first_letter", f.strings(), |k| {
                let s = k.as_str().unwrap_or_default();
                Ok(Value::from(s.chars().take(1).collect::<String>()))
            })?
            .group_by_key()?
            .combine_values(SumLongs)?
            .write(per_letter.clone())?;

        let report = p.run()?;
        assert_eq!(report.stages.len(), 2, "{f}");

        let by_word = long_table(&per_word.contents());
        assert_eq!(by_word.get("the"), Some(&3));
        assert_eq!(by_word.get("fox"), Some(&2));
        assert_eq!(by_word.get("ran"), Some(&1));
        assert_eq!(by_word.len(), 7);

        let by_letter = long_table(&per_letter.contents());
        assert_eq!(by_letter.get("t"), Some(&3));
        assert_eq!(by_letter.get("f"), Some(&2));
        assert_eq!(by_letter.get("q"), Some(&1));
        assert_eq!(by_letter.get("b"), Some(&1));
        assert_eq!(by_letter.get("l"), Some(&1));
        assert_eq!(by_letter.get("d"), Some(&1));
        assert_eq!(by_letter.get("r"), Some(&1));
        assert_eq!(by_letter.values().sum::<i64>(), 10);
    }
    Ok(())
}

#[test]
fn cogroup_keeps_sides_apart() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let left_t = f.table_of(&f.strings(), &f.longs())?;
    let right_t = f.table_of(&f.strings(), &f.strings())?;
    let left = p.read(MemSource::new(
        left_t,
        [Value::pair("a", 1i64), Value::pair("a", 2i64), Value::pair("b", 3i64)],
    ))?;
    let right = p.read(MemSource::new(right_t, [Value::pair("a", "x"), Value::pair("c", "y")]))?;

    let grouped = left.cogroup(&right)?;
    assert_eq!(
        grouped.ptype().to_string(),
        "binary:table<string, pair<collection<long>, collection<string>>>"
    );
    let out = MemTarget::new("out", grouped.ptype().clone());
    grouped.write(out.clone())?;
    p.run()?;

    let mut rows = out.contents();
    rows.sort_by(ironcrunch::types::compare_values);
    assert_eq!(rows.len(), 3);
    let (k, slots) = rows[0].as_pair().expect("row");
    assert_eq!(k, &Value::from("a"));
    let (l, r) = slots.as_pair().expect("slots");
    assert_collections_unordered_equal(l.as_collection().unwrap_or_default(), &[Value::Long(1), Value::Long(2)]);
    assert_eq!(r, &Value::collection(["x"]));
    assert_eq!(
        rows[1],
        Value::pair("b", Value::pair(Value::collection([3i64]), Value::Collection(vec![])))
    );
    assert_eq!(
        rows[2],
        Value::pair("c", Value::pair(Value::Collection(vec![]), Value::collection(["y"])))
    );
    Ok(())
}

#[test]
fn cogroup_tags_are_fused_into_one_shuffle() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let left = pairs(&p, f, "a b")?;
    let right = pairs(&p, f, "b c")?;
    let grouped = left.cogroup(&right)?;
    grouped.write(MemTarget::new("out", grouped.ptype().clone()))?;

    let plan = p.plan()?;
    assert_eq!(plan.len(), 1);
    let s = &plan.stages()[0];
    assert_eq!(s.pipes.len(), 2);
    assert_eq!(s.shuffle.and_then(|sh| sh.combiner), Some(grouped.id()));
    assert!(s.label.contains("cogroup_tag_left"), "{}", s.label);
    assert!(s.label.contains("cogroup_tag_right"), "{}", s.label);
    Ok(())
}

#[test]
fn join_pairs_matching_values() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Json;
    let users = p.read(MemSource::new(
        f.table_of(&f.longs(), &f.strings())?,
        [Value::pair(1i64, "ann"), Value::pair(2i64, "bob")],
    ))?;
    let orders = p.read(MemSource::new(
        f.table_of(&f.longs(), &f.doubles())?,
        [Value::pair(1i64, 9.5), Value::pair(1i64, 2.0), Value::pair(3i64, 1.0)],
    ))?;
    let joined = users.join(&orders)?;
    assert_eq!(joined.ptype().to_string(), "json:table<long, pair<string, double>>");
    let out = MemTarget::new("out", joined.ptype().clone());
    joined.write(out.clone())?;
    p.run()?;

    assert_kv_collections_equal(
        &out.contents(),
        &[
            Value::pair(1i64, Value::pair("ann", 9.5)),
            Value::pair(1i64, Value::pair("ann", 2.0)),
        ],
    );
    Ok(())
}

#[test]
fn cogroup_needs_matching_keys() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let a = p.read(MemSource::new(f.table_of(&f.strings(), &f.longs())?, Vec::<Value>::new()))?;
    let b = p.read(MemSource::new(f.table_of(&f.longs(), &f.longs())?, Vec::<Value>::new()))?;
    assert!(matches!(a.cogroup(&b), Err(GraphConstructionError::TypeMismatch { .. })));
    let plain = p.read(MemSource::new(f.strings(), ["x"]))?;
    assert!(matches!(a.cogroup(&plain), Err(GraphConstructionError::NotATable { .. })));
    Ok(())
}

#[test]
fn count_tallies_distinct_elements() -> Result<()> {
    let p = TestPipeline::new()?;
    let f = Family::Binary;
    let out = MemTarget::new("out", f.table_of(&f.strings(), &f.longs())?);
    p.read(MemSource::new(f.strings(), ["x", "y", "x", "x"]))?
        .count()?
        .write(out.clone())?;
    p.run()?;

    let t = long_table(&out.contents());
    assert_eq!(t.get("x"), Some(&3));
    assert_eq!(t.get("y"), Some(&1));
    Ok(())
}
