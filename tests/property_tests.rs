//! Property tests: a store driven by random operations matches a plain Vec model.

use proptest::prelude::*;
use tempfile::TempDir;
use velocity::{row, CompactionStrategy, DataType, Schema, Value, VelocityBlock, VelocityOptions};

#[derive(Debug, Clone)]
enum Op {
    Add(i64),
    Update(usize, i64),
    Remove(usize),
    Flush,
    Compact,
    Reopen,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<i64>().prop_map(Op::Add),
        2 => (any::<usize>(), any::<i64>()).prop_map(|(i, v)| Op::Update(i, v)),
        2 => any::<usize>().prop_map(Op::Remove),
        1 => Just(Op::Flush),
        1 => Just(Op::Compact),
        1 => Just(Op::Reopen),
    ]
}

fn schema() -> Schema {
    Schema::new()
        .with_column("Key", DataType::Long)
        .with_column("Value", DataType::Long)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_store_matches_model(ops in prop::collection::vec(op(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let options = VelocityOptions::default()
            .primary_key("Key")
            .target_segment_size(512)
            .auto_compaction(false);
        let mut store = VelocityBlock::create_with_schema(dir.path(), schema(), options).unwrap();

        // (key, value) in logical order, plus the next unused key.
        let mut model: Vec<(i64, i64)> = Vec::new();
        let mut flushed: Vec<(i64, i64)> = Vec::new();
        let mut next_key = 0i64;

        for op in ops {
            match op {
                Op::Add(value) => {
                    store.add_row(row![next_key, value]).unwrap();
                    model.push((next_key, value));
                    next_key += 1;
                }
                Op::Update(i, value) if !model.is_empty() => {
                    let i = i % model.len();
                    let key = model[i].0;
                    store.update_row_by_key(key, row![key, value]).unwrap();
                    model[i].1 = value;
                }
                Op::Remove(i) if !model.is_empty() => {
                    let i = i % model.len();
                    store.remove_row(i).unwrap();
                    model.remove(i);
                }
                Op::Flush => {
                    store.flush().unwrap();
                    flushed = model.clone();
                }
                Op::Compact => {
                    // A compaction commit persists pending writes too.
                    if store.compact(CompactionStrategy::Aggressive).unwrap().segments_in > 0 {
                        flushed = model.clone();
                    }
                }
                Op::Reopen => {
                    drop(store);
                    store = VelocityBlock::open(dir.path()).unwrap();
                    model = flushed.clone();
                    next_key = model.iter().map(|(k, _)| k + 1).max().unwrap_or(0).max(next_key);
                }
                _ => {}
            }
            prop_assert_eq!(store.row_count(), model.len());
        }

        let batch = store.to_batch().unwrap();
        let actual: Vec<(i64, i64)> = batch
            .rows()
            .map(|r| (r[0].as_i64().unwrap(), r[1].as_i64().unwrap()))
            .collect();
        prop_assert_eq!(&actual, &model);
        let stats = store.storage_stats();
        prop_assert_eq!(stats.active_rows as usize, model.len());
        if let Some((key, value)) = model.last() {
            let id = store.find_row_id(*key).unwrap().unwrap();
            prop_assert_eq!(store.get_value_by_id(id, "Value").unwrap(), Value::Long(*value));
        }
    }
}
