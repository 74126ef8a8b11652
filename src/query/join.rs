//! Hash join of two batches.

use super::MergeMode;
use crate::batch::RowBatch;
use crate::error::Result;
use crate::schema::{Column, Schema};
use crate::value::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Suffix for right-hand columns whose names are taken on the left.
const RIGHT_SUFFIX: &str = "_right";

pub(crate) fn merge(
    left: &RowBatch,
    right: &RowBatch,
    left_key: &str,
    right_key: &str,
    mode: MergeMode,
) -> Result<RowBatch> {
    let lk = left.schema().require(left_key)?;
    let rk = right.schema().require(right_key)?;
    // Same-named keys are folded into one output column.
    let fold_key = left_key == right_key;

    let outer = mode != MergeMode::Inner;
    let mut defs: Vec<Column> = left
        .schema()
        .columns()
        .iter()
        .map(|c| Column { nullable: c.nullable || outer, ..c.clone() })
        .collect();
    let left_names: HashSet<&str> = left.schema().column_names().into_iter().collect();
    let right_columns: Vec<usize> = (0..right.column_count()).filter(|&c| !(fold_key && c == rk)).collect();
    for &c in &right_columns {
        let column = &right.schema().columns()[c];
        let name = if left_names.contains(column.name.as_str()) {
            format!("{}{}", column.name, RIGHT_SUFFIX)
        } else {
            column.name.clone()
        };
        defs.push(Column { name, data_type: column.data_type, nullable: column.nullable || outer });
    }
    let schema = Schema::from_columns(defs)?;

    // Null keys never match.
    let mut index: HashMap<&Value, Vec<usize>> = HashMap::new();
    for row in 0..right.row_count() {
        if let Some(key) = right.get(row, rk).filter(|k| !k.is_null()) {
            index.entry(key).or_default().push(row);
        }
    }

    let mut pairs: Vec<(Option<usize>, Option<usize>)> = Vec::new();
    let mut matched = vec![false; right.row_count()];
    for row in 0..left.row_count() {
        let hits = left.get(row, lk).filter(|k| !k.is_null()).and_then(|k| index.get(k));
        match hits {
            Some(hits) => {
                for &r in hits {
                    matched[r] = true;
                    pairs.push((Some(row), Some(r)));
                }
            }
            None if matches!(mode, MergeMode::Left | MergeMode::Full) => pairs.push((Some(row), None)),
            None => {}
        }
    }
    if matches!(mode, MergeMode::Right | MergeMode::Full) {
        pairs.extend((0..right.row_count()).filter(|&r| !matched[r]).map(|r| (None, Some(r))));
    }

    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(pairs.len()); schema.len()];
    for &(l, r) in &pairs {
        for c in 0..left.column_count() {
            let value = match (l, r) {
                (Some(l), _) => left.get(l, c).cloned(),
                (None, Some(r)) if fold_key && c == lk => right.get(r, rk).cloned(),
                _ => None,
            };
            columns[c].push(value.unwrap_or_default());
        }
        for (slot, &c) in right_columns.iter().enumerate() {
            let value = r.and_then(|r| right.get(r, c).cloned()).unwrap_or_default();
            columns[left.column_count() + slot].push(value);
        }
    }
    let row_count = pairs.len();
    Ok(RowBatch::from_parts(schema, columns.into_iter().map(Arc::new).collect(), row_count))
}
