//! Group-by aggregation and pivot.
//!
//! Group keys compare by exact value (numeric variants compare across each other),
//! and groups are emitted in the order their first row appears.

use super::{AggregateSpec, Aggregation};
use crate::batch::RowBatch;
use crate::error::{Error, Result};
use crate::schema::{Column, DataType, Schema};
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Applies `aggregation` to the non-null values of `values`.
///
/// Count of an empty input is 0; every other aggregation of an empty input is null.
pub fn aggregate<'a, I>(values: I, aggregation: Aggregation) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    let present: Vec<&Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match aggregation {
        Aggregation::Count => Value::Long(present.len() as i64),
        Aggregation::Min => present.iter().min().map_or(Value::Null, |v| (*v).clone()),
        Aggregation::Max => present.iter().max().map_or(Value::Null, |v| (*v).clone()),
        Aggregation::First => present.first().map_or(Value::Null, |v| (*v).clone()),
        Aggregation::Last => present.last().map_or(Value::Null, |v| (*v).clone()),
        Aggregation::Sum | Aggregation::Mean => {
            let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            let sum: f64 = numbers.iter().sum();
            if aggregation == Aggregation::Sum {
                Value::Float(sum)
            } else {
                Value::Float(sum / numbers.len() as f64)
            }
        }
        Aggregation::Variance | Aggregation::StandardDeviation => {
            let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
            match sample_variance(&numbers) {
                Some(var) if aggregation == Aggregation::Variance => Value::Float(var),
                Some(var) => Value::Float(var.sqrt()),
                None => Value::Null,
            }
        }
        Aggregation::Median => {
            let mut numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();
            median(&mut numbers).map_or(Value::Null, Value::Float)
        }
    }
}

/// Sample variance (n - 1); needs at least two values.
pub(crate) fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

/// Median of `values` (sorted in place).
pub(crate) fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 { (values[mid - 1] + values[mid]) / 2.0 } else { values[mid] })
}

/// Output type of an aggregation over a column of `input` type.
fn output_type(aggregation: Aggregation, input: DataType) -> DataType {
    match aggregation {
        Aggregation::Count => DataType::Long,
        Aggregation::Min | Aggregation::Max | Aggregation::First | Aggregation::Last => input,
        _ => DataType::Float,
    }
}

/// Rows of `batch` grouped by the values of `keys`, in first-seen order.
fn groups(batch: &RowBatch, keys: &[usize]) -> Vec<(Vec<Value>, Vec<usize>)> {
    let mut position: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
    for row in 0..batch.row_count() {
        let key: Vec<Value> = keys.iter().map(|&c| batch.get(row, c).cloned().unwrap_or_default()).collect();
        match position.get(&key) {
            Some(&g) => groups[g].1.push(row),
            None => {
                position.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }
    groups
}

pub(crate) fn group_by(batch: &RowBatch, group_columns: &[String], aggregations: &[AggregateSpec]) -> Result<RowBatch> {
    let schema = batch.schema();
    let keys = group_columns.iter().map(|c| schema.require(c)).collect::<Result<Vec<_>>>()?;
    let inputs = aggregations.iter().map(|a| schema.require(&a.column)).collect::<Result<Vec<_>>>()?;

    let mut defs: Vec<Column> = keys.iter().map(|&k| schema.columns()[k].clone()).collect();
    for (spec, &input) in aggregations.iter().zip(&inputs) {
        let data_type = output_type(spec.aggregation, schema.columns()[input].data_type);
        defs.push(Column::new(spec.result_name.as_str(), data_type));
    }
    let out_schema = Schema::from_columns(defs)?;

    let mut grouped = groups(batch, &keys);
    if keys.is_empty() && grouped.is_empty() {
        grouped.push((Vec::new(), Vec::new()));
    }

    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(grouped.len()); out_schema.len()];
    for (key, rows) in &grouped {
        for (slot, value) in key.iter().enumerate() {
            columns[slot].push(value.clone());
        }
        for (n, (spec, &input)) in aggregations.iter().zip(&inputs).enumerate() {
            let cells = batch.column_at(input).unwrap_or_default();
            let value = aggregate(rows.iter().map(|&r| &cells[r]), spec.aggregation);
            let data_type = out_schema.columns()[keys.len() + n].data_type;
            columns[keys.len() + n].push(value.coerce_to(data_type).unwrap_or(value));
        }
    }
    let row_count = grouped.len();
    Ok(RowBatch::from_parts(out_schema, columns.into_iter().map(Arc::new).collect(), row_count))
}

pub(crate) fn pivot(
    batch: &RowBatch,
    index_columns: &[String],
    pivot_column: &str,
    value_column: &str,
    aggregation: Aggregation,
) -> Result<RowBatch> {
    let schema = batch.schema();
    let keys = index_columns.iter().map(|c| schema.require(c)).collect::<Result<Vec<_>>>()?;
    let pivot = schema.require(pivot_column)?;
    let value = schema.require(value_column)?;

    let mut pivot_values: Vec<Value> = Vec::new();
    let mut pivot_slot: HashMap<Value, usize> = HashMap::new();
    for cell in batch.column_at(pivot).unwrap_or_default() {
        if !pivot_slot.contains_key(cell) {
            pivot_slot.insert(cell.clone(), pivot_values.len());
            pivot_values.push(cell.clone());
        }
    }

    let value_type = output_type(aggregation, schema.columns()[value].data_type);
    let mut defs: Vec<Column> = keys.iter().map(|&k| schema.columns()[k].clone()).collect();
    let mut named: HashMap<String, &Value> = HashMap::with_capacity(pivot_values.len());
    for p in &pivot_values {
        let name = format!("{}_{}", p, value_column);
        if let Some(other) = named.insert(name.clone(), p) {
            return Err(Error::invalid_argument(format!(
                "pivot values {:?} and {:?} both map to column '{}'",
                other, p, name
            )));
        }
        defs.push(Column::new(name, value_type));
    }
    let out_schema = Schema::from_columns(defs)?;

    let grouped = groups(batch, &keys);
    let pivot_cells = batch.column_at(pivot).unwrap_or_default();
    let value_cells = batch.column_at(value).unwrap_or_default();
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(grouped.len()); out_schema.len()];
    for (key, rows) in &grouped {
        for (slot, v) in key.iter().enumerate() {
            columns[slot].push(v.clone());
        }
        let mut buckets: Vec<Vec<&Value>> = vec![Vec::new(); pivot_values.len()];
        for &row in rows {
            if let Some(&slot) = pivot_slot.get(&pivot_cells[row]) {
                buckets[slot].push(&value_cells[row]);
            }
        }
        for (slot, bucket) in buckets.into_iter().enumerate() {
            let cell = if bucket.is_empty() && aggregation != Aggregation::Count {
                Value::Null
            } else {
                let v = aggregate(bucket, aggregation);
                v.coerce_to(value_type).unwrap_or(v)
            };
            columns[keys.len() + slot].push(cell);
        }
    }
    let row_count = grouped.len();
    Ok(RowBatch::from_parts(out_schema, columns.into_iter().map(Arc::new).collect(), row_count))
}
