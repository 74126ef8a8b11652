//! Row-level operators: sort, sample, compute and the data-cleaning family.

use super::expr::Expr;
use super::predicate::BatchRow;
use super::{DropNullMode, FillMethod, KeepDuplicateMode, SortDirection};
use crate::batch::{infer_type, RowBatch};
use crate::error::{Error, Result};
use crate::schema::{Column, DataType, Schema};
use crate::value::Value;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) fn project_indices(batch: &RowBatch, columns: &[usize]) -> RowBatch {
    let defs: Vec<Column> = columns.iter().map(|&i| batch.schema().columns()[i].clone()).collect();
    let data = columns.iter().map(|&i| batch.column_arc(i)).collect();
    RowBatch::from_parts(Schema::from(defs), data, batch.row_count())
}

/// Resolves `names` to positions; an empty list means every column.
fn resolve(schema: &Schema, names: &[String]) -> Result<Vec<usize>> {
    if names.is_empty() {
        return Ok((0..schema.len()).collect());
    }
    names.iter().map(|n| schema.require(n)).collect()
}

pub(crate) fn sort(batch: &RowBatch, direction: SortDirection, columns: &[String]) -> Result<RowBatch> {
    let keys = columns.iter().map(|c| batch.schema().require(c)).collect::<Result<Vec<_>>>()?;
    let mut order: Vec<usize> = (0..batch.row_count()).collect();
    // `sort_by` is stable, ties keep their input order.
    order.sort_by(|&a, &b| {
        let mut ord = Ordering::Equal;
        for &key in &keys {
            ord = batch.get(a, key).cmp(&batch.get(b, key));
            if ord != Ordering::Equal {
                break;
            }
        }
        match direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    });
    Ok(batch.take(&order))
}

pub(crate) fn sample(batch: &RowBatch, count: usize, seed: Option<u64>) -> RowBatch {
    let len = batch.row_count();
    if count >= len {
        return batch.clone();
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut picked = rand::seq::index::sample(&mut rng, len, count).into_vec();
    picked.sort_unstable();
    batch.take(&picked)
}

pub(crate) fn compute(batch: &RowBatch, name: &str, expression: &str) -> Result<RowBatch> {
    let expr = Expr::compile(expression, batch.schema())?;
    let mut values = Vec::with_capacity(batch.row_count());
    for row in 0..batch.row_count() {
        values.push(expr.eval(&BatchRow { batch, row })?);
    }
    let data_type = infer_type(&values, DataType::Float);
    let values = values.into_iter().map(|v| v.coerce_to(data_type).unwrap_or(Value::Null)).collect();
    batch.with_column(Column::new(name, data_type), values)
}

pub(crate) fn drop_nulls(batch: &RowBatch, mode: DropNullMode, columns: &[String]) -> Result<RowBatch> {
    let checked = resolve(batch.schema(), columns)?;
    let keep: Vec<usize> = (0..batch.row_count())
        .filter(|&row| {
            let mut nulls = checked.iter().map(|&c| batch.get(row, c).is_none_or(Value::is_null));
            match mode {
                DropNullMode::Any => !nulls.any(|null| null),
                DropNullMode::All => !nulls.all(|null| null),
            }
        })
        .collect();
    Ok(batch.take(&keep))
}

pub(crate) fn drop_duplicates(batch: &RowBatch, keep: KeepDuplicateMode, columns: &[String]) -> Result<RowBatch> {
    let keys = resolve(batch.schema(), columns)?;
    let key_of = |row: usize| -> Vec<Value> {
        keys.iter().map(|&c| batch.get(row, c).cloned().unwrap_or_default()).collect()
    };

    // key -> (first row, last row, occurrences)
    let mut seen: HashMap<Vec<Value>, (usize, usize, usize)> = HashMap::new();
    for row in 0..batch.row_count() {
        seen.entry(key_of(row))
            .and_modify(|(_, last, n)| {
                *last = row;
                *n += 1;
            })
            .or_insert((row, row, 1));
    }

    let kept: Vec<usize> = (0..batch.row_count())
        .filter(|&row| {
            let (first, last, n) = seen[&key_of(row)];
            match keep {
                KeepDuplicateMode::First => row == first,
                KeepDuplicateMode::Last => row == last,
                KeepDuplicateMode::None => n == 1,
            }
        })
        .collect();
    Ok(batch.take(&kept))
}

pub(crate) fn fill_nulls(batch: &RowBatch, method: &FillMethod, columns: &[String]) -> Result<RowBatch> {
    let targets = resolve(batch.schema(), columns)?;
    let mut out = batch.clone();
    for index in targets {
        let column = batch.schema().columns()[index].clone();
        let values = batch.column_at(index).unwrap_or_default();
        if !values.iter().any(Value::is_null) {
            continue;
        }
        let filled = fill_column(values, method);
        let (column, filled) = settle_type(column, filled);
        out = out.with_column(column, filled)?;
    }
    Ok(out)
}

fn fill_column(values: &[Value], method: &FillMethod) -> Vec<Value> {
    let mut out = values.to_vec();
    match method {
        FillMethod::ForwardFill => {
            let mut last = Value::Null;
            for v in out.iter_mut() {
                if v.is_null() {
                    *v = last.clone();
                } else {
                    last = v.clone();
                }
            }
        }
        FillMethod::BackwardFill => {
            let mut next = Value::Null;
            for v in out.iter_mut().rev() {
                if v.is_null() {
                    *v = next.clone();
                } else {
                    next = v.clone();
                }
            }
        }
        FillMethod::Constant(constant) => replace_nulls(&mut out, constant),
        FillMethod::Mean => {
            let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if !numbers.is_empty() {
                let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                replace_nulls(&mut out, &Value::Float(mean));
            }
        }
        FillMethod::Median => {
            let mut numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if let Some(median) = super::aggregate::median(&mut numbers) {
                replace_nulls(&mut out, &Value::Float(median));
            }
        }
        FillMethod::Mode => {
            let mut counts: HashMap<&Value, (usize, usize)> = HashMap::new();
            for (i, v) in values.iter().enumerate().filter(|(_, v)| !v.is_null()) {
                counts.entry(v).or_insert((0, i)).0 += 1;
            }
            // Highest count, earliest first occurrence on ties.
            let mode = counts
                .into_iter()
                .max_by(|(_, (na, fa)), (_, (nb, fb))| na.cmp(nb).then(fb.cmp(fa)))
                .map(|(v, _)| v.clone());
            if let Some(mode) = mode {
                replace_nulls(&mut out, &mode);
            }
        }
        FillMethod::LinearInterpolation => {
            let mut previous: Option<(usize, f64)> = None;
            let mut i = 0;
            while i < values.len() {
                match values[i].as_f64() {
                    Some(y) => {
                        if let Some((x0, y0)) = previous {
                            for (x, slot) in out.iter_mut().enumerate().take(i).skip(x0 + 1) {
                                let t = (x - x0) as f64 / (i - x0) as f64;
                                *slot = Value::Float(y0 + t * (y - y0));
                            }
                        }
                        previous = Some((i, y));
                    }
                    None if !values[i].is_null() => previous = None,
                    None => {}
                }
                i += 1;
            }
        }
    }
    out
}

fn replace_nulls(values: &mut [Value], fill: &Value) {
    for v in values.iter_mut().filter(|v| v.is_null()) {
        *v = fill.clone();
    }
}

/// Keeps the column type when every filled value still fits it; integer columns
/// that received fractional fills become `Float`.
fn settle_type(column: Column, values: Vec<Value>) -> (Column, Vec<Value>) {
    let coerced: Option<Vec<Value>> = values.iter().map(|v| v.coerce_to(column.data_type)).collect();
    if let Some(coerced) = coerced {
        return (column, coerced);
    }
    if column.data_type.is_numeric() && values.iter().all(|v| v.is_null() || v.is_numeric()) {
        let floats = values.iter().map(|v| v.as_f64().map_or(Value::Null, Value::Float)).collect();
        let widened = Column { data_type: DataType::Float, ..column };
        return (widened, floats);
    }
    let kept = values.into_iter().map(|v| v.coerce_to(column.data_type).unwrap_or(Value::Null)).collect();
    (column, kept)
}

pub(crate) fn melt(
    batch: &RowBatch,
    fixed_columns: &[String],
    name_column: &str,
    value_column: &str,
) -> Result<RowBatch> {
    let schema = batch.schema();
    let fixed = fixed_columns.iter().map(|c| schema.require(c)).collect::<Result<Vec<_>>>()?;
    let melted: Vec<usize> = (0..schema.len()).filter(|i| !fixed.contains(i)).collect();
    if melted.is_empty() {
        return Err(Error::invalid_argument("melt needs at least one non-fixed column"));
    }

    let melted_types: Vec<DataType> = melted.iter().map(|&i| schema.columns()[i].data_type).collect();
    let value_type = if melted_types.iter().all(|t| *t == melted_types[0]) {
        melted_types[0]
    } else if melted_types.iter().all(DataType::is_numeric) {
        DataType::Float
    } else {
        DataType::String
    };

    let mut defs: Vec<Column> = fixed.iter().map(|&i| schema.columns()[i].clone()).collect();
    defs.push(Column::new(name_column, DataType::String));
    defs.push(Column::new(value_column, value_type));
    let out_schema = Schema::from_columns(defs)?;

    let rows = batch.row_count() * melted.len();
    let mut columns: Vec<Vec<Value>> = (0..fixed.len() + 2).map(|_| Vec::with_capacity(rows)).collect();
    for row in 0..batch.row_count() {
        for &m in &melted {
            for (slot, &f) in fixed.iter().enumerate() {
                columns[slot].push(batch.get(row, f).cloned().unwrap_or_default());
            }
            columns[fixed.len()].push(Value::String(schema.columns()[m].name.clone()));
            let value = batch.get(row, m).cloned().unwrap_or_default();
            let value = match value.coerce_to(value_type) {
                Some(v) => v,
                None if value_type == DataType::Float => value.as_f64().map_or(Value::Null, Value::Float),
                None => Value::String(value.to_string()),
            };
            columns[fixed.len() + 1].push(value);
        }
    }
    let columns = columns.into_iter().map(Arc::new).collect();
    Ok(RowBatch::from_parts(out_schema, columns, rows))
}
