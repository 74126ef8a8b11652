//! Window functions.
//!
//! A window operator adds one column and never changes the row count or order.
//! Rows are processed in their current order, independently per partition.

use super::aggregate::{median, sample_variance};
use super::{WindowFunction, WindowSpec};
use crate::batch::RowBatch;
use crate::error::{Error, Result};
use crate::schema::{Column, DataType};
use crate::value::Value;
use std::collections::HashMap;

pub(crate) fn apply(batch: &RowBatch, spec: &WindowSpec) -> Result<RowBatch> {
    let schema = batch.schema();
    let column = schema.require(&spec.column)?;
    let source_type = schema.columns()[column].data_type;
    if spec.window_size == Some(0) {
        return Err(Error::invalid_argument("window size must be > 0"));
    }

    let output_type = match spec.function {
        WindowFunction::Lag | WindowFunction::Lead => source_type,
        WindowFunction::Rank | WindowFunction::DenseRank | WindowFunction::RowNumber => DataType::Long,
        _ => DataType::Float,
    };
    let default = match spec.function {
        WindowFunction::Lag | WindowFunction::Lead => spec.default_value.coerce_to(source_type).ok_or_else(|| {
            Error::invalid_argument(format!(
                "default {} does not fit column '{}' of type {}",
                spec.default_value, spec.column, source_type
            ))
        })?,
        _ => Value::Null,
    };

    let cells = batch.column_at(column).unwrap_or_default();
    let mut out = vec![Value::Null; batch.row_count()];
    for rows in partitions(batch, &spec.partition_by)? {
        let values: Vec<&Value> = rows.iter().map(|&r| &cells[r]).collect();
        let results = evaluate(spec, &values, &default)?;
        for (row, value) in rows.into_iter().zip(results) {
            out[row] = value;
        }
    }
    batch.with_column(Column::new(spec.result_column.as_str(), output_type), out)
}

/// Row positions per partition, partitions in first-seen order.
fn partitions(batch: &RowBatch, partition_by: &[String]) -> Result<Vec<Vec<usize>>> {
    if partition_by.is_empty() {
        return Ok(vec![(0..batch.row_count()).collect()]);
    }
    let keys = partition_by.iter().map(|c| batch.schema().require(c)).collect::<Result<Vec<_>>>()?;
    let mut slot: HashMap<Vec<Value>, usize> = HashMap::new();
    let mut parts: Vec<Vec<usize>> = Vec::new();
    for row in 0..batch.row_count() {
        let key: Vec<Value> = keys.iter().map(|&k| batch.get(row, k).cloned().unwrap_or_default()).collect();
        let next = parts.len();
        let index = *slot.entry(key).or_insert(next);
        if index == next {
            parts.push(Vec::new());
        }
        parts[index].push(row);
    }
    Ok(parts)
}

fn evaluate(spec: &WindowSpec, values: &[&Value], default: &Value) -> Result<Vec<Value>> {
    let n = values.len();
    let width = spec.window_size.unwrap_or(n.max(1));
    let numbers: Vec<Option<f64>> = values.iter().map(|v| v.as_f64()).collect();

    // Non-null numbers of the trailing window ending at `i`.
    let window = |i: usize| -> Vec<f64> {
        let start = (i + 1).saturating_sub(width);
        numbers[start..=i].iter().flatten().copied().collect()
    };
    let float = |v: Option<f64>| v.map_or(Value::Null, Value::Float);

    Ok(match spec.function {
        WindowFunction::MovingAverage => (0..n)
            .map(|i| {
                let w = window(i);
                float((!w.is_empty()).then(|| w.iter().sum::<f64>() / w.len() as f64))
            })
            .collect(),
        WindowFunction::MovingSum => (0..n)
            .map(|i| {
                let w = window(i);
                float((!w.is_empty()).then(|| w.iter().sum::<f64>()))
            })
            .collect(),
        WindowFunction::MovingMin => (0..n).map(|i| float(window(i).into_iter().reduce(f64::min))).collect(),
        WindowFunction::MovingMax => (0..n).map(|i| float(window(i).into_iter().reduce(f64::max))).collect(),
        WindowFunction::MovingMedian => (0..n).map(|i| float(median(&mut window(i)))).collect(),
        WindowFunction::MovingStandardDeviation => {
            (0..n).map(|i| float(sample_variance(&window(i)).map(f64::sqrt))).collect()
        }
        WindowFunction::ExponentialMovingAverage => {
            let size = spec
                .window_size
                .ok_or_else(|| Error::invalid_argument("exponential moving average needs a window size"))?;
            let alpha = 2.0 / (size as f64 + 1.0);
            let mut ema: Option<f64> = None;
            numbers
                .iter()
                .map(|x| {
                    if let Some(x) = x {
                        ema = Some(match ema {
                            Some(prev) => alpha * x + (1.0 - alpha) * prev,
                            None => *x,
                        });
                    }
                    float(ema)
                })
                .collect()
        }
        WindowFunction::CumulativeSum => {
            let mut total: Option<f64> = None;
            numbers
                .iter()
                .map(|x| {
                    if let Some(x) = x {
                        total = Some(total.unwrap_or(0.0) + x);
                    }
                    float(total)
                })
                .collect()
        }
        WindowFunction::Lag => {
            let offset = spec.window_size.unwrap_or(1);
            (0..n).map(|i| if i >= offset { values[i - offset].clone() } else { default.clone() }).collect()
        }
        WindowFunction::Lead => {
            let offset = spec.window_size.unwrap_or(1);
            (0..n).map(|i| values.get(i + offset).map_or_else(|| default.clone(), |v| (*v).clone())).collect()
        }
        WindowFunction::Rank | WindowFunction::DenseRank => rank(values, spec.function == WindowFunction::DenseRank),
        WindowFunction::RowNumber => (1..=n as i64).map(Value::Long).collect(),
    })
}

/// Ascending ranks; nulls get no rank.
fn rank(values: &[&Value], dense: bool) -> Vec<Value> {
    let mut order: Vec<usize> = (0..values.len()).filter(|&i| !values[i].is_null()).collect();
    order.sort_by(|&a, &b| values[a].cmp(values[b]));

    let mut out = vec![Value::Null; values.len()];
    let mut current = 0i64;
    let mut distinct = 0i64;
    for (position, &i) in order.iter().enumerate() {
        let tie = position > 0 && values[order[position - 1]] == values[i];
        if !tie {
            distinct += 1;
            current = position as i64 + 1;
        }
        out[i] = Value::Long(if dense { distinct } else { current });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::schema::Schema;

    fn prices() -> RowBatch {
        let schema = Schema::new()
            .with_column("Ticker", DataType::String)
            .with_column("Price", DataType::Float);
        RowBatch::from_rows(
            schema,
            vec![
                row!["A", 10.0],
                row!["B", 100.0],
                row!["A", 20.0],
                row!["A", Value::Null],
                row!["B", 300.0],
                row!["A", 60.0],
            ],
        )
        .unwrap()
    }

    fn run(spec: WindowSpec) -> Vec<Value> {
        let out = apply(&prices(), &spec).unwrap();
        out.column(&spec.result_column).unwrap().to_vec()
    }

    fn floats(values: &[Option<f64>]) -> Vec<Value> {
        values.iter().map(|v| Value::from(*v)).collect()
    }

    #[test]
    fn test_moving_average_partial_windows() {
        let out = run(WindowSpec::new("Price", WindowFunction::MovingAverage, "MA").size(2));
        assert_eq!(
            out,
            floats(&[Some(10.0), Some(55.0), Some(60.0), Some(20.0), Some(300.0), Some(180.0)])
        );
    }

    #[test]
    fn test_partitioned_cumulative_sum() {
        let spec = WindowSpec::new("Price", WindowFunction::CumulativeSum, "Total").partition_by(&["Ticker"]);
        assert_eq!(
            run(spec),
            floats(&[Some(10.0), Some(100.0), Some(30.0), Some(30.0), Some(400.0), Some(90.0)])
        );
    }

    #[test]
    fn test_lag_lead_defaults() {
        let lag = WindowSpec::new("Price", WindowFunction::Lag, "Prev")
            .partition_by(&["Ticker"])
            .default_value(0.0);
        assert_eq!(
            run(lag),
            floats(&[Some(0.0), Some(0.0), Some(10.0), Some(20.0), Some(100.0), None])
        );

        let lead = WindowSpec::new("Price", WindowFunction::Lead, "Next").size(2);
        assert_eq!(run(lead)[4], Value::Null);
        assert_eq!(run(WindowSpec::new("Price", WindowFunction::Lead, "Next").size(2))[0], Value::Float(20.0));
    }

    #[test]
    fn test_rank_and_dense_rank() {
        let schema = Schema::new().with_column("Score", DataType::Integer);
        let batch = RowBatch::from_rows(schema, vec![row![50], row![70], row![50], row![90], row![Value::Null]])
            .unwrap();
        let rank = apply(&batch, &WindowSpec::new("Score", WindowFunction::Rank, "R")).unwrap();
        assert_eq!(rank.column("R").unwrap(), &row![1i64, 3i64, 1i64, 4i64, Value::Null][..]);
        let dense = apply(&batch, &WindowSpec::new("Score", WindowFunction::DenseRank, "R")).unwrap();
        assert_eq!(dense.column("R").unwrap(), &row![1i64, 2i64, 1i64, 3i64, Value::Null][..]);
    }

    #[test]
    fn test_ema_and_std() {
        let ema = run(WindowSpec::new("Price", WindowFunction::ExponentialMovingAverage, "E").size(3));
        assert_eq!(ema[0], Value::Float(10.0));
        assert_eq!(ema[1], Value::Float(55.0));
        let std = run(WindowSpec::new("Price", WindowFunction::MovingStandardDeviation, "S").size(1));
        assert!(std.iter().all(Value::is_null));
        assert!(apply(&prices(), &WindowSpec::new("Price", WindowFunction::ExponentialMovingAverage, "E")).is_err());
    }

    #[test]
    fn test_row_number_and_row_count() {
        let out = apply(
            &prices(),
            &WindowSpec::new("Price", WindowFunction::RowNumber, "N").partition_by(&["Ticker"]),
        )
        .unwrap();
        assert_eq!(out.row_count(), 6);
        assert_eq!(out.column("N").unwrap(), &row![1i64, 1i64, 2i64, 3i64, 2i64, 4i64][..]);
    }
}
