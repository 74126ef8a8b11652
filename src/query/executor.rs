//! Plan execution.
//!
//! Leading `Where` operators are fused into the source scan, and a `Select` right
//! after them becomes the scan projection. An equality predicate on an indexed
//! column turns the scan into a point lookup. Every later operator runs on the
//! materialized batch.

use super::{aggregate, join, transform, window, Operator, TableSource};
use crate::batch::RowBatch;
use crate::error::Result;
use crate::query::predicate::{Predicate, RowFilter};
use crate::query::transform::project_indices;

pub(crate) fn execute(source: &dyn TableSource, ops: &[&Operator]) -> Result<RowBatch> {
    let schema = source.schema();

    let predicates: Vec<Predicate> = ops
        .iter()
        .map_while(|op| match op {
            Operator::Where(p) => Some(p.clone()),
            _ => None,
        })
        .collect();
    let mut rest = &ops[predicates.len()..];
    let filter = RowFilter::bind(&predicates, &schema)?;

    let projection = match rest.first() {
        Some(Operator::Select(columns)) => {
            rest = &rest[1..];
            Some(columns.iter().map(|c| schema.require(c)).collect::<Result<Vec<_>>>()?)
        }
        _ => None,
    };

    let mut batch = None;
    for predicate in &predicates {
        if let Some((column, key)) = predicate.point_lookup() {
            if let Some(found) = source.lookup(column, key)? {
                log::debug!("Query served by index lookup on '{}'", column);
                let found = filter.apply(&found)?;
                batch = Some(match &projection {
                    Some(columns) => project_indices(&found, columns),
                    None => found,
                });
                break;
            }
        }
    }
    let mut batch = match batch {
        Some(batch) => batch,
        None => source.scan(&filter, projection.as_deref())?,
    };

    for op in rest {
        batch = apply(batch, op)?;
    }
    Ok(batch)
}

fn apply(batch: RowBatch, op: &Operator) -> Result<RowBatch> {
    match op {
        Operator::Where(predicate) => {
            RowFilter::bind(std::slice::from_ref(predicate), batch.schema())?.apply(&batch)
        }
        Operator::Select(columns) => {
            let names: Vec<&str> = columns.iter().map(String::as_str).collect();
            batch.project(&names)
        }
        Operator::Sort { direction, columns } => transform::sort(&batch, *direction, columns),
        Operator::Head(n) => Ok(batch.slice(0, *n)),
        Operator::Tail(n) => {
            let start = batch.row_count().saturating_sub(*n);
            Ok(batch.slice(start, *n))
        }
        Operator::Sample { count, seed } => Ok(transform::sample(&batch, *count, *seed)),
        Operator::GroupBy { group_columns, aggregations } => {
            aggregate::group_by(&batch, group_columns, aggregations)
        }
        Operator::Pivot { index_columns, pivot_column, value_column, aggregation } => {
            aggregate::pivot(&batch, index_columns, pivot_column, value_column, *aggregation)
        }
        Operator::Window(spec) => window::apply(&batch, spec),
        Operator::Compute { name, expression } => transform::compute(&batch, name, expression),
        Operator::DropNulls { mode, columns } => transform::drop_nulls(&batch, *mode, columns),
        Operator::DropDuplicates { keep, columns } => transform::drop_duplicates(&batch, *keep, columns),
        Operator::FillNulls { method, columns } => transform::fill_nulls(&batch, method, columns),
        Operator::Merge { other, left_key, right_key, mode } => {
            join::merge(&batch, other, left_key, right_key, *mode)
        }
        Operator::Melt { fixed_columns, name_column, value_column } => {
            transform::melt(&batch, fixed_columns, name_column, value_column)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;
    use crate::schema::{DataType, Schema};
    use crate::query::{ComparisonOperator, QueryPlan};
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A source with an "index" on Id that counts how it was read.
    struct Indexed {
        batch: RowBatch,
        scans: AtomicUsize,
        lookups: AtomicUsize,
    }

    impl TableSource for Indexed {
        fn schema(&self) -> Schema {
            self.batch.schema().clone()
        }

        fn scan(&self, filter: &RowFilter, columns: Option<&[usize]>) -> Result<RowBatch> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            self.batch.scan(filter, columns)
        }

        fn lookup(&self, column: &str, key: &Value) -> Result<Option<RowBatch>> {
            if column != "Id" {
                return Ok(None);
            }
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let rows: Vec<usize> =
                (0..self.batch.row_count()).filter(|&i| self.batch.get(i, 0) == Some(key)).collect();
            Ok(Some(self.batch.take(&rows)))
        }
    }

    fn source() -> Arc<Indexed> {
        let schema = Schema::new().with_column("Id", DataType::Integer).with_column("Score", DataType::Float);
        let batch = RowBatch::from_rows(schema, vec![row![1, 10.0], row![2, 20.0], row![3, 30.0]]).unwrap();
        Arc::new(Indexed { batch, scans: AtomicUsize::new(0), lookups: AtomicUsize::new(0) })
    }

    #[test]
    fn test_key_equality_uses_lookup() {
        let src = source();
        let plan = QueryPlan::new(src.clone())
            .where_cmp("Score", 5.0, ComparisonOperator::GreaterThan)
            .where_eq("Id", 2)
            .select(&["Score"]);
        let out = plan.execute().unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.column_count(), 1);
        assert_eq!(out.value(0, "Score"), Some(&Value::Float(20.0)));
        assert_eq!(src.lookups.load(Ordering::SeqCst), 1);
        assert_eq!(src.scans.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_lookup_still_applies_other_predicates() {
        let src = source();
        let out = QueryPlan::new(src.clone())
            .where_eq("Id", 2)
            .where_cmp("Score", 25.0, ComparisonOperator::GreaterThan)
            .execute()
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_non_key_filters_scan() {
        let src = source();
        let out = QueryPlan::new(src.clone()).where_eq("Score", 30.0).head(5).execute().unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(src.scans.load(Ordering::SeqCst), 1);
        assert_eq!(src.lookups.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_late_where_runs_on_batch() {
        let src = source();
        let out = QueryPlan::new(src)
            .sort(crate::query::SortDirection::Descending, &["Score"])
            .where_cmp("Score", 15.0, ComparisonOperator::GreaterThan)
            .tail(1)
            .execute()
            .unwrap();
        assert_eq!(out.value(0, "Id"), Some(&Value::Integer(2)));
    }
}
