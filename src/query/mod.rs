//! Deferred query plans.
//!
//! A [`QueryPlan`] is an immutable chain of operators. Every builder call returns a
//! new plan that shares its prefix with the old one, so plans can be branched
//! freely. Nothing is read until [`QueryPlan::execute`].
//!
//! ```
//! use velocity::{query::{Aggregation, SortDirection}, row, DataType, QueryPlan, RowBatch, Schema};
//!
//! let schema = Schema::new()
//!     .with_column("Dept", DataType::String)
//!     .with_column("Salary", DataType::Float);
//! let batch = RowBatch::from_rows(
//!     schema,
//!     vec![row!["Eng", 100.0], row!["Sales", 50.0], row!["Eng", 200.0]],
//! )
//! .unwrap();
//!
//! let totals = QueryPlan::from_batch(batch)
//!     .group_by_aggregate(&["Dept"], "Salary", Aggregation::Sum, "Total")
//!     .sort(SortDirection::Descending, &["Total"])
//!     .execute()
//!     .unwrap();
//! assert_eq!(totals.value(0, "Dept").and_then(|v| v.as_str()), Some("Eng"));
//! ```

pub mod aggregate;
mod executor;
pub mod expr;
mod join;
pub mod predicate;
mod transform;
mod window;

pub use expr::{validate_expression, ExpressionCheck};
pub use predicate::{ComparisonOperator, Predicate};

use crate::batch::RowBatch;
use crate::error::Result;
use crate::schema::Schema;
use crate::value::Value;
use predicate::RowFilter;
use std::fmt;
use std::sync::Arc;

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first, nulls first.
    Ascending,
    /// Largest first, nulls last.
    Descending,
}

/// Aggregate functions for group-by and pivot.
///
/// Standard deviation and variance are sample statistics (n - 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Number of non-null values.
    Count,
    /// Sum.
    Sum,
    /// Arithmetic mean.
    Mean,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Sample standard deviation.
    StandardDeviation,
    /// Sample variance.
    Variance,
    /// Median.
    Median,
    /// First non-null value.
    First,
    /// Last non-null value.
    Last,
}

impl Aggregation {
    /// Short name used for generated column names (`sum_Amount`).
    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Mean => "mean",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::StandardDeviation => "std",
            Aggregation::Variance => "var",
            Aggregation::Median => "median",
            Aggregation::First => "first",
            Aggregation::Last => "last",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Window functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowFunction {
    /// Mean over the last `window_size` rows.
    MovingAverage,
    /// Sum over the last `window_size` rows.
    MovingSum,
    /// Minimum over the last `window_size` rows.
    MovingMin,
    /// Maximum over the last `window_size` rows.
    MovingMax,
    /// Median over the last `window_size` rows.
    MovingMedian,
    /// Sample standard deviation over the last `window_size` rows.
    MovingStandardDeviation,
    /// Exponential moving average with alpha = 2 / (window_size + 1).
    ExponentialMovingAverage,
    /// Running total.
    CumulativeSum,
    /// Value `window_size` rows back (default 1).
    Lag,
    /// Value `window_size` rows ahead (default 1).
    Lead,
    /// Rank by value, ties share a rank and leave gaps.
    Rank,
    /// Rank by value, ties share a rank without gaps.
    DenseRank,
    /// 1-based position within the partition.
    RowNumber,
}

/// Which rows `drop_nulls` removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropNullMode {
    /// Drop a row when any checked column is null.
    Any,
    /// Drop a row only when every checked column is null.
    All,
}

/// Which occurrence `drop_duplicates` keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepDuplicateMode {
    /// Keep the first occurrence.
    First,
    /// Keep the last occurrence.
    Last,
    /// Drop every row whose key occurs more than once.
    None,
}

/// How `fill_nulls` replaces missing values.
#[derive(Debug, Clone, PartialEq)]
pub enum FillMethod {
    /// Previous non-null value.
    ForwardFill,
    /// Next non-null value.
    BackwardFill,
    /// A fixed value.
    Constant(Value),
    /// Column mean.
    Mean,
    /// Column median.
    Median,
    /// Most frequent value (first seen wins ties).
    Mode,
    /// Linear interpolation between the surrounding non-null values.
    LinearInterpolation,
}

/// Join kind for `merge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Matching rows only.
    Inner,
    /// Every left row.
    Left,
    /// Every right row.
    Right,
    /// Every row of both sides.
    Full,
}

/// One aggregation of a group-by.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    /// Input column.
    pub column: String,
    /// Function.
    pub aggregation: Aggregation,
    /// Output column name.
    pub result_name: String,
}

/// Parameters of a window operator.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    /// Input column.
    pub column: String,
    /// Function.
    pub function: WindowFunction,
    /// Window length (or offset for Lag/Lead). `None` means unbounded / 1.
    pub window_size: Option<usize>,
    /// Output column name.
    pub result_column: String,
    /// Columns whose values split the rows into independent partitions.
    pub partition_by: Vec<String>,
    /// Value used by Lag/Lead when the offset leaves the partition.
    pub default_value: Value,
}

impl WindowSpec {
    /// A window without partitioning.
    pub fn new(column: impl Into<String>, function: WindowFunction, result_column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            function,
            window_size: None,
            result_column: result_column.into(),
            partition_by: Vec::new(),
            default_value: Value::Null,
        }
    }

    /// Sets the window size.
    pub fn size(mut self, window_size: usize) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// Evaluates the window separately per distinct value of `columns`.
    pub fn partition_by(mut self, columns: &[&str]) -> Self {
        self.partition_by = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Sets the Lag/Lead default.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = value.into();
        self
    }
}

/// A single plan operator.
#[derive(Debug, Clone)]
pub enum Operator {
    /// Keep rows matching the predicate.
    Where(Predicate),
    /// Keep the named columns, in order.
    Select(Vec<String>),
    /// Stable sort by the columns.
    Sort {
        /// Direction.
        direction: SortDirection,
        /// Sort keys, most significant first.
        columns: Vec<String>,
    },
    /// First n rows.
    Head(usize),
    /// Last n rows.
    Tail(usize),
    /// n random rows in their original order.
    Sample {
        /// Rows to keep.
        count: usize,
        /// Seed for a reproducible sample.
        seed: Option<u64>,
    },
    /// Group rows and aggregate.
    GroupBy {
        /// Grouping columns; empty means a single group.
        group_columns: Vec<String>,
        /// Aggregations, one output column each.
        aggregations: Vec<AggregateSpec>,
    },
    /// Spread the values of one column into columns.
    Pivot {
        /// Row identity columns.
        index_columns: Vec<String>,
        /// Column whose values become column names.
        pivot_column: String,
        /// Column that is aggregated into the cells.
        value_column: String,
        /// Cell aggregation.
        aggregation: Aggregation,
    },
    /// Add a window function column.
    Window(WindowSpec),
    /// Add (or replace) a column computed from an expression.
    Compute {
        /// Output column name.
        name: String,
        /// Expression source.
        expression: String,
    },
    /// Remove rows with nulls.
    DropNulls {
        /// Any / All.
        mode: DropNullMode,
        /// Checked columns; empty means every column.
        columns: Vec<String>,
    },
    /// Remove duplicate rows.
    DropDuplicates {
        /// Which occurrence survives.
        keep: KeepDuplicateMode,
        /// Key columns; empty means every column.
        columns: Vec<String>,
    },
    /// Replace nulls.
    FillNulls {
        /// Fill strategy.
        method: FillMethod,
        /// Filled columns; empty means every column.
        columns: Vec<String>,
    },
    /// Join with another batch.
    Merge {
        /// Right side.
        other: RowBatch,
        /// Key column on this side.
        left_key: String,
        /// Key column on the right side.
        right_key: String,
        /// Join kind.
        mode: MergeMode,
    },
    /// Unpivot into (name, value) rows.
    Melt {
        /// Columns repeated on every output row.
        fixed_columns: Vec<String>,
        /// Output column holding the former column name.
        name_column: String,
        /// Output column holding the value.
        value_column: String,
    },
}

/// A node of the operator chain, linked to the operators before it.
#[derive(Debug)]
pub struct PlanNode {
    op: Operator,
    parent: Option<Arc<PlanNode>>,
}

/// Where a plan reads its rows from.
pub(crate) trait TableSource: Send + Sync {
    /// Schema of the rows `scan` produces before projection.
    fn schema(&self) -> Schema;

    /// Reads the rows passing `filter`, in logical order, keeping `columns` (by
    /// position) when given.
    fn scan(&self, filter: &RowFilter, columns: Option<&[usize]>) -> Result<RowBatch>;

    /// Finds the rows whose `column` equals `key` through an index.
    ///
    /// `None` means the source has no index on that column and must be scanned.
    fn lookup(&self, column: &str, key: &Value) -> Result<Option<RowBatch>>;
}

impl TableSource for RowBatch {
    fn schema(&self) -> Schema {
        RowBatch::schema(self).clone()
    }

    fn scan(&self, filter: &RowFilter, columns: Option<&[usize]>) -> Result<RowBatch> {
        let filtered = filter.apply(self)?;
        match columns {
            Some(columns) => Ok(transform::project_indices(&filtered, columns)),
            None => Ok(filtered),
        }
    }

    fn lookup(&self, _column: &str, _key: &Value) -> Result<Option<RowBatch>> {
        Ok(None)
    }
}

/// An immutable, lazily executed query.
#[derive(Clone)]
pub struct QueryPlan {
    source: Arc<dyn TableSource>,
    tail: Option<Arc<PlanNode>>,
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan").field("operators", &self.operators()).finish()
    }
}

impl QueryPlan {
    pub(crate) fn new(source: Arc<dyn TableSource>) -> Self {
        Self { source, tail: None }
    }

    /// A plan over an in-memory batch.
    pub fn from_batch(batch: RowBatch) -> Self {
        Self::new(Arc::new(batch))
    }

    fn then(&self, op: Operator) -> Self {
        Self {
            source: Arc::clone(&self.source),
            tail: Some(Arc::new(PlanNode { op, parent: self.tail.clone() })),
        }
    }

    /// The operators of this plan, first to last.
    pub fn operators(&self) -> Vec<&Operator> {
        let mut ops = Vec::new();
        let mut node = self.tail.as_deref();
        while let Some(current) = node {
            ops.push(&current.op);
            node = current.parent.as_deref();
        }
        ops.reverse();
        ops
    }

    /// Runs the plan.
    pub fn execute(&self) -> Result<RowBatch> {
        executor::execute(self.source.as_ref(), &self.operators())
    }

    /// Keeps rows matching `predicate`.
    pub fn filter(&self, predicate: Predicate) -> Self {
        self.then(Operator::Where(predicate))
    }

    /// Keeps rows where `column == value`.
    pub fn where_eq(&self, column: &str, value: impl Into<Value>) -> Self {
        self.where_cmp(column, value, ComparisonOperator::Equal)
    }

    /// Keeps rows where `column <op> value`.
    pub fn where_cmp(&self, column: &str, value: impl Into<Value>, op: ComparisonOperator) -> Self {
        self.filter(Predicate::Compare { column: column.to_string(), op, value: value.into() })
    }

    /// Keeps rows whose string `column` contains `pattern`.
    pub fn where_contains(&self, column: &str, pattern: &str) -> Self {
        self.filter(Predicate::Contains { column: column.to_string(), pattern: pattern.to_string() })
    }

    /// Keeps rows whose string `column` starts with `pattern`.
    pub fn where_starts_with(&self, column: &str, pattern: &str) -> Self {
        self.filter(Predicate::StartsWith { column: column.to_string(), pattern: pattern.to_string() })
    }

    /// Keeps rows whose string `column` ends with `pattern`.
    pub fn where_ends_with(&self, column: &str, pattern: &str) -> Self {
        self.filter(Predicate::EndsWith { column: column.to_string(), pattern: pattern.to_string() })
    }

    /// Keeps rows for which a boolean expression is true.
    pub fn where_expr(&self, expression: &str) -> Self {
        self.filter(Predicate::Expression(expression.to_string()))
    }

    /// Keeps the named columns, in the given order.
    pub fn select(&self, columns: &[&str]) -> Self {
        self.then(Operator::Select(strings(columns)))
    }

    /// Stable sort by `columns`.
    pub fn sort(&self, direction: SortDirection, columns: &[&str]) -> Self {
        self.then(Operator::Sort { direction, columns: strings(columns) })
    }

    /// First `n` rows.
    pub fn head(&self, n: usize) -> Self {
        self.then(Operator::Head(n))
    }

    /// Last `n` rows.
    pub fn tail(&self, n: usize) -> Self {
        self.then(Operator::Tail(n))
    }

    /// `n` random rows, reproducible when `seed` is given.
    pub fn sample(&self, n: usize, seed: Option<u64>) -> Self {
        self.then(Operator::Sample { count: n, seed })
    }

    /// Groups by `group_columns` and aggregates one column.
    pub fn group_by_aggregate(
        &self,
        group_columns: &[&str],
        value_column: &str,
        aggregation: Aggregation,
        result_name: &str,
    ) -> Self {
        self.then(Operator::GroupBy {
            group_columns: strings(group_columns),
            aggregations: vec![AggregateSpec {
                column: value_column.to_string(),
                aggregation,
                result_name: result_name.to_string(),
            }],
        })
    }

    /// Groups by `group_columns` and applies several aggregations, naming each output
    /// `{agg}_{column}`.
    pub fn group_by_aggregations(&self, group_columns: &[&str], aggregations: &[(&str, Aggregation)]) -> Self {
        let aggregations = aggregations
            .iter()
            .map(|(column, aggregation)| AggregateSpec {
                column: column.to_string(),
                aggregation: *aggregation,
                result_name: format!("{}_{}", aggregation.name(), column),
            })
            .collect();
        self.then(Operator::GroupBy { group_columns: strings(group_columns), aggregations })
    }

    /// Pivots `pivot_column` values into columns named `{value}_{value_column}`.
    pub fn pivot(
        &self,
        index_columns: &[&str],
        pivot_column: &str,
        value_column: &str,
        aggregation: Aggregation,
    ) -> Self {
        self.then(Operator::Pivot {
            index_columns: strings(index_columns),
            pivot_column: pivot_column.to_string(),
            value_column: value_column.to_string(),
            aggregation,
        })
    }

    /// Adds a window function column over the current row order.
    pub fn window(
        &self,
        column: &str,
        function: WindowFunction,
        window_size: Option<usize>,
        result_column: &str,
    ) -> Self {
        let mut spec = WindowSpec::new(column, function, result_column);
        spec.window_size = window_size;
        self.window_spec(spec)
    }

    /// Adds a window function column with partitioning or a Lag/Lead default.
    pub fn window_spec(&self, spec: WindowSpec) -> Self {
        self.then(Operator::Window(spec))
    }

    /// Adds (or replaces) column `name` with the value of `expression`.
    pub fn compute(&self, name: &str, expression: &str) -> Self {
        self.then(Operator::Compute { name: name.to_string(), expression: expression.to_string() })
    }

    /// Removes rows with nulls in `columns` (every column when empty).
    pub fn drop_nulls(&self, mode: DropNullMode, columns: &[&str]) -> Self {
        self.then(Operator::DropNulls { mode, columns: strings(columns) })
    }

    /// Removes rows whose `columns` (every column when empty) repeat.
    pub fn drop_duplicates(&self, keep: KeepDuplicateMode, columns: &[&str]) -> Self {
        self.then(Operator::DropDuplicates { keep, columns: strings(columns) })
    }

    /// Replaces nulls in `columns` (every column when empty).
    pub fn fill_nulls(&self, method: FillMethod, columns: &[&str]) -> Self {
        self.then(Operator::FillNulls { method, columns: strings(columns) })
    }

    /// Joins with `other` on `left_key == right_key`.
    pub fn merge(&self, other: &RowBatch, left_key: &str, right_key: &str, mode: MergeMode) -> Self {
        self.then(Operator::Merge {
            other: other.clone(),
            left_key: left_key.to_string(),
            right_key: right_key.to_string(),
            mode,
        })
    }

    /// Unpivots every column except `fixed_columns` into (name, value) rows.
    pub fn melt(&self, fixed_columns: &[&str], name_column: &str, value_column: &str) -> Self {
        self.then(Operator::Melt {
            fixed_columns: strings(fixed_columns),
            name_column: name_column.to_string(),
            value_column: value_column.to_string(),
        })
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}
