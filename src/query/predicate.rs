//! Row filters.

use crate::batch::RowBatch;
use crate::error::Result;
use crate::query::expr::Expr;
use crate::schema::Schema;
use crate::value::Value;
use std::cmp::Ordering;

/// Comparison used by `where_cmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEqual,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEqual,
}

impl ComparisonOperator {
    /// Applies the operator to two values.
    ///
    /// Nulls only satisfy `Equal` against null (and `NotEqual` against non-null).
    /// Values of unrelated types are never ordered.
    pub fn test(&self, cell: &Value, operand: &Value) -> bool {
        if cell.is_null() || operand.is_null() {
            let both = cell.is_null() && operand.is_null();
            return match self {
                ComparisonOperator::Equal => both,
                ComparisonOperator::NotEqual => !both,
                _ => false,
            };
        }
        let comparable = cell.is_numeric() && operand.is_numeric()
            || std::mem::discriminant(cell) == std::mem::discriminant(operand);
        if !comparable {
            return *self == ComparisonOperator::NotEqual;
        }
        let ord = cell.cmp(operand);
        match self {
            ComparisonOperator::Equal => ord == Ordering::Equal,
            ComparisonOperator::NotEqual => ord != Ordering::Equal,
            ComparisonOperator::GreaterThan => ord == Ordering::Greater,
            ComparisonOperator::GreaterThanOrEqual => ord != Ordering::Less,
            ComparisonOperator::LessThan => ord == Ordering::Less,
            ComparisonOperator::LessThanOrEqual => ord != Ordering::Greater,
        }
    }
}

/// A filter condition as written in a plan (columns by name).
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// `column <op> value`
    Compare {
        /// Column name.
        column: String,
        /// Comparison.
        op: ComparisonOperator,
        /// Right-hand operand.
        value: Value,
    },
    /// String column contains a substring.
    Contains {
        /// Column name.
        column: String,
        /// Substring.
        pattern: String,
    },
    /// String column starts with a prefix.
    StartsWith {
        /// Column name.
        column: String,
        /// Prefix.
        pattern: String,
    },
    /// String column ends with a suffix.
    EndsWith {
        /// Column name.
        column: String,
        /// Suffix.
        pattern: String,
    },
    /// A boolean expression in the Compute language.
    Expression(String),
}

impl Predicate {
    /// Resolves column names against `schema`.
    pub(crate) fn bind(&self, schema: &Schema) -> Result<BoundPredicate> {
        Ok(match self {
            Predicate::Compare { column, op, value } => {
                BoundPredicate::Compare { column: schema.require(column)?, op: *op, value: value.clone() }
            }
            Predicate::Contains { column, pattern } => BoundPredicate::Text {
                column: schema.require(column)?,
                kind: TextMatch::Contains,
                pattern: pattern.clone(),
            },
            Predicate::StartsWith { column, pattern } => BoundPredicate::Text {
                column: schema.require(column)?,
                kind: TextMatch::StartsWith,
                pattern: pattern.clone(),
            },
            Predicate::EndsWith { column, pattern } => BoundPredicate::Text {
                column: schema.require(column)?,
                kind: TextMatch::EndsWith,
                pattern: pattern.clone(),
            },
            Predicate::Expression(source) => BoundPredicate::Expression(Expr::compile(source, schema)?),
        })
    }

    /// `Some((column, key))` for an equality test usable as an index lookup.
    pub(crate) fn point_lookup(&self) -> Option<(&str, &Value)> {
        match self {
            Predicate::Compare { column, op: ComparisonOperator::Equal, value } if !value.is_null() => {
                Some((column.as_str(), value))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextMatch {
    Contains,
    StartsWith,
    EndsWith,
}

/// A predicate with columns resolved to positions.
#[derive(Debug, Clone)]
pub(crate) enum BoundPredicate {
    Compare { column: usize, op: ComparisonOperator, value: Value },
    Text { column: usize, kind: TextMatch, pattern: String },
    Expression(Expr),
}

/// Read access to one row, whatever its physical layout.
pub(crate) trait RowView {
    fn cell(&self, column: usize) -> &Value;
}

impl RowView for [Value] {
    fn cell(&self, column: usize) -> &Value {
        self.get(column).unwrap_or(&Value::Null)
    }
}

impl RowView for Vec<Value> {
    fn cell(&self, column: usize) -> &Value {
        self.as_slice().cell(column)
    }
}

/// A row of a [`RowBatch`].
pub(crate) struct BatchRow<'a> {
    pub batch: &'a RowBatch,
    pub row: usize,
}

impl RowView for BatchRow<'_> {
    fn cell(&self, column: usize) -> &Value {
        self.batch.get(self.row, column).unwrap_or(&Value::Null)
    }
}

impl BoundPredicate {
    pub(crate) fn matches<R: RowView + ?Sized>(&self, row: &R) -> Result<bool> {
        Ok(match self {
            BoundPredicate::Compare { column, op, value } => op.test(row.cell(*column), value),
            BoundPredicate::Text { column, kind, pattern } => match row.cell(*column) {
                Value::String(s) => match kind {
                    TextMatch::Contains => s.contains(pattern.as_str()),
                    TextMatch::StartsWith => s.starts_with(pattern.as_str()),
                    TextMatch::EndsWith => s.ends_with(pattern.as_str()),
                },
                _ => false,
            },
            BoundPredicate::Expression(expr) => expr.eval(row)?.as_bool().unwrap_or(false),
        })
    }
}

/// A conjunction of bound predicates.
#[derive(Debug, Clone, Default)]
pub(crate) struct RowFilter {
    predicates: Vec<BoundPredicate>,
}

impl RowFilter {
    pub(crate) fn bind(predicates: &[Predicate], schema: &Schema) -> Result<Self> {
        let predicates = predicates.iter().map(|p| p.bind(schema)).collect::<Result<Vec<_>>>()?;
        Ok(Self { predicates })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub(crate) fn matches<R: RowView + ?Sized>(&self, row: &R) -> Result<bool> {
        for predicate in &self.predicates {
            if !predicate.matches(row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Keeps the rows of `batch` that pass every predicate.
    pub(crate) fn apply(&self, batch: &RowBatch) -> Result<RowBatch> {
        if self.is_empty() {
            return Ok(batch.clone());
        }
        let mut keep = Vec::new();
        for row in 0..batch.row_count() {
            if self.matches(&BatchRow { batch, row })? {
                keep.push(row);
            }
        }
        Ok(batch.take(&keep))
    }
}
