//! Columnar row batches and the batch source/sink capabilities.
//!
//! A [`RowBatch`] is the unit exchanged with everything outside the store: it is the
//! input of `append_batch` and the output of query execution. Columns are held behind
//! `Arc`, so projections and operators that leave a column untouched share its buffer.

use crate::error::{Error, Result};
use crate::schema::{Column, DataType, Schema};
use crate::value::Value;
use std::sync::Arc;

/// An ordered schema plus one value vector per column.
#[derive(Debug, Clone, Default)]
pub struct RowBatch {
    schema: Schema,
    columns: Vec<Arc<Vec<Value>>>,
    row_count: usize,
}

impl RowBatch {
    /// Creates an empty batch with the given schema.
    pub fn new(schema: Schema) -> Self {
        let columns = (0..schema.len()).map(|_| Arc::new(Vec::new())).collect();
        Self { schema, columns, row_count: 0 }
    }

    /// Builds a batch from rows, validating each one against the schema.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut batch = RowBatch::new(schema);
        for row in rows {
            batch.push_row(row)?;
        }
        Ok(batch)
    }

    /// Builds a batch from column vectors. All columns must have equal length.
    pub fn from_columns(schema: Schema, columns: Vec<Arc<Vec<Value>>>) -> Result<Self> {
        if columns.len() != schema.len() {
            return Err(Error::schema_mismatch(format!(
                "schema has {} columns, got {} value vectors",
                schema.len(),
                columns.len()
            )));
        }
        let row_count = columns.first().map(|c| c.len()).unwrap_or(0);
        if columns.iter().any(|c| c.len() != row_count) {
            return Err(Error::schema_mismatch("column vectors differ in length"));
        }
        Ok(Self { schema, columns, row_count })
    }

    /// Appends a row after validating it.
    pub fn push_row(&mut self, values: Vec<Value>) -> Result<()> {
        let values = self.schema.validate_row(&values)?;
        for (column, value) in self.columns.iter_mut().zip(values) {
            Arc::make_mut(column).push(value);
        }
        self.row_count += 1;
        Ok(())
    }

    /// Adds a column. Only allowed while the batch has no rows.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.row_count > 0 {
            return Err(Error::schema_mismatch("cannot add a column to a non-empty batch"));
        }
        self.schema.add_column(column)?;
        self.columns.push(Arc::new(Vec::new()));
        Ok(())
    }

    /// The batch schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Returns true if the schema has a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.schema.index_of(name).is_some()
    }

    /// Values of a column by name.
    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.schema.index_of(name).map(|i| self.columns[i].as_slice())
    }

    /// Values of a column by position.
    pub fn column_at(&self, index: usize) -> Option<&[Value]> {
        self.columns.get(index).map(|c| c.as_slice())
    }

    pub(crate) fn column_arc(&self, index: usize) -> Arc<Vec<Value>> {
        Arc::clone(&self.columns[index])
    }

    /// A single cell by row and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.schema.index_of(column)?;
        self.columns[index].get(row)
    }

    /// A single cell by row and column position.
    pub fn get(&self, row: usize, column: usize) -> Option<&Value> {
        self.columns.get(column)?.get(row)
    }

    /// Copies one row out of the batch.
    pub fn row(&self, row: usize) -> Option<Vec<Value>> {
        if row >= self.row_count {
            return None;
        }
        Some(self.columns.iter().map(|c| c[row].clone()).collect())
    }

    /// Iterates over all rows, copying each.
    pub fn rows(&self) -> impl Iterator<Item = Vec<Value>> + '_ {
        (0..self.row_count).map(move |i| self.columns.iter().map(|c| c[i].clone()).collect())
    }

    /// Keeps only the named columns, in the given order. Column buffers are shared.
    pub fn project(&self, names: &[&str]) -> Result<RowBatch> {
        let mut schema = Schema::new();
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let index = self.schema.require(name)?;
            schema.add_column(self.schema.columns()[index].clone())?;
            columns.push(Arc::clone(&self.columns[index]));
        }
        Ok(RowBatch { schema, columns, row_count: self.row_count })
    }

    /// Gathers the given rows, in the given order, into a new batch.
    pub fn take(&self, indices: &[usize]) -> RowBatch {
        let columns = self
            .columns
            .iter()
            .map(|c| Arc::new(indices.iter().map(|&i| c[i].clone()).collect::<Vec<_>>()))
            .collect();
        RowBatch { schema: self.schema.clone(), columns, row_count: indices.len() }
    }

    /// A contiguous range of rows.
    pub fn slice(&self, start: usize, len: usize) -> RowBatch {
        let start = start.min(self.row_count);
        let end = (start + len).min(self.row_count);
        let indices: Vec<usize> = (start..end).collect();
        self.take(&indices)
    }

    /// Returns a batch with `column` added, or replaced if a column of that name exists.
    ///
    /// Replacing keeps the existing column definition's position but takes the new type.
    pub fn with_column(&self, column: Column, values: Vec<Value>) -> Result<RowBatch> {
        if values.len() != self.row_count {
            return Err(Error::schema_mismatch(format!(
                "column '{}' has {} values, batch has {} rows",
                column.name,
                values.len(),
                self.row_count
            )));
        }
        let mut defs = self.schema.columns().to_vec();
        let mut columns = self.columns.clone();
        match self.schema.index_of(&column.name) {
            Some(i) => {
                defs[i] = column;
                columns[i] = Arc::new(values);
            }
            None => {
                defs.push(column);
                columns.push(Arc::new(values));
            }
        }
        Ok(RowBatch { schema: Schema::from(defs), columns, row_count: self.row_count })
    }

    /// Appends every row of `other`, which must have an equal schema.
    pub fn extend(&mut self, other: &RowBatch) -> Result<()> {
        if self.schema != other.schema {
            return Err(Error::schema_mismatch("cannot concatenate batches with different schemas"));
        }
        for (mine, theirs) in self.columns.iter_mut().zip(&other.columns) {
            Arc::make_mut(mine).extend(theirs.iter().cloned());
        }
        self.row_count += other.row_count;
        Ok(())
    }

    /// Opens a cursor over the named columns (all columns when `columns` is empty).
    pub fn cursor(&self, columns: &[&str]) -> Result<RowCursor> {
        RowCursor::new(self.clone(), columns)
    }

    pub(crate) fn from_parts(schema: Schema, columns: Vec<Arc<Vec<Value>>>, row_count: usize) -> Self {
        Self { schema, columns, row_count }
    }
}

/// Infers a column type from its first non-null value, falling back to `fallback`.
pub(crate) fn infer_type(values: &[Value], fallback: DataType) -> DataType {
    values.iter().find_map(|v| v.data_type()).unwrap_or(fallback)
}

/// Forward-only cursor over a batch.
///
/// ```
/// use velocity::{DataType, RowBatch, Schema, Value};
///
/// let schema = Schema::new().with_column("Id", DataType::Integer);
/// let batch = RowBatch::from_rows(schema, vec![vec![Value::Integer(1)]]).unwrap();
/// let mut cursor = batch.cursor(&[]).unwrap();
/// while cursor.move_next() {
///     assert_eq!(cursor.get_value("Id"), Some(&Value::Integer(1)));
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RowCursor {
    batch: RowBatch,
    visible: Vec<usize>,
    position: Option<usize>,
}

impl RowCursor {
    fn new(batch: RowBatch, columns: &[&str]) -> Result<Self> {
        let visible = if columns.is_empty() {
            (0..batch.column_count()).collect()
        } else {
            columns.iter().map(|c| batch.schema.require(c)).collect::<Result<Vec<_>>>()?
        };
        Ok(Self { batch, visible, position: None })
    }

    /// Advances to the next row. Returns false once the rows are exhausted.
    pub fn move_next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.batch.row_count {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.batch.row_count);
            false
        }
    }

    /// Value of a visible column in the current row.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        let row = self.position.filter(|&p| p < self.batch.row_count)?;
        let index = self.batch.schema.index_of(column)?;
        if !self.visible.contains(&index) {
            return None;
        }
        self.batch.columns[index].get(row)
    }

    /// Position of the current row, if the cursor is on a row.
    pub fn current_row(&self) -> Option<usize> {
        self.position.filter(|&p| p < self.batch.row_count)
    }

    /// Names of the columns this cursor exposes.
    pub fn column_names(&self) -> Vec<&str> {
        self.visible.iter().map(|&i| self.batch.schema.columns()[i].name.as_str()).collect()
    }
}

/// Something that produces row batches (file readers, connectors, generators).
pub trait BatchSource {
    /// Returns the next batch of at most `max_rows` rows, or `None` when exhausted.
    fn read_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>>;
}

/// Something that consumes row batches.
pub trait BatchSink {
    /// Consumes one batch.
    fn write_batch(&mut self, batch: &RowBatch) -> Result<()>;
}

/// Serves an in-memory batch in chunks.
#[derive(Debug, Clone)]
pub struct BatchChunks {
    batch: RowBatch,
    position: usize,
}

impl BatchChunks {
    /// Wraps a batch.
    pub fn new(batch: RowBatch) -> Self {
        Self { batch, position: 0 }
    }
}

impl BatchSource for BatchChunks {
    fn read_batch(&mut self, max_rows: usize) -> Result<Option<RowBatch>> {
        if max_rows == 0 {
            return Err(Error::invalid_argument("max_rows must be > 0"));
        }
        if self.position >= self.batch.row_count() {
            return Ok(None);
        }
        let chunk = self.batch.slice(self.position, max_rows);
        self.position += chunk.row_count();
        Ok(Some(chunk))
    }
}

impl BatchSink for RowBatch {
    fn write_batch(&mut self, batch: &RowBatch) -> Result<()> {
        self.extend(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn people() -> RowBatch {
        let schema = Schema::new()
            .with_column("Id", DataType::Integer)
            .with_column("Name", DataType::String)
            .with_column("Age", DataType::Integer);
        RowBatch::from_rows(
            schema,
            vec![row![1, "Ann", 31], row![2, "Bob", 45], row![3, "Cid", Value::Null]],
        )
        .unwrap()
    }

    #[test]
    fn test_basic_access() {
        let batch = people();
        assert_eq!(batch.row_count(), 3);
        assert_eq!(batch.value(1, "Name"), Some(&Value::from("Bob")));
        assert_eq!(batch.row(2).unwrap()[2], Value::Null);
        assert!(batch.row(3).is_none());
    }

    #[test]
    fn test_project_shares_buffers() {
        let batch = people();
        let projected = batch.project(&["Name"]).unwrap();
        assert_eq!(projected.column_count(), 1);
        assert!(Arc::ptr_eq(&batch.column_arc(1), &projected.column_arc(0)));
        assert!(batch.project(&["Nope"]).is_err());
    }

    #[test]
    fn test_cursor_visits_rows() {
        let batch = people();
        let mut cursor = batch.cursor(&["Id", "Age"]).unwrap();
        let mut ids = Vec::new();
        while cursor.move_next() {
            ids.push(cursor.get_value("Id").cloned().unwrap());
            assert!(cursor.get_value("Name").is_none());
        }
        assert_eq!(ids, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
        assert!(!cursor.move_next());
        assert!(cursor.current_row().is_none());
    }

    #[test]
    fn test_with_column_replaces() {
        let batch = people();
        let updated = batch
            .with_column(Column::new("Age", DataType::Float), vec![Value::Float(1.0); 3])
            .unwrap();
        assert_eq!(updated.column_count(), 3);
        assert_eq!(updated.value(0, "Age"), Some(&Value::Float(1.0)));
        assert!(batch.with_column(Column::new("X", DataType::Float), vec![]).is_err());
    }

    #[test]
    fn test_chunks() {
        let mut source = BatchChunks::new(people());
        let mut sizes = Vec::new();
        while let Some(chunk) = source.read_batch(2).unwrap() {
            sizes.push(chunk.row_count());
        }
        assert_eq!(sizes, vec![2, 1]);
    }

    #[test]
    fn test_sink_extends() {
        let mut sink = RowBatch::new(people().schema().clone());
        sink.write_batch(&people()).unwrap();
        sink.write_batch(&people()).unwrap();
        assert_eq!(sink.row_count(), 6);
    }
}
