//! Column definitions and schemas.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    /// 32-bit signed integer.
    Integer = 1,
    /// 64-bit signed integer.
    Long = 2,
    /// 64-bit float.
    Float = 3,
    /// Decimal, stored as a 64-bit float.
    Decimal = 4,
    /// UTF-8 string.
    String = 5,
    /// Boolean.
    Boolean = 6,
    /// Milliseconds since the Unix epoch.
    DateTime = 7,
}

impl DataType {
    /// Decodes the on-disk type tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(DataType::Integer),
            2 => Some(DataType::Long),
            3 => Some(DataType::Float),
            4 => Some(DataType::Decimal),
            5 => Some(DataType::String),
            6 => Some(DataType::Boolean),
            7 => Some(DataType::DateTime),
            _ => None,
        }
    }

    /// Returns true for types that aggregate numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Integer | DataType::Long | DataType::Float | DataType::Decimal)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Integer => "Integer",
            DataType::Long => "Long",
            DataType::Float => "Float",
            DataType::Decimal => "Decimal",
            DataType::String => "String",
            DataType::Boolean => "Boolean",
            DataType::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name, unique within a schema.
    pub name: String,
    /// Logical type of the column's values.
    pub data_type: DataType,
    /// Whether the column accepts nulls.
    pub nullable: bool,
}

impl Column {
    /// Creates a nullable column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type, nullable: true }
    }

    /// Marks the column as non-nullable.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Ordered set of columns with a name lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Column>", into = "Vec<Column>")]
pub struct Schema {
    columns: Vec<Column>,
    by_name: HashMap<String, usize>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schema from columns, rejecting duplicate names.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self> {
        let mut schema = Schema::new();
        for column in columns {
            schema.add_column(column)?;
        }
        Ok(schema)
    }

    /// Appends a column.
    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if column.name.is_empty() {
            return Err(Error::invalid_argument("column name must not be empty"));
        }
        if self.by_name.contains_key(&column.name) {
            return Err(Error::schema_mismatch(format!("duplicate column '{}'", column.name)));
        }
        self.by_name.insert(column.name.clone(), self.columns.len());
        self.columns.push(column);
        Ok(())
    }

    /// Builder-style [`Schema::add_column`] for literals known to be unique.
    pub fn with_column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        let name = name.into();
        if !self.by_name.contains_key(&name) {
            self.by_name.insert(name.clone(), self.columns.len());
            self.columns.push(Column::new(name, data_type));
        }
        self
    }

    /// Position of a column by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Position of a column by name, or `Error::ColumnNotFound`.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| Error::ColumnNotFound(name.to_string()))
    }

    /// Column at a position.
    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Column by name.
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.index_of(name).and_then(|i| self.columns.get(i))
    }

    /// All columns in order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Checks arity, types and nullability, returning the row in stored representation.
    pub fn validate_row(&self, values: &[Value]) -> Result<Vec<Value>> {
        if values.len() != self.columns.len() {
            return Err(Error::schema_mismatch(format!(
                "expected {} values, got {}",
                self.columns.len(),
                values.len()
            )));
        }
        values
            .iter()
            .zip(&self.columns)
            .map(|(value, column)| self.validate_value(column, value))
            .collect()
    }

    fn validate_value(&self, column: &Column, value: &Value) -> Result<Value> {
        if value.is_null() {
            if !column.nullable {
                return Err(Error::schema_mismatch(format!(
                    "column '{}' is not nullable",
                    column.name
                )));
            }
            return Ok(Value::Null);
        }
        value.coerce_to(column.data_type).ok_or_else(|| {
            Error::schema_mismatch(format!(
                "value {:?} does not fit column '{}' of type {}",
                value, column.name, column.data_type
            ))
        })
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for Schema {}

impl From<Vec<Column>> for Schema {
    fn from(columns: Vec<Column>) -> Self {
        let by_name = columns.iter().enumerate().map(|(i, c)| (c.name.clone(), i)).collect();
        Self { columns, by_name }
    }
}

impl From<Schema> for Vec<Column> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employees() -> Schema {
        Schema::from_columns(vec![
            Column::new("Id", DataType::Integer).not_null(),
            Column::new("Name", DataType::String),
            Column::new("Salary", DataType::Decimal),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let schema = employees();
        assert_eq!(schema.index_of("Name"), Some(1));
        assert!(matches!(schema.require("Missing"), Err(Error::ColumnNotFound(_))));
        assert_eq!(schema.column_names(), vec!["Id", "Name", "Salary"]);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut schema = employees();
        assert!(schema.add_column(Column::new("Id", DataType::Long)).is_err());
    }

    #[test]
    fn test_validate_row() {
        let schema = employees();
        let row = schema
            .validate_row(&[Value::Long(1), Value::from("Ann"), Value::Integer(50)])
            .unwrap();
        assert!(matches!(row[0], Value::Integer(1)));
        assert!(matches!(row[2], Value::Float(f) if f == 50.0));

        assert!(schema.validate_row(&[Value::Null, Value::Null, Value::Null]).is_err());
        assert!(schema.validate_row(&[Value::Integer(1)]).is_err());
        assert!(schema
            .validate_row(&[Value::Integer(1), Value::Boolean(true), Value::Null])
            .is_err());
    }

    #[test]
    fn test_serde_rebuilds_lookup() {
        let schema = employees();
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
        assert_eq!(back.index_of("Salary"), Some(2));
    }
}
