//! In-memory tables
//!
//! [`Table`] is a small column-named, row-major table of [`Value`]s with the
//! handful of frame operations the transforms need (select, filter nulls,
//! reorder, derive, drop, rename). [`RawTable`] wraps a table freshly parsed
//! from staged bytes; [`TransformedTable`] wraps transform output until it
//! is conformed to the target schema.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::registry::ColumnSchema;
use crate::transform::TransformError;

/// Markers read as nulls in staged delimited files, in addition to empty cells
pub const NULL_MARKERS: &[&str] = &[
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("columns out of schema order (expected: [{}], found: [{}])", .expected.join(", "), .found.join(", "))]
    ColumnOrder {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("columns differ from schema (missing: [{}], unexpected: [{}])", .missing.join(", "), .unexpected.join(", "))]
    ColumnMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),

    #[error("row {row} has {found} fields, expected {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("delimiter {0:?} is not a single-byte character")]
    InvalidDelimiter(char),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single cell
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl Value {
    /// Cell from raw delimited text, mapping empty cells and null markers to `Null`
    pub fn from_raw(cell: &str) -> Self {
        if cell.is_empty() || NULL_MARKERS.contains(&cell) {
            Value::Null
        } else {
            Value::Text(cell.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    /// Rendering used for CSV output; `Null` renders as an empty field
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => f.write_str(s),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Result<Self, TableError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.as_str()) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
        }
        Ok(Self {
            columns,
            rows: Vec::new(),
        })
    }

    pub fn push_row(&mut self, row: Vec<Value>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                row: self.rows.len() + 1,
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of one column, top to bottom
    pub fn column_values(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[idx]).collect())
    }

    /// Names from `wanted` that this table does not have, in `wanted` order
    pub fn missing_columns(&self, wanted: &[&str]) -> Vec<String> {
        wanted
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .map(|name| name.to_string())
            .collect()
    }

    fn index_of(&self, name: &str) -> Result<usize, TableError> {
        self.column_index(name)
            .ok_or_else(|| TableError::MissingColumns(vec![name.to_string()]))
    }

    /// Project onto `columns`, in that order
    pub fn select(self, columns: &[&str]) -> Result<Self, TableError> {
        let missing = self.missing_columns(columns);
        if !missing.is_empty() {
            return Err(TableError::MissingColumns(missing));
        }

        let indices: Vec<usize> = columns
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect();
        let mut selected = Table::new(columns.iter().map(|c| c.to_string()).collect())?;
        selected.rows = self
            .rows
            .into_iter()
            .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
            .collect();

        Ok(selected)
    }

    /// Drop every row whose `column` is null
    pub fn drop_nulls(mut self, column: &str) -> Result<Self, TableError> {
        let idx = self.index_of(column)?;
        self.rows.retain(|row| !row[idx].is_null());
        Ok(self)
    }

    /// Move `column` to position 0, keeping the relative order of the rest
    pub fn move_to_front(mut self, column: &str) -> Result<Self, TableError> {
        let idx = self.index_of(column)?;
        let name = self.columns.remove(idx);
        self.columns.insert(0, name);
        for row in &mut self.rows {
            let value = row.remove(idx);
            row.insert(0, value);
        }
        Ok(self)
    }

    /// Append a column computed from `source` for every row
    pub fn derive_column<E, F>(mut self, source: &str, target: &str, mut f: F) -> Result<Self, E>
    where
        E: From<TableError>,
        F: FnMut(usize, &Value) -> Result<Value, E>,
    {
        let idx = self.index_of(source)?;
        if self.column_index(target).is_some() {
            return Err(TableError::DuplicateColumn(target.to_string()).into());
        }

        for (row_number, row) in self.rows.iter_mut().enumerate() {
            let derived = f(row_number + 1, &row[idx])?;
            row.push(derived);
        }
        self.columns.push(target.to_string());

        Ok(self)
    }

    pub fn drop_column(mut self, column: &str) -> Result<Self, TableError> {
        let idx = self.index_of(column)?;
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        Ok(self)
    }

    /// Rename columns by `(from, to)` pairs; every `from` must exist
    pub fn rename(mut self, renames: &[(&str, &str)]) -> Result<Self, TableError> {
        let missing: Vec<String> = renames
            .iter()
            .filter(|(from, _)| self.column_index(from).is_none())
            .map(|(from, _)| from.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TableError::MissingColumns(missing));
        }

        for (from, to) in renames {
            if let Some(idx) = self.column_index(from) {
                self.columns[idx] = to.to_string();
            }
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.as_str()) {
                return Err(TableError::DuplicateColumn(column.clone()));
            }
        }

        Ok(self)
    }

    /// Delimited text with a header row
    pub fn to_csv(&self, delimiter: char) -> Result<Vec<u8>, TableError> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter_byte(delimiter)?)
            .from_writer(Vec::new());

        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|v| v.to_string()))?;
        }

        writer
            .into_inner()
            .map_err(|e| TableError::Io(e.into_error()))
    }
}

pub(crate) fn delimiter_byte(delimiter: char) -> Result<u8, TableError> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(TableError::InvalidDelimiter(delimiter))
    }
}

/// A table materialized from staged bytes; every non-null cell is `Value::Text`
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable(Table);

impl RawTable {
    /// Parse UTF-8 delimited bytes whose first record is the header
    pub fn parse(bytes: &[u8], delimiter: char) -> Result<Self, TableError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter_byte(delimiter)?)
            .has_headers(true)
            .flexible(false)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = Table::new(headers)?;

        for record in reader.records() {
            let record = record?;
            table.push_row(record.iter().map(Value::from_raw).collect())?;
        }

        Ok(Self(table))
    }

    pub fn table(&self) -> &Table {
        &self.0
    }

    pub fn into_table(self) -> Table {
        self.0
    }
}

impl From<Table> for RawTable {
    fn from(table: Table) -> Self {
        Self(table)
    }
}

/// Output of a table transform, not yet checked against the target schema
#[derive(Debug, Clone, PartialEq)]
pub struct TransformedTable(Table);

impl TransformedTable {
    pub fn new(table: Table) -> Self {
        Self(table)
    }

    pub fn table(&self) -> &Table {
        &self.0
    }

    pub fn columns(&self) -> &[String] {
        self.0.columns()
    }

    pub fn num_rows(&self) -> usize {
        self.0.num_rows()
    }

    /// Check the columns against `schema` and coerce every cell to the
    /// declared type.
    ///
    /// Columns must match the schema by name and position.
    pub fn conform(self, schema: &[ColumnSchema]) -> Result<Table, TransformError> {
        let wanted: Vec<&str> = schema.iter().map(|c| c.name.as_str()).collect();
        let missing = self.0.missing_columns(&wanted);
        let unexpected: Vec<String> = self
            .0
            .columns()
            .iter()
            .filter(|c| !wanted.contains(&c.as_str()))
            .cloned()
            .collect();

        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(TableError::ColumnMismatch {
                missing,
                unexpected,
            }
            .into());
        }

        if self.0.columns().iter().map(String::as_str).ne(wanted.iter().copied()) {
            return Err(TableError::ColumnOrder {
                expected: wanted.iter().map(|c| c.to_string()).collect(),
                found: self.0.columns().to_vec(),
            }
            .into());
        }

        let mut table = self.0;
        for (row_number, row) in table.rows.iter_mut().enumerate() {
            for (value, column) in row.iter_mut().zip(schema) {
                let coerced = column.data_type.coerce(value).map_err(|reason| {
                    TransformError::InvalidValue {
                        column: column.name.clone(),
                        row: row_number + 1,
                        value: value.to_string(),
                        reason,
                    }
                })?;
                *value = coerced;
            }
        }

        Ok(table)
    }
}
