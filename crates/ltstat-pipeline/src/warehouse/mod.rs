//! Warehouse bulk loads
//!
//! A load takes delimited bytes plus an explicit column schema and replaces
//! (or fills) one table in one dataset. [`Warehouse::bulk_load`] submits the
//! job and returns a [`LoadJob`] handle; [`LoadJob::await_result`] waits for
//! the terminal state. Implementations run the job on the tokio runtime so
//! submission never blocks on the load itself.
//!
//! - [`postgres::PostgresWarehouse`]: one schema per dataset, loads through
//!   `COPY ... FROM STDIN` inside a transaction
//! - [`memory::MemoryWarehouse`]: in-process tables for tests and dry runs

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::registry::{ColumnSchema, ColumnType};
use crate::table::{delimiter_byte, Value};

pub use memory::MemoryWarehouse;
pub use postgres::PostgresWarehouse;

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("no schema given for {table} and autodetect is off")]
    MissingSchema { table: String },

    #[error("invalid load source: {0}")]
    InvalidSource(String),

    #[error("source row {row} has {found} fields, schema has {expected}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("invalid value {value:?} for column '{column}' at source row {row}: {reason}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
        reason: String,
    },

    #[error("table {table} already contains data")]
    NotEmpty { table: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("load job aborted: {0}")]
    JobAborted(String),
}

/// What happens to existing table contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace table schema and contents in one step
    WriteTruncate,
    /// Load only into a missing or empty table
    WriteEmpty,
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteDisposition::WriteTruncate => f.write_str("WRITE_TRUNCATE"),
            WriteDisposition::WriteEmpty => f.write_str("WRITE_EMPTY"),
        }
    }
}

/// A CSV bulk load
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub dataset: String,
    pub table: String,
    /// Where the source bytes were staged, for logs and reports
    pub source_uri: String,
    pub source: Vec<u8>,
    pub field_delimiter: char,
    pub schema: Vec<ColumnSchema>,
    pub write_disposition: WriteDisposition,
    pub skip_leading_rows: usize,
    pub autodetect: bool,
}

impl LoadRequest {
    /// Full overwrite from CSV with one header row. Autodetect is on only
    /// when no schema is given.
    pub fn csv_overwrite(
        dataset: impl Into<String>,
        table: impl Into<String>,
        source_uri: impl Into<String>,
        source: Vec<u8>,
        field_delimiter: char,
        schema: Vec<ColumnSchema>,
    ) -> Self {
        let autodetect = schema.is_empty();
        Self {
            dataset: dataset.into(),
            table: table.into(),
            source_uri: source_uri.into(),
            source,
            field_delimiter,
            schema,
            write_disposition: WriteDisposition::WriteTruncate,
            skip_leading_rows: 1,
            autodetect,
        }
    }

    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.dataset, self.table)
    }

    fn reader(&self) -> Result<csv::Reader<&[u8]>, WarehouseError> {
        let delimiter = delimiter_byte(self.field_delimiter)
            .map_err(|e| WarehouseError::InvalidSource(e.to_string()))?;
        Ok(csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(self.source.as_slice()))
    }

    /// The explicit schema, or with autodetect every name of the first
    /// source row typed as STRING
    pub fn effective_schema(&self) -> Result<Vec<ColumnSchema>, WarehouseError> {
        if !self.schema.is_empty() {
            return Ok(self.schema.clone());
        }
        if !self.autodetect {
            return Err(WarehouseError::MissingSchema {
                table: self.qualified_table(),
            });
        }

        let mut reader = self.reader()?;
        let mut header = csv::StringRecord::new();
        let found = reader
            .read_record(&mut header)
            .map_err(|e| WarehouseError::InvalidSource(e.to_string()))?;
        if !found {
            return Err(WarehouseError::InvalidSource(
                "empty source, nothing to detect a schema from".to_string(),
            ));
        }

        Ok(header
            .iter()
            .map(|name| ColumnSchema::new(name, ColumnType::String))
            .collect())
    }

    /// Source rows after the skipped leading rows, typed per `schema`.
    /// Empty fields are nulls.
    pub(crate) fn read_records(
        &self,
        schema: &[ColumnSchema],
    ) -> Result<Vec<Vec<Value>>, WarehouseError> {
        let mut records = Vec::new();

        for (index, record) in self.reader()?.records().enumerate() {
            let record = record.map_err(|e| WarehouseError::InvalidSource(e.to_string()))?;
            if index < self.skip_leading_rows {
                continue;
            }
            let row = index + 1;

            if record.len() != schema.len() {
                return Err(WarehouseError::RowWidth {
                    row,
                    expected: schema.len(),
                    found: record.len(),
                });
            }

            let values = record
                .iter()
                .zip(schema)
                .map(|(field, column)| {
                    let raw = if field.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(field.to_string())
                    };
                    column
                        .data_type
                        .coerce(&raw)
                        .map_err(|reason| WarehouseError::InvalidValue {
                            column: column.name.clone(),
                            row,
                            value: field.to_string(),
                            reason,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;

            records.push(values);
        }

        Ok(records)
    }
}

/// Terminal state of a successful load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadOutcome {
    pub job_id: Uuid,
    pub dataset: String,
    pub table: String,
    pub rows_loaded: u64,
}

/// Handle to a submitted load
#[derive(Debug)]
pub struct LoadJob {
    id: Uuid,
    handle: JoinHandle<Result<LoadOutcome, WarehouseError>>,
}

impl LoadJob {
    /// Run `work` on the runtime as a new job
    pub fn spawn<F>(work: impl FnOnce(Uuid) -> F) -> Self
    where
        F: std::future::Future<Output = Result<LoadOutcome, WarehouseError>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        Self {
            id,
            handle: tokio::spawn(work(id)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the job to finish, successfully or not
    pub async fn await_result(self) -> Result<LoadOutcome, WarehouseError> {
        self.handle
            .await
            .map_err(|e| WarehouseError::JobAborted(e.to_string()))?
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn bulk_load(&self, request: LoadRequest) -> Result<LoadJob, WarehouseError>;
}
