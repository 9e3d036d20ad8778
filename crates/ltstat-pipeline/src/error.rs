//! Pipeline error taxonomy
//!
//! Every variant is scoped to one archive source or one staged file. The
//! driver records them per source/file and keeps going; nothing here aborts
//! a whole run.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::fetch::FetchError;
use crate::staging::StorageError;
use crate::table::TableError;
use crate::transform::TransformError;
use crate::warehouse::WarehouseError;

/// Result type alias for per-file and per-source pipeline steps
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The archive could not be downloaded
    #[error("Failed to fetch archive source '{source_name}': {cause}")]
    FetchFailed {
        source_name: String,
        #[source]
        cause: FetchError,
    },

    /// No registry entry or no transform for the file
    #[error("No configuration registered for '{file_name}'")]
    NotConfigured { file_name: String },

    /// Raw or transformed columns do not line up with what the file expects
    #[error(
        "Schema mismatch for '{file_name}': missing columns [{}], unexpected columns [{}]",
        .missing_columns.join(", "),
        .unexpected_columns.join(", ")
    )]
    SchemaMismatch {
        file_name: String,
        missing_columns: Vec<String>,
        unexpected_columns: Vec<String>,
    },

    /// Transformed columns are all present but not in schema order
    #[error(
        "Column order mismatch for '{file_name}': expected [{}], found [{}]",
        .expected.join(", "),
        .found.join(", ")
    )]
    ColumnOrderMismatch {
        file_name: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    /// The warehouse load job ended in error
    #[error("Warehouse load failed for '{file_name}': {cause}")]
    LoadFailed {
        file_name: String,
        #[source]
        cause: WarehouseError,
    },

    #[error("Failed to extract archive from source '{source_name}': {cause}")]
    Archive {
        source_name: String,
        #[source]
        cause: ArchiveError,
    },

    #[error("Staging store error on '{key}': {cause}")]
    Staging {
        key: String,
        #[source]
        cause: StorageError,
    },

    /// Two archive members resolve to the same staged key
    #[error("Archive members [{}] would all be staged as '{key}'", .members.join(", "))]
    StagedKeyCollision { key: String, members: Vec<String> },

    #[error("Failed to parse staged file '{file_name}': {cause}")]
    Parse {
        file_name: String,
        #[source]
        cause: TableError,
    },

    #[error("Transform of '{file_name}' failed: {cause}")]
    Transform {
        file_name: String,
        #[source]
        cause: TransformError,
    },
}

impl PipelineError {
    /// Short machine-readable name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::FetchFailed { .. } => "fetch_failed",
            PipelineError::NotConfigured { .. } => "not_configured",
            PipelineError::SchemaMismatch { .. } | PipelineError::ColumnOrderMismatch { .. } => {
                "schema_mismatch"
            },
            PipelineError::LoadFailed { .. } => "load_failed",
            PipelineError::Archive { .. } => "archive",
            PipelineError::Staging { .. } | PipelineError::StagedKeyCollision { .. } => "staging",
            PipelineError::Parse { .. } => "parse",
            PipelineError::Transform { .. } => "transform",
        }
    }

    pub fn not_configured(file_name: impl Into<String>) -> Self {
        PipelineError::NotConfigured {
            file_name: file_name.into(),
        }
    }

    /// Classify a transform failure: column-level problems become
    /// `SchemaMismatch`, everything else stays a `Transform` error.
    pub fn from_transform(file_name: &str, cause: TransformError) -> Self {
        match cause {
            TransformError::Table(TableError::MissingColumns(missing)) => {
                PipelineError::SchemaMismatch {
                    file_name: file_name.to_string(),
                    missing_columns: missing,
                    unexpected_columns: Vec::new(),
                }
            },
            TransformError::Table(TableError::ColumnMismatch { missing, unexpected }) => {
                PipelineError::SchemaMismatch {
                    file_name: file_name.to_string(),
                    missing_columns: missing,
                    unexpected_columns: unexpected,
                }
            },
            TransformError::Table(TableError::ColumnOrder { expected, found }) => {
                PipelineError::ColumnOrderMismatch {
                    file_name: file_name.to_string(),
                    expected,
                    found,
                }
            },
            cause => PipelineError::Transform {
                file_name: file_name.to_string(),
                cause,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_columns_classify_as_schema_mismatch() {
        let err = PipelineError::from_transform(
            "employees_salaries_raw.csv",
            TransformError::Table(TableError::MissingColumns(vec!["Mėnuo (month)".into()])),
        );

        match &err {
            PipelineError::SchemaMismatch {
                file_name,
                missing_columns,
                ..
            } => {
                assert_eq!(file_name, "employees_salaries_raw.csv");
                assert_eq!(missing_columns, &vec!["Mėnuo (month)".to_string()]);
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), "schema_mismatch");
        assert!(err.to_string().contains("Mėnuo (month)"));
    }

    #[test]
    fn test_value_errors_stay_transform_errors() {
        let err = PipelineError::from_transform(
            "employees_salaries_raw.csv",
            TransformError::InvalidValue {
                column: "Mėnuo (month)".into(),
                row: 3,
                value: "2023-13".into(),
                reason: "expected YYYYMM".into(),
            },
        );
        assert_eq!(err.kind(), "transform");
    }

    #[test]
    fn test_column_order_classifies_as_schema_mismatch() {
        let err = PipelineError::from_transform(
            "employees_salaries_raw.csv",
            TransformError::Table(TableError::ColumnOrder {
                expected: vec!["kodas".into(), "periodas".into()],
                found: vec!["periodas".into(), "kodas".into()],
            }),
        );

        assert!(matches!(err, PipelineError::ColumnOrderMismatch { .. }));
        assert_eq!(err.kind(), "schema_mismatch");
        assert!(err.to_string().contains("expected [kodas, periodas]"));
    }
}
