//! Schema registry
//!
//! Maps a staged file name to how it is parsed and where it lands: the field
//! delimiter, the warehouse table and the ordered column schema. The same
//! file name keys the transform registry, so one key space drives the whole
//! load.
//!
//! The registry is built once at startup, validated, and only read
//! afterwards. It can come from the built-in mappings or from a TOML file:
//!
//! ```toml
//! [[files]]
//! file_name = "employees_salaries_raw.csv"
//! delimiter = ","
//! table_name = "employees_salaries"
//! table_schema = [
//!     { name = "kodas", data_type = "INTEGER" },
//!     { name = "periodas", data_type = "DATE" },
//! ]
//! ```

pub mod mappings;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::table::Value;

pub use mappings::{COMPANIES_CARS_FILE, EMPLOYEES_SALARIES_FILE};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No configuration registered for '{file_name}'")]
    NotConfigured { file_name: String },

    #[error("File '{0}' is registered more than once")]
    DuplicateFile(String),

    #[error("File '{0}' has an empty table schema")]
    EmptySchema(String),

    #[error("File '{0}' has an empty table name")]
    EmptyTableName(String),

    #[error("Column '{column}' appears more than once in the schema of '{file_name}'")]
    DuplicateColumn { file_name: String, column: String },

    #[error("Delimiter {delimiter:?} of '{file_name}' must be a single ASCII character other than a quote or line break")]
    InvalidDelimiter { file_name: String, delimiter: char },

    #[error("Unknown column type '{0}'")]
    UnknownType(String),

    #[error("Failed to read mappings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid mappings file: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Warehouse column types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    #[serde(alias = "INT64")]
    Integer,
    #[serde(alias = "FLOAT64")]
    Float,
    #[serde(alias = "BOOL")]
    Boolean,
    Date,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Integer => "INTEGER",
            ColumnType::Float => "FLOAT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }

    /// Convert a cell to this type. Nulls stay null; the error is a short
    /// human-readable reason.
    pub fn coerce(&self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (ColumnType::String, Value::Text(_)) => Ok(value.clone()),
            (ColumnType::String, other) => Ok(Value::Text(other.to_string())),
            (ColumnType::Integer, Value::Integer(_)) => Ok(value.clone()),
            (ColumnType::Integer, Value::Text(s)) => parse_integer(s).map(Value::Integer),
            (ColumnType::Float, Value::Float(_)) => Ok(value.clone()),
            (ColumnType::Float, Value::Integer(i)) => Ok(Value::Float(*i as f64)),
            (ColumnType::Float, Value::Text(s)) => parse_float(s).map(Value::Float),
            (ColumnType::Boolean, Value::Boolean(_)) => Ok(value.clone()),
            (ColumnType::Boolean, Value::Text(s)) => parse_boolean(s).map(Value::Boolean),
            (ColumnType::Date, Value::Date(_)) => Ok(value.clone()),
            (ColumnType::Date, Value::Timestamp(ts)) => Ok(Value::Date(ts.date())),
            (ColumnType::Date, Value::Text(s)) => parse_date(s).map(Value::Date),
            (ColumnType::Timestamp, Value::Timestamp(_)) => Ok(value.clone()),
            (ColumnType::Timestamp, Value::Date(d)) => Ok(Value::Timestamp(d.and_time(NaiveTime::MIN))),
            (ColumnType::Timestamp, Value::Text(s)) => parse_timestamp(s).map(Value::Timestamp),
            (ty, other) => Err(format!("cannot convert {other:?} to {ty}")),
        }
    }
}

fn parse_integer(s: &str) -> Result<i64, String> {
    let trimmed = s.trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return Ok(i);
    }
    // Whole numbers written with a fractional part ("1234.0")
    match trimmed.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
        _ => Err("expected an integer".to_string()),
    }
}

/// Decimal point only; `"1,234"` is rejected rather than guessed at
fn parse_float(s: &str) -> Result<f64, String> {
    s.trim()
        .parse::<f64>()
        .map_err(|_| "expected a number".to_string())
}

fn parse_boolean(s: &str) -> Result<bool, String> {
    match s.trim().to_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" | "taip" => Ok(true),
        "false" | "f" | "0" | "no" | "n" | "ne" => Ok(false),
        _ => Err("expected a boolean".to_string()),
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d"];

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    let trimmed = s.trim();
    // Dates exported with a midnight time component keep only the date part
    let date_part = trimmed.split([' ', 'T']).next().unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
        .ok_or_else(|| "expected a date (YYYY-MM-DD)".to_string())
}

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    let trimmed = s.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| "expected a timestamp (YYYY-MM-DD HH:MM:SS)".to_string())
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "STRING" => Ok(ColumnType::String),
            "INTEGER" | "INT64" => Ok(ColumnType::Integer),
            "FLOAT" | "FLOAT64" => Ok(ColumnType::Float),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            "DATE" => Ok(ColumnType::Date),
            "TIMESTAMP" => Ok(ColumnType::Timestamp),
            _ => Err(RegistryError::UnknownType(s.to_string())),
        }
    }
}

/// One warehouse column: exact (case-sensitive) name plus type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    #[serde(alias = "type")]
    pub data_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// How one staged file is parsed and loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfiguration {
    pub file_name: String,
    pub delimiter: char,
    pub table_name: String,
    /// Load column order
    pub table_schema: Vec<ColumnSchema>,
}

impl FileConfiguration {
    fn validate(&self) -> Result<(), RegistryError> {
        if self.table_schema.is_empty() {
            return Err(RegistryError::EmptySchema(self.file_name.clone()));
        }
        if self.table_name.trim().is_empty() {
            return Err(RegistryError::EmptyTableName(self.file_name.clone()));
        }
        if !self.delimiter.is_ascii() || matches!(self.delimiter, '"' | '\n' | '\r') {
            return Err(RegistryError::InvalidDelimiter {
                file_name: self.file_name.clone(),
                delimiter: self.delimiter,
            });
        }

        let mut seen = HashSet::new();
        for column in &self.table_schema {
            if !seen.insert(column.name.as_str()) {
                return Err(RegistryError::DuplicateColumn {
                    file_name: self.file_name.clone(),
                    column: column.name.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct MappingsFile {
    files: Vec<FileConfiguration>,
}

/// Immutable file-name → configuration map, iterated in registration order
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entries: Vec<FileConfiguration>,
    index: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new(entries: Vec<FileConfiguration>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            entry.validate()?;
            if index.insert(entry.file_name.clone(), position).is_some() {
                return Err(RegistryError::DuplicateFile(entry.file_name.clone()));
            }
        }
        Ok(Self { entries, index })
    }

    /// Mappings for the Sodra salaries and Regitra vehicle park files
    pub fn builtin() -> Self {
        let entries = mappings::builtin_configurations();
        let index = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.file_name.clone(), position))
            .collect();
        Self { entries, index }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, RegistryError> {
        let file: MappingsFile = toml::from_str(source)?;
        Self::new(file.files)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn lookup(&self, file_name: &str) -> Result<&FileConfiguration, RegistryError> {
        self.index
            .get(file_name)
            .map(|&position| &self.entries[position])
            .ok_or_else(|| RegistryError::NotConfigured {
                file_name: file_name.to_string(),
            })
    }

    pub fn delimiter_for(&self, file_name: &str) -> Result<char, RegistryError> {
        self.lookup(file_name).map(|config| config.delimiter)
    }

    pub fn configurations(&self) -> &[FileConfiguration] {
        &self.entries
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn config(file_name: &str, delimiter: char) -> FileConfiguration {
        FileConfiguration {
            file_name: file_name.to_string(),
            delimiter,
            table_name: "t".to_string(),
            table_schema: vec![ColumnSchema::new("a", ColumnType::String)],
        }
    }

    #[test]
    fn test_builtin_mappings_pass_validation() {
        let validated = SchemaRegistry::new(mappings::builtin_configurations()).unwrap();
        assert_eq!(
            validated.configurations(),
            SchemaRegistry::builtin().configurations()
        );
    }

    #[test]
    fn test_lookup_then_delimiter_for_every_entry() {
        let registry = SchemaRegistry::new(vec![config("a.csv", ','), config("b.csv", ';')]).unwrap();
        for entry in registry.configurations() {
            let found = registry.lookup(&entry.file_name).unwrap();
            assert_eq!(registry.delimiter_for(&found.file_name).unwrap(), entry.delimiter);
        }
    }

    #[test]
    fn test_unknown_file_is_not_configured() {
        let registry = SchemaRegistry::builtin();
        let err = registry.delimiter_for("unknown.csv").unwrap_err();
        assert!(matches!(err, RegistryError::NotConfigured { file_name } if file_name == "unknown.csv"));
    }

    #[test]
    fn test_rejects_duplicates_and_empty_schema() {
        let dup = SchemaRegistry::new(vec![config("a.csv", ','), config("a.csv", ';')]);
        assert!(matches!(dup, Err(RegistryError::DuplicateFile(_))));

        let mut empty = config("a.csv", ',');
        empty.table_schema.clear();
        assert!(matches!(
            SchemaRegistry::new(vec![empty]),
            Err(RegistryError::EmptySchema(_))
        ));
    }

    #[test]
    fn test_rejects_non_ascii_delimiter() {
        let result = SchemaRegistry::new(vec![config("a.csv", '§')]);
        assert!(matches!(result, Err(RegistryError::InvalidDelimiter { .. })));
    }

    #[test]
    fn test_from_toml_accepts_type_aliases() {
        let registry = SchemaRegistry::from_toml_str(
            r#"
            [[files]]
            file_name = "x.csv"
            delimiter = ";"
            table_name = "x"
            table_schema = [
                { name = "id", data_type = "INT64" },
                { name = "ok", type = "BOOL" },
            ]
            "#,
        )
        .unwrap();

        let entry = registry.lookup("x.csv").unwrap();
        assert_eq!(entry.delimiter, ';');
        assert_eq!(entry.table_schema[0].data_type, ColumnType::Integer);
        assert_eq!(entry.table_schema[1].data_type, ColumnType::Boolean);
    }

    #[test]
    fn test_coerce_text_values() {
        let t = |s: &str| Value::Text(s.to_string());
        assert_eq!(ColumnType::Integer.coerce(&t("1234.0")).unwrap(), Value::Integer(1234));
        assert_eq!(ColumnType::Float.coerce(&t(" 12.5 ")).unwrap(), Value::Float(12.5));
        assert!(ColumnType::Float.coerce(&t("12,5")).is_err());
        assert!(ColumnType::Float.coerce(&t("1,234")).is_err());
        assert_eq!(ColumnType::Boolean.coerce(&t("Taip")).unwrap(), Value::Boolean(true));
        assert_eq!(
            ColumnType::Date.coerce(&t("2015.03.12")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2015, 3, 12).unwrap())
        );
        assert_eq!(
            ColumnType::Date.coerce(&t("2015-03-12 00:00:00")).unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2015, 3, 12).unwrap())
        );
        assert!(ColumnType::Integer.coerce(&t("12a")).is_err());
        assert_eq!(ColumnType::Date.coerce(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn test_column_type_round_trips_through_str() {
        for ty in [
            ColumnType::String,
            ColumnType::Integer,
            ColumnType::Float,
            ColumnType::Boolean,
            ColumnType::Date,
            ColumnType::Timestamp,
        ] {
            assert_eq!(ty.as_str().parse::<ColumnType>().unwrap(), ty);
        }
        assert!("GEOGRAPHY".parse::<ColumnType>().is_err());
    }
}
