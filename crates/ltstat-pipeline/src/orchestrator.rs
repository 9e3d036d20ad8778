//! Load orchestrator
//!
//! For each configured file: read the staged raw bytes, parse them with the
//! registered delimiter, run the registered transform, conform the result
//! to the target schema, persist the transformed CSV next to the raw files
//! and bulk-load it into the warehouse with full-overwrite semantics.
//!
//! Files are independent. A failure is recorded in the [`LoadReport`] and
//! the remaining files still load. Files may run concurrently (bounded);
//! the report keeps the order the files were given in.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::registry::{FileConfiguration, RegistryError, SchemaRegistry};
use crate::staging::{content_type_for, object_key, ObjectStore};
use crate::table::RawTable;
use crate::transform::{TransformError, TransformRegistry};
use crate::warehouse::{LoadRequest, Warehouse};

pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 2;

/// Where staged files are read from and loaded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadLocation {
    pub bucket: String,
    /// Folder holding the raw staged files
    pub folder: String,
    /// Folder receiving transformed outputs
    pub temp_folder: String,
    pub dataset: String,
}

/// Everything needed to move one file from the staging store to the warehouse
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub file: FileConfiguration,
    pub bucket: String,
    pub folder: String,
    pub temp_folder: String,
    pub dataset: String,
}

impl UploadConfig {
    pub fn new(file: FileConfiguration, location: &LoadLocation) -> Self {
        Self {
            file,
            bucket: location.bucket.clone(),
            folder: location.folder.clone(),
            temp_folder: location.temp_folder.clone(),
            dataset: location.dataset.clone(),
        }
    }

    /// Key of the raw staged file
    pub fn object_key(&self) -> String {
        object_key(&self.folder, &self.file.file_name)
    }

    /// Key of the transformed output
    pub fn temp_key(&self) -> String {
        object_key(&self.temp_folder, &format!("{}.csv", self.file.table_name))
    }
}

/// A file that made it into the warehouse
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadedFile {
    pub file_name: String,
    pub dataset: String,
    pub table: String,
    pub rows_loaded: u64,
    pub job_id: Uuid,
    /// Staging key of the transformed CSV that was loaded
    pub transformed_key: String,
}

#[derive(Debug)]
pub struct FileOutcome {
    pub file_name: String,
    pub result: Result<LoadedFile>,
}

/// Per-file results, in input order
#[derive(Debug, Default)]
pub struct LoadReport {
    pub files: Vec<FileOutcome>,
}

impl LoadReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        self.files
            .iter()
            .filter_map(|f| f.result.as_ref().err().map(|e| (f.file_name.as_str(), e)))
    }

    pub fn loaded(&self) -> impl Iterator<Item = &LoadedFile> {
        self.files.iter().filter_map(|f| f.result.as_ref().ok())
    }

    pub fn summary(&self) -> LoadSummary {
        LoadSummary {
            succeeded: self.succeeded(),
            failed: self.failed(),
            files: self
                .files
                .iter()
                .map(|f| match &f.result {
                    Ok(loaded) => FileSummary {
                        file_name: f.file_name.clone(),
                        status: "loaded",
                        table: Some(format!("{}.{}", loaded.dataset, loaded.table)),
                        rows_loaded: Some(loaded.rows_loaded),
                        error_kind: None,
                        error: None,
                    },
                    Err(e) => FileSummary {
                        file_name: f.file_name.clone(),
                        status: "failed",
                        table: None,
                        rows_loaded: None,
                        error_kind: Some(e.kind()),
                        error: Some(e.to_string()),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub files: Vec<FileSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file_name: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct LoadOrchestrator {
    registry: Arc<SchemaRegistry>,
    transforms: Arc<TransformRegistry>,
    store: Arc<dyn ObjectStore>,
    warehouse: Arc<dyn Warehouse>,
    location: LoadLocation,
    max_concurrent: usize,
}

impl LoadOrchestrator {
    pub fn new(
        registry: Arc<SchemaRegistry>,
        transforms: Arc<TransformRegistry>,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
        location: LoadLocation,
    ) -> Self {
        Self {
            registry,
            transforms,
            store,
            warehouse,
            location,
            max_concurrent: DEFAULT_MAX_CONCURRENT_LOADS,
        }
    }

    /// Number of files processed at once; at least one
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn location(&self) -> &LoadLocation {
        &self.location
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Load every file the registry knows, in registration order
    pub async fn load_registered(&self) -> LoadReport {
        self.load_all(self.registry.configurations()).await
    }

    /// Load each of `configs` independently
    pub async fn load_all(&self, configs: &[FileConfiguration]) -> LoadReport {
        info!(
            files = configs.len(),
            max_concurrent = self.max_concurrent,
            dataset = %self.location.dataset,
            "Starting load"
        );

        let files: Vec<FileOutcome> = stream::iter(configs)
            .map(|config| async move {
                let result = self.load_file(&config.file_name).await;
                if let Err(e) = &result {
                    error!(file = %config.file_name, kind = e.kind(), "✗ {}", e);
                }
                FileOutcome {
                    file_name: config.file_name.clone(),
                    result,
                }
            })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let report = LoadReport { files };
        info!(
            "Load completed: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    /// Run one file through parse, transform, conform and load
    #[instrument(skip(self), fields(bucket = %self.location.bucket))]
    pub async fn load_file(&self, file_name: &str) -> Result<LoadedFile> {
        let config = self.registry.lookup(file_name).map_err(not_configured)?;
        let delimiter = self.registry.delimiter_for(file_name).map_err(not_configured)?;
        let upload = UploadConfig::new(config.clone(), &self.location);

        let raw_key = upload.object_key();
        let bytes = self
            .store
            .get(&upload.bucket, &raw_key)
            .await
            .map_err(|cause| PipelineError::Staging {
                key: raw_key.clone(),
                cause,
            })?;

        let raw = RawTable::parse(&bytes, delimiter).map_err(|cause| PipelineError::Parse {
            file_name: file_name.to_string(),
            cause,
        })?;
        info!(rows = raw.table().num_rows(), columns = raw.table().columns().len(), "Parsed staged file");

        let transform = self
            .transforms
            .get(file_name)
            .ok_or_else(|| PipelineError::not_configured(file_name))?;

        let table = transform
            .transform(raw)
            .and_then(|transformed| transformed.conform(&config.table_schema))
            .map_err(|cause| PipelineError::from_transform(file_name, cause))?;
        if table.num_rows() == 0 {
            warn!("Transformed table is empty, the target table will be emptied");
        }

        let csv = table
            .to_csv(delimiter)
            .map_err(|e| PipelineError::from_transform(file_name, TransformError::from(e)))?;

        let temp_key = upload.temp_key();
        self.store
            .put(
                &upload.bucket,
                &temp_key,
                csv.clone(),
                content_type_for(&temp_key).as_ref(),
            )
            .await
            .map_err(|cause| PipelineError::Staging {
                key: temp_key.clone(),
                cause,
            })?;

        let request = LoadRequest::csv_overwrite(
            upload.dataset.as_str(),
            config.table_name.as_str(),
            format!("{}/{}", upload.bucket, temp_key),
            csv,
            delimiter,
            config.table_schema.clone(),
        );

        let load_failed = |cause| PipelineError::LoadFailed {
            file_name: file_name.to_string(),
            cause,
        };
        let outcome = self
            .warehouse
            .bulk_load(request)
            .await
            .map_err(load_failed)?
            .await_result()
            .await
            .map_err(load_failed)?;

        info!(
            table = %format!("{}.{}", outcome.dataset, outcome.table),
            rows = outcome.rows_loaded,
            job_id = %outcome.job_id,
            "✓ Loaded"
        );

        Ok(LoadedFile {
            file_name: file_name.to_string(),
            dataset: outcome.dataset,
            table: outcome.table,
            rows_loaded: outcome.rows_loaded,
            job_id: outcome.job_id,
            transformed_key: temp_key,
        })
    }
}

fn not_configured(err: RegistryError) -> PipelineError {
    match err {
        RegistryError::NotConfigured { file_name } => PipelineError::NotConfigured { file_name },
        other => PipelineError::not_configured(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ColumnSchema, ColumnType};

    fn location() -> LoadLocation {
        LoadLocation {
            bucket: "lithuania_statistics".into(),
            folder: "companies_cars".into(),
            temp_folder: "temp".into(),
            dataset: "lithuania_statistics".into(),
        }
    }

    #[test]
    fn test_upload_config_keys() {
        let file = FileConfiguration {
            file_name: "employees_salaries_raw.csv".into(),
            delimiter: ',',
            table_name: "employees_salaries".into(),
            table_schema: vec![ColumnSchema::new("kodas", ColumnType::Integer)],
        };
        let upload = UploadConfig::new(file, &location());

        assert_eq!(upload.object_key(), "companies_cars/employees_salaries_raw.csv");
        assert_eq!(upload.temp_key(), "temp/employees_salaries.csv");
        assert_eq!(upload.dataset, "lithuania_statistics");
    }

    #[test]
    fn test_report_counts() {
        let report = LoadReport {
            files: vec![
                FileOutcome {
                    file_name: "a.csv".into(),
                    result: Err(PipelineError::not_configured("a.csv")),
                },
                FileOutcome {
                    file_name: "b.csv".into(),
                    result: Ok(LoadedFile {
                        file_name: "b.csv".into(),
                        dataset: "ds".into(),
                        table: "b".into(),
                        rows_loaded: 3,
                        job_id: Uuid::nil(),
                        transformed_key: "temp/b.csv".into(),
                    }),
                },
            ],
        };

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());

        let summary = serde_json::to_value(report.summary()).unwrap_or_default();
        assert_eq!(summary["files"][0]["error_kind"], "not_configured");
        assert_eq!(summary["files"][1]["table"], "ds.b");
        assert!(summary["files"][1].get("error").is_none());
    }
}
