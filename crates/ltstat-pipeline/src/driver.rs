//! Pipeline driver
//!
//! Sequences the two phases of a batch run:
//!
//! 1. **extract**: fetch each archive source, unpack it and stage its
//!    members in the staging store
//! 2. **load**: run the load orchestrator over every registered file
//!
//! The phases only share the staging store, so each can run on its own
//! (`ltstat extract`, `ltstat load`) or back to back (`ltstat run`). A source
//! or file that fails is recorded in the report and the run carries on.

use anyhow::Context;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::archive;
use crate::config::{ArchiveSourceConfig, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::fetch::{ArchiveSource, HttpArchiveSource};
use crate::orchestrator::{LoadLocation, LoadOrchestrator, LoadReport, LoadSummary};
use crate::registry::SchemaRegistry;
use crate::staging::{ObjectStore, RenameRule, StagedObject, Stager};
use crate::transform::TransformRegistry;
use crate::warehouse::Warehouse;

#[derive(Debug)]
pub struct SourceOutcome {
    pub name: String,
    pub url: String,
    pub result: Result<Vec<StagedObject>>,
}

/// Per-source results of the extract phase, in configuration order
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub sources: Vec<SourceOutcome>,
}

impl ExtractReport {
    pub fn succeeded(&self) -> usize {
        self.sources.iter().filter(|s| s.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.sources.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn staged(&self) -> impl Iterator<Item = &StagedObject> {
        self.sources
            .iter()
            .filter_map(|s| s.result.as_ref().ok())
            .flatten()
    }

    pub fn summary(&self) -> ExtractSummary {
        ExtractSummary {
            succeeded: self.succeeded(),
            failed: self.failed(),
            sources: self
                .sources
                .iter()
                .map(|s| SourceSummary {
                    name: s.name.clone(),
                    url: s.url.clone(),
                    status: if s.result.is_ok() { "staged" } else { "failed" },
                    staged: s.result.as_ref().map(|v| v.clone()).unwrap_or_default(),
                    error_kind: s.result.as_ref().err().map(PipelineError::kind),
                    error: s.result.as_ref().err().map(|e| e.to_string()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub sources: Vec<SourceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub name: String,
    pub url: String,
    pub status: &'static str,
    pub staged: Vec<StagedObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Both phases of a full run
#[derive(Debug, Default)]
pub struct RunReport {
    pub extract: ExtractReport,
    pub load: LoadReport,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.extract.is_success() && self.load.is_success()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            extract: self.extract.summary(),
            load: self.load.summary(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub extract: ExtractSummary,
    pub load: LoadSummary,
}

pub struct PipelineDriver {
    sources: Vec<ArchiveSourceConfig>,
    staging_location: String,
    fetcher: Arc<dyn ArchiveSource>,
    stager: Stager,
    orchestrator: LoadOrchestrator,
}

impl PipelineDriver {
    pub fn new(
        sources: Vec<ArchiveSourceConfig>,
        staging_location: impl Into<String>,
        fetcher: Arc<dyn ArchiveSource>,
        stager: Stager,
        orchestrator: LoadOrchestrator,
    ) -> Self {
        Self {
            sources,
            staging_location: staging_location.into(),
            fetcher,
            stager,
            orchestrator,
        }
    }

    /// Wire the driver from configuration: HTTP fetcher, schema registry
    /// (built-in or from the mappings file), built-in transforms, rename
    /// rules and the given store and warehouse.
    pub fn from_config(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        warehouse: Arc<dyn Warehouse>,
    ) -> anyhow::Result<Self> {
        let registry = match &config.mappings_path {
            Some(path) => SchemaRegistry::from_path(path)
                .with_context(|| format!("Failed to load mappings from {}", path.display()))?,
            None => SchemaRegistry::builtin(),
        };

        let rules = config
            .rename_rules
            .iter()
            .map(|rule| {
                RenameRule::new(&rule.pattern, rule.target.as_str())
                    .with_context(|| format!("Invalid rename pattern '{}'", rule.pattern))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let fetcher = HttpArchiveSource::new(
            &config.user_agent,
            Duration::from_secs(config.http_timeout_secs),
        )
        .context("Failed to build HTTP client")?;

        let location = LoadLocation {
            bucket: config.bucket_name.clone(),
            folder: config.staging_location.clone(),
            temp_folder: config.temp_location.clone(),
            dataset: config.dataset.clone(),
        };

        let orchestrator = LoadOrchestrator::new(
            Arc::new(registry),
            Arc::new(TransformRegistry::builtin()),
            store.clone(),
            warehouse,
            location,
        )
        .with_max_concurrent(config.max_concurrent_loads);

        Ok(Self::new(
            config.archive_sources.clone(),
            config.staging_location.clone(),
            Arc::new(fetcher),
            Stager::new(store, config.bucket_name.clone(), rules),
            orchestrator,
        ))
    }

    /// Replace the archive fetcher
    pub fn with_fetcher(mut self, fetcher: Arc<dyn ArchiveSource>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn orchestrator(&self) -> &LoadOrchestrator {
        &self.orchestrator
    }

    /// Fetch, unpack and stage every archive source
    pub async fn extract(&self) -> ExtractReport {
        info!(sources = self.sources.len(), bucket = %self.stager.bucket(), "Starting extract");

        let mut report = ExtractReport::default();
        for source in &self.sources {
            let result = self.extract_source(source).await;
            match &result {
                Ok(staged) => info!(source = %source.name, objects = staged.len(), "✓ Source staged"),
                Err(e) => error!(source = %source.name, kind = e.kind(), "✗ {}", e),
            }
            report.sources.push(SourceOutcome {
                name: source.name.clone(),
                url: source.url.clone(),
                result,
            });
        }

        info!(
            "Extract completed: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    #[instrument(skip(self, source), fields(source = %source.name, url = %source.url))]
    async fn extract_source(&self, source: &ArchiveSourceConfig) -> Result<Vec<StagedObject>> {
        let bytes = self
            .fetcher
            .fetch(&source.url)
            .await
            .map_err(|cause| PipelineError::FetchFailed {
                source_name: source.name.clone(),
                cause,
            })?;

        let members = archive::extract(&bytes).map_err(|cause| PipelineError::Archive {
            source_name: source.name.clone(),
            cause,
        })?;
        info!(members = members.len(), "Archive extracted");

        self.stager.stage(members, &self.staging_location).await
    }

    /// Load every registered file from the staging store
    pub async fn load(&self) -> LoadReport {
        self.orchestrator.load_registered().await
    }

    /// Extract, then load
    pub async fn run(&self) -> RunReport {
        let extract = self.extract().await;
        let load = self.load().await;
        RunReport { extract, load }
    }
}
