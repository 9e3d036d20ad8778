//! Pipeline configuration
//!
//! Options say where data comes from and goes to (sources, bucket, folders,
//! dataset, database, object store), never what the files contain. File
//! layouts live in the schema registry.

use anyhow::Context;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::registry::EMPLOYEES_SALARIES_FILE;
use crate::staging::StorageConfig;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default staging bucket.
pub const DEFAULT_BUCKET: &str = "lithuania_statistics";

/// Default folder for raw staged files.
pub const DEFAULT_STAGING_LOCATION: &str = "companies_cars";

/// Default folder for transformed outputs.
pub const DEFAULT_TEMP_LOCATION: &str = "temp";

/// Default warehouse dataset.
pub const DEFAULT_DATASET: &str = "lithuania_statistics";

/// Default User-Agent sent to archive sources.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Default HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Default number of files loaded at once.
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = crate::orchestrator::DEFAULT_MAX_CONCURRENT_LOADS;

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;

/// Sodra monthly salaries archive, by year.
pub const SODRA_MONTHLY_URL: &str = "https://atvira.sodra.lt/imones/downloads/{year}/monthly-{year}.csv.zip";

/// Regitra vehicle park archive.
pub const REGITRA_VEHICLES_URL: &str = "https://www.regitra.lt/atvduom/Atviri_JTP_parko_duomenys.zip";

/// A named remote archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSourceConfig {
    pub name: String,
    pub url: String,
}

impl ArchiveSourceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Archive members matching `pattern` are staged as `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameRuleConfig {
    pub pattern: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Required only when loading into PostgreSQL
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub bucket_name: String,
    pub staging_location: String,
    pub temp_location: String,
    pub dataset: String,
    /// Fetched in order
    pub archive_sources: Vec<ArchiveSourceConfig>,
    pub rename_rules: Vec<RenameRuleConfig>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub max_concurrent_loads: usize,
    /// TOML file replacing the built-in file mappings
    pub mappings_path: Option<PathBuf>,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
}

/// Sodra archive for `year`, then the Regitra archive
pub fn default_archive_sources(year: i32) -> Vec<ArchiveSourceConfig> {
    vec![
        ArchiveSourceConfig::new("sodra", SODRA_MONTHLY_URL.replace("{year}", &year.to_string())),
        ArchiveSourceConfig::new("regitra", REGITRA_VEHICLES_URL),
    ]
}

/// Sodra names its member `monthly-<year>.csv`
pub fn default_rename_rules() -> Vec<RenameRuleConfig> {
    vec![RenameRuleConfig {
        pattern: "monthly".to_string(),
        target: EMPLOYEES_SALARIES_FILE.to_string(),
    }]
}

/// Parse `name=url,name=url`
pub fn parse_archive_sources(value: &str) -> anyhow::Result<Vec<ArchiveSourceConfig>> {
    Ok(parse_pairs(value)?
        .into_iter()
        .map(|(name, url)| ArchiveSourceConfig::new(name, url))
        .collect())
}

/// Parse `pattern=target,pattern=target`
pub fn parse_rename_rules(value: &str) -> anyhow::Result<Vec<RenameRuleConfig>> {
    Ok(parse_pairs(value)?
        .into_iter()
        .map(|(pattern, target)| RenameRuleConfig { pattern, target })
        .collect())
}

fn parse_pairs(value: &str) -> anyhow::Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (left, right) = entry
            .split_once('=')
            .with_context(|| format!("Expected 'key=value', got '{entry}'"))?;
        let (left, right) = (left.trim(), right.trim());
        if left.is_empty() || right.is_empty() {
            anyhow::bail!("Empty key or value in '{entry}'");
        }
        pairs.push((left.to_string(), right.to_string()));
    }
    Ok(pairs)
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Environment and defaults only, unvalidated
    pub fn from_env() -> anyhow::Result<Self> {
        let archive_sources = match std::env::var("LTSTAT_ARCHIVE_SOURCES") {
            Ok(value) => parse_archive_sources(&value).context("Invalid LTSTAT_ARCHIVE_SOURCES")?,
            Err(_) => default_archive_sources(chrono::Utc::now().year()),
        };
        let rename_rules = match std::env::var("LTSTAT_RENAME_RULES") {
            Ok(value) => parse_rename_rules(&value).context("Invalid LTSTAT_RENAME_RULES")?,
            Err(_) => default_rename_rules(),
        };

        Ok(Self {
            bucket_name: env_or("LTSTAT_BUCKET", DEFAULT_BUCKET),
            staging_location: env_or("LTSTAT_STAGING_LOCATION", DEFAULT_STAGING_LOCATION),
            temp_location: env_or("LTSTAT_TEMP_LOCATION", DEFAULT_TEMP_LOCATION),
            dataset: env_or("LTSTAT_DATASET", DEFAULT_DATASET),
            archive_sources,
            rename_rules,
            user_agent: env_or("LTSTAT_USER_AGENT", DEFAULT_USER_AGENT),
            http_timeout_secs: env_parse("LTSTAT_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
            max_concurrent_loads: env_parse(
                "LTSTAT_MAX_CONCURRENT_LOADS",
                DEFAULT_MAX_CONCURRENT_LOADS,
            ),
            mappings_path: std::env::var("LTSTAT_MAPPINGS_PATH").ok().map(PathBuf::from),
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL").ok(),
                max_connections: env_parse(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
            },
            storage: StorageConfig::from_env(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket_name.trim().is_empty() {
            anyhow::bail!("Bucket name cannot be empty");
        }

        if self.dataset.trim().is_empty() {
            anyhow::bail!("Dataset cannot be empty");
        }

        if self.staging_location.trim_matches('/') == self.temp_location.trim_matches('/') {
            anyhow::bail!(
                "Staging location and temp location must differ (both '{}')",
                self.staging_location
            );
        }

        if self.http_timeout_secs == 0 {
            anyhow::bail!("HTTP timeout must be greater than 0");
        }

        if self.max_concurrent_loads == 0 {
            anyhow::bail!("max_concurrent_loads must be greater than 0");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.archive_sources {
            if !names.insert(source.name.as_str()) {
                anyhow::bail!("Archive source '{}' is configured twice", source.name);
            }
            if !(source.url.starts_with("https://") || source.url.starts_with("http://")) {
                anyhow::bail!("Archive source '{}' must use an http(s) URL", source.name);
            }
        }

        if self.archive_sources.is_empty() {
            tracing::warn!("No archive sources configured - extract will stage nothing");
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bucket_name: DEFAULT_BUCKET.to_string(),
            staging_location: DEFAULT_STAGING_LOCATION.to_string(),
            temp_location: DEFAULT_TEMP_LOCATION.to_string(),
            dataset: DEFAULT_DATASET.to_string(),
            archive_sources: default_archive_sources(chrono::Utc::now().year()),
            rename_rules: default_rename_rules(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
            mappings_path: None,
            database: DatabaseConfig {
                url: None,
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            },
            storage: StorageConfig {
                endpoint: None,
                region: crate::staging::config::DEFAULT_REGION.to_string(),
                access_key: None,
                secret_key: None,
                path_style: false,
            },
        }
    }
}
