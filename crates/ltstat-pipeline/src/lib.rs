//! Lithuania statistics ETL pipeline
//!
//! Fetches published open-data archives (Sodra monthly salaries, Regitra
//! vehicle park), stages their members in an object store, transforms each
//! known file into warehouse shape and loads it with full-overwrite
//! semantics.
//!
//! # Modules
//!
//! - [`registry`]: file name → delimiter, target table and column schema
//! - [`table`], [`transform`]: in-memory tables and the per-file transforms
//! - [`fetch`], [`archive`]: archive download and extraction
//! - [`staging`]: object store seam, S3 and in-memory stores, member staging
//! - [`warehouse`]: bulk-load seam, PostgreSQL and in-memory warehouses
//! - [`orchestrator`]: per-file parse → transform → load with isolation
//! - [`driver`]: extract and load phases, run reports
//! - [`config`]: environment-driven pipeline configuration

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod archive;
pub mod config;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod orchestrator;
pub mod registry;
pub mod staging;
pub mod table;
pub mod transform;
pub mod warehouse;

pub use config::PipelineConfig;
pub use driver::{ExtractReport, PipelineDriver, RunReport};
pub use error::{PipelineError, Result};
pub use orchestrator::{LoadLocation, LoadOrchestrator, LoadReport};
pub use registry::{ColumnSchema, ColumnType, FileConfiguration, SchemaRegistry};
pub use transform::{TableTransform, TransformRegistry};
