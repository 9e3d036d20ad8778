//! Staging store
//!
//! Raw archive members and transformed outputs are held in an object store
//! under `folder/file` keys. [`ObjectStore`] is the seam; [`s3::S3ObjectStore`]
//! talks to S3-compatible services and [`memory::MemoryObjectStore`] keeps
//! everything in process for tests and dry runs.
//!
//! [`Stager`] writes the members of one extracted archive, applying the
//! configured rename rules so members land under the canonical file names
//! the schema registry knows.

pub mod config;
pub mod memory;
pub mod s3;

use async_trait::async_trait;
use ltstat_common::sha256_hex;
use mime::Mime;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};

use crate::archive::ArchiveMembers;
use crate::error::{PipelineError, Result};

pub use config::StorageConfig;
pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object {bucket}/{key} does not exist")]
    NotFound { bucket: String, key: String },

    #[error("object store request for {bucket}/{key} failed: {message}")]
    Backend {
        bucket: String,
        key: String,
        message: String,
    },
}

/// Bucketed blob storage with hierarchical keys
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<(), StorageError>;

    async fn get(&self, bucket: &str, key: &str) -> std::result::Result<Vec<u8>, StorageError>;
}

/// `folder/file_name`; an empty folder yields the bare file name
pub fn object_key(folder: &str, file_name: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        file_name.to_string()
    } else {
        format!("{folder}/{file_name}")
    }
}

/// Content type from the file extension
pub fn content_type_for(file_name: &str) -> Mime {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "csv" => mime::TEXT_CSV,
        "txt" => mime::TEXT_PLAIN,
        "json" => mime::APPLICATION_JSON,
        "xml" => mime::TEXT_XML,
        "pdf" => mime::APPLICATION_PDF,
        _ => mime::APPLICATION_OCTET_STREAM,
    }
}

/// Members whose file name matches `pattern` are staged as `target`
#[derive(Debug, Clone)]
pub struct RenameRule {
    pattern: Regex,
    target: String,
}

impl RenameRule {
    pub fn new(pattern: &str, target: impl Into<String>) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            target: target.into(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn matches(&self, file_name: &str) -> bool {
        self.pattern.is_match(file_name)
    }
}

/// What was written for one archive member
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedObject {
    pub member: String,
    pub key: String,
    pub size: u64,
    pub checksum: String,
    pub content_type: String,
}

/// Writes extracted archive members to the staging store
#[derive(Clone)]
pub struct Stager {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    rules: Vec<RenameRule>,
}

impl Stager {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>, rules: Vec<RenameRule>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            rules,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Staged name for an archive member: the first rename rule matching
    /// its file name gives the canonical target, otherwise the member keeps
    /// its path inside the archive.
    pub fn staged_name(&self, member: &str) -> String {
        let file_name = member.rsplit('/').next().unwrap_or(member);
        self.rules
            .iter()
            .find(|rule| rule.matches(file_name))
            .map(|rule| rule.target.clone())
            .unwrap_or_else(|| member.to_string())
    }

    /// Write every member under `prefix`. Two members resolving to the same
    /// key fail the whole batch before anything is written. Stops at the
    /// first failed write.
    #[instrument(skip(self, members), fields(bucket = %self.bucket, members = members.len()))]
    pub async fn stage(&self, members: ArchiveMembers, prefix: &str) -> Result<Vec<StagedObject>> {
        let mut by_key: BTreeMap<String, (String, Vec<u8>)> = BTreeMap::new();
        for (member, bytes) in members {
            let key = object_key(prefix, &self.staged_name(&member));
            if let Some((previous, _)) = by_key.get(&key) {
                return Err(PipelineError::StagedKeyCollision {
                    key,
                    members: vec![previous.clone(), member],
                });
            }
            by_key.insert(key, (member, bytes));
        }

        let mut staged = Vec::with_capacity(by_key.len());
        for (key, (member, bytes)) in by_key {
            let content_type = content_type_for(&key);
            let size = bytes.len() as u64;
            let checksum = sha256_hex(&bytes);

            self.store
                .put(&self.bucket, &key, bytes, content_type.as_ref())
                .await
                .map_err(|cause| PipelineError::Staging {
                    key: key.clone(),
                    cause,
                })?;

            info!(%member, %key, size, "Staged archive member");
            staged.push(StagedObject {
                member,
                key,
                size,
                checksum,
                content_type: content_type.to_string(),
            });
        }

        Ok(staged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn stager(store: Arc<MemoryObjectStore>) -> Stager {
        let rules = vec![RenameRule::new("monthly", "employees_salaries_raw.csv").unwrap()];
        Stager::new(store, "lithuania_statistics", rules)
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("companies_cars", "a.csv"), "companies_cars/a.csv");
        assert_eq!(object_key("temp/", "a.csv"), "temp/a.csv");
        assert_eq!(object_key("", "a.csv"), "a.csv");
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("monthly-2024.CSV"), mime::TEXT_CSV);
        assert_eq!(content_type_for("readme.txt"), mime::TEXT_PLAIN);
        assert_eq!(content_type_for("LICENSE"), mime::APPLICATION_OCTET_STREAM);
    }

    #[test]
    fn test_staged_name_applies_first_matching_rule() {
        let stager = stager(Arc::new(MemoryObjectStore::new()));
        assert_eq!(stager.staged_name("monthly-2024.csv"), "employees_salaries_raw.csv");
        assert_eq!(stager.staged_name("2024/monthly-2024.csv"), "employees_salaries_raw.csv");
        assert_eq!(
            stager.staged_name("dir/Atviri_JTP_parko_duomenys.csv"),
            "dir/Atviri_JTP_parko_duomenys.csv"
        );
    }

    #[tokio::test]
    async fn test_stage_renames_and_reads_back_identical_bytes() {
        let store = Arc::new(MemoryObjectStore::new());
        let stager = stager(store.clone());

        let payload = "kodas,periodas\n1,202401\n".as_bytes().to_vec();
        let mut members = ArchiveMembers::new();
        members.insert("monthly-2024.csv".to_string(), payload.clone());
        members.insert("notes.txt".to_string(), b"hello".to_vec());

        let staged = stager.stage(members, "companies_cars").await.unwrap();

        assert_eq!(staged.len(), 2);
        let salaries = staged
            .iter()
            .find(|s| s.member == "monthly-2024.csv")
            .unwrap();
        assert_eq!(salaries.key, "companies_cars/employees_salaries_raw.csv");
        assert_eq!(salaries.size, payload.len() as u64);
        assert_eq!(salaries.checksum, sha256_hex(&payload));
        assert_eq!(salaries.content_type, "text/csv");

        let read_back = store
            .get("lithuania_statistics", "companies_cars/employees_salaries_raw.csv")
            .await
            .unwrap();
        assert_eq!(read_back, payload);
    }

    #[tokio::test]
    async fn test_stage_reports_failed_write() {
        let store = Arc::new(MemoryObjectStore::new());
        store.fail_writes_to("companies_cars/employees_salaries_raw.csv").await;
        let stager = stager(store);

        let mut members = ArchiveMembers::new();
        members.insert("monthly-2024.csv".to_string(), b"x".to_vec());

        let err = stager.stage(members, "companies_cars").await.unwrap_err();
        assert_eq!(err.kind(), "staging");
    }

    #[tokio::test]
    async fn test_stage_keeps_member_folders_apart() {
        let store = Arc::new(MemoryObjectStore::new());
        let stager = stager(store.clone());

        let mut members = ArchiveMembers::new();
        members.insert("2023/data.csv".to_string(), b"a\n1\n".to_vec());
        members.insert("2024/data.csv".to_string(), b"a\n2\n".to_vec());

        let staged = stager.stage(members, "companies_cars").await.unwrap();

        assert_eq!(staged.len(), 2);
        assert_eq!(
            store.keys("lithuania_statistics").await,
            vec!["companies_cars/2023/data.csv", "companies_cars/2024/data.csv"]
        );
        assert_eq!(
            store.get("lithuania_statistics", "companies_cars/2024/data.csv").await.unwrap(),
            b"a\n2\n"
        );
    }

    #[tokio::test]
    async fn test_stage_rejects_members_renamed_to_same_key() {
        let store = Arc::new(MemoryObjectStore::new());
        let stager = stager(store.clone());

        let mut members = ArchiveMembers::new();
        members.insert("monthly-2023.csv".to_string(), b"x".to_vec());
        members.insert("monthly-2024.csv".to_string(), b"y".to_vec());

        let err = stager.stage(members, "companies_cars").await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StagedKeyCollision { ref key, ref members }
                if key == "companies_cars/employees_salaries_raw.csv" && members.len() == 2
        ));
        assert_eq!(err.kind(), "staging");
        assert!(store.is_empty().await);
    }
}
