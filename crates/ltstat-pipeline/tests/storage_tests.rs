//! S3 staging store integration tests
//!
//! **Requirements**:
//! - MinIO or S3 must be running and accessible
//! - S3_ENDPOINT environment variable must be set (e.g., "http://localhost:9000")
//! - S3_TEST_BUCKET names an existing bucket (defaults to "ltstat-test")
//! - Tests will be skipped if S3_ENDPOINT is not configured
//!
//! **Running tests**:
//! ```bash
//! S3_ENDPOINT=http://localhost:9000 S3_PATH_STYLE=true cargo test --test storage_tests
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use ltstat_pipeline::archive::ArchiveMembers;
use ltstat_pipeline::staging::{ObjectStore, S3ObjectStore, Stager, StorageConfig, StorageError};

/// Setup helper that creates a store if MinIO is available
async fn setup_store() -> Option<(S3ObjectStore, String)> {
    if std::env::var("S3_ENDPOINT").is_err() {
        return None;
    }

    let config = StorageConfig::from_env();
    let bucket = std::env::var("S3_TEST_BUCKET").unwrap_or_else(|_| "ltstat-test".to_string());
    Some((S3ObjectStore::new(&config).await, bucket))
}

fn test_key(test_name: &str, suffix: &str) -> String {
    format!("test/{}/{}/{}", test_name, uuid::Uuid::new_v4(), suffix)
}

#[tokio::test]
async fn test_s3_put_get() {
    let Some((store, bucket)) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("put_get", "employees_salaries_raw.csv");
    let data = b"kodas,periodas\n1,2024-01-01\n".to_vec();

    store
        .put(&bucket, &key, data.clone(), "text/csv")
        .await
        .expect("Upload should succeed");
    let downloaded = store.get(&bucket, &key).await.expect("Download should succeed");

    assert_eq!(downloaded, data);
}

#[tokio::test]
async fn test_s3_put_overwrites() {
    let Some((store, bucket)) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("overwrite", "data.csv");
    store.put(&bucket, &key, b"old".to_vec(), "text/csv").await.unwrap();
    store.put(&bucket, &key, b"new".to_vec(), "text/csv").await.unwrap();

    assert_eq!(store.get(&bucket, &key).await.unwrap(), b"new");
}

#[tokio::test]
async fn test_s3_missing_key_is_not_found() {
    let Some((store, bucket)) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let key = test_key("missing", "nothing.csv");
    let err = store.get(&bucket, &key).await.unwrap_err();

    assert!(matches!(err, StorageError::NotFound { key: ref k, .. } if k == &key));
}

#[tokio::test]
async fn test_s3_stage_archive_members() {
    let Some((store, bucket)) = setup_store().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };

    let store = Arc::new(store);
    let stager = Stager::new(store.clone(), bucket.clone(), Vec::new());
    let prefix = test_key("stage", "raw");

    let mut members = ArchiveMembers::new();
    members.insert("export/data.csv".to_string(), b"a,b\n1,2\n".to_vec());
    let staged = stager.stage(members, &prefix).await.unwrap();

    assert_eq!(staged.len(), 1);
    assert_eq!(staged[0].key, format!("{prefix}/export/data.csv"));
    assert_eq!(store.get(&bucket, &staged[0].key).await.unwrap(), b"a,b\n1,2\n");
}
