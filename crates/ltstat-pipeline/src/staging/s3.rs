use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::DisplayErrorContext,
    operation::get_object::GetObjectError,
    primitives::ByteStream,
    Client,
};
use tracing::{debug, info, instrument};

use super::{ObjectStore, StorageConfig, StorageError};

/// Staging store backed by S3 or an S3-compatible service (MinIO, GCS interop)
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub async fn new(config: &StorageConfig) -> Self {
        debug!("Initializing object store with config: {:?}", config);

        let mut builder = match config.static_credentials() {
            Some((access_key, secret_key)) => aws_sdk_s3::Config::builder()
                .behavior_version(BehaviorVersion::latest())
                .credentials_provider(Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "ltstat-staging",
                ))
                .region(Region::new(config.region.clone())),
            None => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(endpoint = ?config.endpoint, region = %config.region, "Object store client initialized");

        Self {
            client: Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn backend(bucket: &str, key: &str, message: String) -> StorageError {
    StorageError::Backend {
        bucket: bucket.to_string(),
        key: key.to_string(),
        message,
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| backend(bucket, key, DisplayErrorContext(&e).to_string()))?;

        debug!("Uploaded s3://{}/{}", bucket, key);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if matches!(e.as_service_error(), Some(GetObjectError::NoSuchKey(_))) {
                    StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    backend(bucket, key, DisplayErrorContext(&e).to_string())
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| backend(bucket, key, e.to_string()))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from s3://{}/{}", data.len(), bucket, key);
        Ok(data)
    }
}
