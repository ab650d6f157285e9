use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::Client as AwsS3Client;
use bytes::Bytes;
use tracing::debug;

use super::{ObjectStore, StorageError};
use crate::config::StorageConfig;
use crate::source_ref::SourceReference;

/// S3-compatible storage (AWS S3, IBM COS, MinIO). The container is the bucket.
pub struct S3ObjectStore {
    client: AwsS3Client,
}

impl S3ObjectStore {
    pub fn new(client: AwsS3Client) -> Self {
        Self { client }
    }

    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.object_storage_region.clone()));

        if let Some(endpoint) = &config.object_storage_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        if let (Some(access_key), Some(secret_key)) = (
            &config.object_storage_access_key_id,
            &config.object_storage_secret_access_key,
        ) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "csv-expander",
            ));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.object_storage_path_style)
            .build();

        Self::new(AwsS3Client::from_conf(s3_config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn fetch(&self, source: &SourceReference) -> Result<Bytes, StorageError> {
        debug!(
            "Fetching object {} from bucket {}",
            source.path(),
            source.container()
        );
        let output = self
            .client
            .get_object()
            .bucket(source.container())
            .key(source.path())
            .send()
            .await
            .map_err(|e| {
                let message = format!("failed to get {source}: {e}");
                match e.into_service_error() {
                    GetObjectError::NoSuchKey(_) => StorageError::NotFound(source.to_string()),
                    _ => StorageError::OperationFailed(message),
                }
            })?;

        let body = output.body.collect().await.map_err(|e| {
            StorageError::OperationFailed(format!("failed to read body of {source}: {e}"))
        })?;

        Ok(body.into_bytes())
    }
}
