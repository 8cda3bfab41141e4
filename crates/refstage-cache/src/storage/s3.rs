//! Store adapter for S3-compatible object storage
//!
//! Uploads attach the file's SHA-256 as `sha256` user metadata, which is what
//! [`RemoteStore::checksum`] reports back for checksum verification.

use super::{RemoteStore, StorageConfig, StoreError, StoreResult};
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    operation::head_object::HeadObjectOutput,
    primitives::ByteStream,
    Client,
};
use refstage_common::checksum::compute_file_checksum;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// User metadata key carrying the hex SHA-256 of an object
pub const CHECKSUM_METADATA_KEY: &str = "sha256";

#[derive(Clone)]
pub struct S3Store {
    client: Client,
    endpoint: Option<String>,
}

impl S3Store {
    pub async fn new(config: &StorageConfig) -> StoreResult<Self> {
        debug!(
            endpoint = ?config.endpoint,
            region = %config.region,
            "initializing S3 store"
        );

        let mut builder = match (&config.access_key, &config.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "refstage-storage");
                aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(config.region.clone()))
            }
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(config.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        builder = builder.force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        let client = Client::from_conf(builder.build());
        info!(endpoint = ?config.endpoint, "S3 store initialized");

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            endpoint: None,
        }
    }

    async fn head(&self, uri: &str) -> StoreResult<Option<HeadObjectOutput>> {
        let (bucket, key) = parse_s3_uri(uri)?;
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => Ok(Some(output)),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(None)
                } else {
                    Err(classify(uri, &err))
                }
            }
        }
    }
}

/// Split `s3://bucket/key` into bucket and key
pub fn parse_s3_uri(uri: &str) -> StoreResult<(&str, &str)> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| StoreError::InvalidUri(uri.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(StoreError::InvalidUri(uri.to_string())),
    }
}

fn classify<E, R>(uri: &str, err: &SdkError<E, R>) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
            StoreError::Unreachable(format!("{uri}: {}", DisplayErrorContext(err)))
        }
        _ => StoreError::Backend(format!("{uri}: {}", DisplayErrorContext(err))),
    }
}

#[async_trait]
impl RemoteStore for S3Store {
    fn describe(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("s3 (endpoint {endpoint})"),
            None => "s3".to_string(),
        }
    }

    async fn exists(&self, uri: &str) -> StoreResult<bool> {
        Ok(self.head(uri).await?.is_some())
    }

    async fn length(&self, uri: &str) -> StoreResult<u64> {
        let head = self
            .head(uri)
            .await?
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))?;
        let length = head.content_length().unwrap_or(0);
        u64::try_from(length).map_err(|_| StoreError::Backend(format!("{uri}: negative length")))
    }

    #[instrument(skip(self, local), fields(local = %local.display()))]
    async fn copy_to_local(&self, uri: &str, local: &Path) -> StoreResult<()> {
        let (bucket, key) = parse_s3_uri(uri)?;
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NotFound(uri.to_string())
                } else {
                    classify(uri, &err)
                }
            })?;

        let mut body = response.body;
        let mut file = tokio::fs::File::create(local).await?;
        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StoreError::Backend(format!("{uri}: {e}")))?
        {
            file.write_all(&chunk).await?;
        }
        file.sync_all().await?;

        debug!("downloaded object");
        Ok(())
    }

    #[instrument(skip(self, local), fields(local = %local.display()))]
    async fn copy_from_local(&self, local: &Path, uri: &str) -> StoreResult<()> {
        let (bucket, key) = parse_s3_uri(uri)?;

        let path = local.to_path_buf();
        let checksum = tokio::task::spawn_blocking(move || compute_file_checksum(path))
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StoreError::Backend(format!("{}: {e}", local.display())))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .metadata(CHECKSUM_METADATA_KEY, &checksum)
            .body(body)
            .send()
            .await
            .map_err(|err| classify(uri, &err))?;

        info!(%checksum, "uploaded object");
        Ok(())
    }

    async fn delete(&self, uri: &str) -> StoreResult<()> {
        let (bucket, key) = parse_s3_uri(uri)?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(uri, &err))?;
        Ok(())
    }

    async fn checksum(&self, uri: &str) -> StoreResult<Option<String>> {
        let head = self
            .head(uri)
            .await?
            .ok_or_else(|| StoreError::NotFound(uri.to_string()))?;
        Ok(head
            .metadata()
            .and_then(|m| m.get(CHECKSUM_METADATA_KEY))
            .cloned())
    }
}
