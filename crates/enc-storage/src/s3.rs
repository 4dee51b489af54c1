//! S3-compatible object storage driver.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CommonPrefix, CompletedMultipartUpload, CompletedPart, Object};
use aws_sdk_s3::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::driver::{collect_files, file_name, DriverKind, StorageDriver, StorageEntry};
use crate::endpoint::{endpoint_url, S3Provider};
use crate::error::{StorageError, StorageResult};
use crate::location::Location;
use crate::progress::{format_bytes, ProgressWriter, TransferProgress};

/// Lifetime of presigned source URLs.
pub const PRESIGNED_DURATION: Duration = Duration::from_secs(72 * 60 * 60);

/// Multipart part size; files at or below it go up in a single request.
pub const PART_SIZE: usize = 5 * 1024 * 1024;

/// Configuration for the S3 driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub provider: S3Provider,
    pub region: String,
    /// Resolved endpoint URL
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Bucket sources are read from
    pub inbound_bucket: String,
    /// Bucket outputs are written to
    pub outbound_bucket: String,
}

impl S3Config {
    /// Build a config, resolving the endpoint from provider and region.
    pub fn new(
        provider: S3Provider,
        region: impl Into<String>,
        custom_endpoint: Option<&str>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> StorageResult<Self> {
        let region = region.into();
        let endpoint_url = endpoint_url(provider, &region, custom_endpoint)?;
        Ok(Self {
            provider,
            region: if region.trim().is_empty() {
                "us-east-1".to_string()
            } else {
                region
            },
            endpoint_url,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            inbound_bucket: String::new(),
            outbound_bucket: String::new(),
        })
    }

    pub fn with_buckets(mut self, inbound: impl Into<String>, outbound: impl Into<String>) -> Self {
        self.inbound_bucket = inbound.into();
        self.outbound_bucket = outbound.into();
        self
    }
}

/// Object storage driver over the AWS SDK.
#[derive(Clone)]
pub struct S3Driver {
    client: Client,
    config: S3Config,
}

impl S3Driver {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "enc-settings",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.provider == S3Provider::Custom)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            config,
        }
    }

    /// Bucket for `location`: the configured one, else the URL host.
    fn bucket_for<'a>(
        &'a self,
        configured: &'a str,
        location: &'a Location,
    ) -> StorageResult<&'a str> {
        if !configured.is_empty() {
            return Ok(configured);
        }
        location
            .host
            .as_deref()
            .ok_or_else(|| StorageError::config_error("no bucket configured"))
    }

    async fn object_size(&self, bucket: &str, key: &str) -> StorageResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let message = e.to_string();
                if e.as_service_error().is_some_and(|se| se.is_not_found()) {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(message)
                }
            })?;
        Ok(head.content_length().unwrap_or(0).max(0) as u64)
    }

    async fn fetch_to(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?;

        let file = tokio::fs::File::create(local_path).await?;
        let mut writer = ProgressWriter::new(BufWriter::new(file), progress);
        let mut body = response.body;
        let mut written = 0u64;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        Ok(written)
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        size: u64,
        progress: &TransferProgress,
    ) -> StorageResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        progress.add(size);
        Ok(())
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> StorageResult<()> {
        let upload_id = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?
            .upload_id
            .ok_or_else(|| StorageError::upload_failed("no upload id returned"))?;

        match self.upload_parts(bucket, key, &upload_id, path, progress).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| StorageError::upload_failed(e.to_string()))?;
                Ok(())
            }
            Err(e) => {
                warn!(key, error = %e, "Multipart upload failed, aborting");
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = %abort, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        progress: &TransferProgress,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let buf = read_part(&mut file).await?;
            if buf.is_empty() {
                break;
            }
            let len = buf.len() as u64;

            let result = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buf))
                .send()
                .await
                .map_err(|e| StorageError::upload_failed(e.to_string()))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(result.e_tag)
                    .part_number(part_number)
                    .build(),
            );
            progress.add(len);
            part_number += 1;
        }

        Ok(parts)
    }
}

/// Read up to [`PART_SIZE`] bytes; short only at end of file.
async fn read_part(file: &mut tokio::fs::File) -> StorageResult<Vec<u8>> {
    let mut buf = vec![0u8; PART_SIZE];
    let mut filled = 0;
    while filled < PART_SIZE {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn kind(&self) -> DriverKind {
        DriverKind::S3
    }

    async fn download(
        &self,
        source: &str,
        local_path: &Path,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<u64> {
        let location = Location::parse(source)?;
        let bucket = self.bucket_for(&self.config.inbound_bucket, &location)?;
        let key = location.key();

        let size = self.object_size(bucket, key).await?;
        progress.set_total(size);
        info!(bucket, key, size = %format_bytes(size), "Starting S3 download");

        match self.fetch_to(bucket, key, local_path, progress).await {
            Ok(written) => {
                debug!(key, written, "S3 download complete");
                Ok(written)
            }
            Err(e) => {
                warn!(path = %local_path.display(), "Download failed, removing partial file");
                let _ = tokio::fs::remove_file(local_path).await;
                Err(e)
            }
        }
    }

    async fn upload(
        &self,
        local_dir: &Path,
        destination: &str,
        progress: Arc<TransferProgress>,
    ) -> StorageResult<Vec<String>> {
        let location = Location::parse(destination)?;
        let bucket = self.bucket_for(&self.config.outbound_bucket, &location)?;

        let files = collect_files(local_dir)?;
        progress.set_total(files.iter().map(|(_, size)| size).sum());

        let mut uploaded = Vec::with_capacity(files.len());
        for (path, size) in files {
            let remote = location.join(file_name(&path)?);
            let key = remote.trim_start_matches('/');
            info!(bucket, key, size = %format_bytes(size), "Uploading to S3");

            if size as usize <= PART_SIZE {
                self.put_single(bucket, key, &path, size, &progress).await?;
            } else {
                self.put_multipart(bucket, key, &path, &progress).await?;
            }
            uploaded.push(key.to_string());
        }

        Ok(uploaded)
    }

    async fn list_files(&self, prefix: &str) -> StorageResult<Vec<StorageEntry>> {
        let location = if prefix.trim().is_empty() {
            Location {
                host: None,
                path: String::new(),
            }
        } else {
            Location::parse(prefix)?
        };
        let bucket = self.bucket_for(&self.config.inbound_bucket, &location)?;
        let prefix = location.key();
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .delimiter("/");

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            entries.extend(listing_entries(
                prefix,
                response.common_prefixes(),
                response.contents(),
            ));

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(entries)
    }

    fn supports_presign(&self) -> bool {
        true
    }

    async fn presigned_url(&self, source: &str) -> StorageResult<String> {
        let location = Location::parse(source)?;
        let bucket = self.bucket_for(&self.config.inbound_bucket, &location)?;

        let presign_config = PresigningConfig::expires_in(PRESIGNED_DURATION)
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(location.key())
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::PresignFailed(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

/// Entries of one listing page: common prefixes become directories, objects
/// become files.
fn listing_entries(prefix: &str, common: &[CommonPrefix], objects: &[Object]) -> Vec<StorageEntry> {
    let dirs = common
        .iter()
        .filter_map(|c| c.prefix())
        .map(|name| StorageEntry::Directory {
            name: name.to_string(),
        });

    let files = objects
        .iter()
        .filter_map(|object| object.key().map(|key| (key, object.size())))
        // The folder marker object for the prefix itself
        .filter(|(key, _)| *key != prefix)
        .map(|(key, size)| StorageEntry::File {
            name: key.to_string(),
            size: size.unwrap_or(0).max(0) as u64,
        });

    dirs.chain(files).collect()
}
