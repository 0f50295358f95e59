//! S3 adapter: aws-sdk-s3 implementation with bounded retries and optional
//! content-MD5 validation.
//!
//! Staged cache objects are block-sized, so plain `put_object` suffices;
//! the cache layer above owns the unbounded retry policy and this backend
//! only smooths over transient errors with exponential backoff.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::SdkBody;
use aws_sdk_s3::{Client, config::Region};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use tokio::time::{Duration, sleep};

use super::client::{BackendError, ObjectBackend};

#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region (optional, will use default if not specified)
    pub region: Option<String>,
    /// Maximum retry attempts for failed operations (default: 3)
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds (default: 100ms)
    pub retry_base_delay: u64,
    /// Enable MD5 checksums for uploads (default: true)
    pub enable_md5: bool,
    /// Custom endpoint URL (e.g. for MinIO or localstack)
    pub endpoint: Option<String>,
    /// Force path-style access (required for some S3-compatible services)
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: None,
            max_retries: 3,
            retry_base_delay: 100,
            enable_md5: true,
            endpoint: None,
            force_path_style: false,
        }
    }
}

#[derive(Clone)]
pub struct S3Backend {
    client: Client,
    config: S3Config,
}

impl S3Backend {
    /// Create a new S3 backend with default configuration
    pub async fn new(bucket: impl Into<String>) -> Result<Self, BackendError> {
        let config = S3Config {
            bucket: bucket.into(),
            ..Default::default()
        };
        Self::with_config(config).await
    }

    /// Create a new S3 backend with custom configuration
    pub async fn with_config(config: S3Config) -> Result<Self, BackendError> {
        if config.bucket.is_empty() {
            return Err("bucket name cannot be empty".into());
        }

        let mut aws_config_loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            aws_config_loader = aws_config_loader.region(Region::new(region.clone()));
        }
        let aws_config = aws_config_loader.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());
        Ok(Self { client, config })
    }

    fn md5_base64(data: &[u8]) -> String {
        let sum = md5::compute(data);
        B64.encode(sum.0)
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.config.retry_base_delay * (1 << (attempt - 1)))
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(&self, key: &str, data: &[u8]) -> Result<(), BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let mut request = self
                .client
                .put_object()
                .bucket(&self.config.bucket)
                .key(key)
                .body(SdkBody::from(data.to_vec()).into());

            if self.config.enable_md5 {
                request = request.content_md5(Self::md5_base64(data));
            }

            match request.send().await {
                Ok(_) => return Ok(()),
                Err(_e) if attempt < self.config.max_retries => {
                    sleep(self.backoff_delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await;
        match resp {
            Ok(output) => {
                use tokio::io::AsyncReadExt;
                let mut body = output.body.into_async_read();
                let mut buf = Vec::new();
                body.read_to_end(&mut buf).await?;
                Ok(Some(buf))
            }
            Err(e) => {
                // Simplified: NoSuchKey returns None, other errors return Err
                let msg = format!("{e}");
                if msg.contains("NoSuchKey") || msg.contains("NotFound") {
                    Ok(None)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn delete_object(&self, key: &str) -> Result<(), BackendError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .client
                .delete_object()
                .bucket(&self.config.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(_) => return Ok(()),
                Err(_e) if attempt < self.config.max_retries => {
                    sleep(self.backoff_delay(attempt)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
