//! S3-backed image source.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::SourceError;

use super::ImageSource;

/// Serves images stored as objects in an S3 or S3-compatible bucket.
///
/// The identifier is used as the object key, optionally under a prefix.
///
/// # Example
///
/// ```ignore
/// use pixelpipe::source::{create_s3_client, S3ImageSource};
///
/// let client = create_s3_client(None, "us-east-1").await;
/// let source = S3ImageSource::new(client, "my-images".to_string());
///
/// // "photos/cat.jpg" becomes s3://my-images/photos/cat.jpg
/// let bytes = source.fetch("photos/cat.jpg").await?;
/// ```
#[derive(Clone)]
pub struct S3ImageSource {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl S3ImageSource {
    /// # Arguments
    /// * `client` - AWS S3 client to use for requests
    /// * `bucket` - bucket holding the images
    pub fn new(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            prefix: None,
        }
    }

    /// Store keys under `prefix/` inside the bucket.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_matches('/');
        self.prefix = (!prefix.is_empty()).then(|| prefix.to_string());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for an image identifier.
    pub fn key_for(&self, id: &str) -> String {
        let id = id.trim_start_matches('/');
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, id),
            None => id.to_string(),
        }
    }
}

#[async_trait]
impl ImageSource for S3ImageSource {
    async fn fetch(&self, id: &str) -> Result<Bytes, SourceError> {
        if id.trim_start_matches('/').is_empty() {
            return Err(SourceError::InvalidPath(id.to_string()));
        }

        let key = self.key_for(id);
        let location = format!("s3://{}/{}", self.bucket, key);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                let status_is_404 = e
                    .raw_response()
                    .map(|r| r.status().as_u16() == 404)
                    .unwrap_or(false);
                if no_such_key || status_is_404 {
                    return SourceError::NotFound(location.clone());
                }

                let err_str = e.to_string();
                if err_str.contains("NoSuchKey") || err_str.contains("NotFound") {
                    return SourceError::NotFound(location.clone());
                }
                SourceError::S3(err_str)
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    fn describe(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("s3://{}/{}", self.bucket, prefix),
            None => format!("s3://{}", self.bucket),
        }
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// A custom endpoint (MinIO and similar) switches to path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;
    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(endpoint_url.is_some())
        .build();

    Client::from_conf(s3_config)
}
