//! Snippet blob storage
//!
//! Uploads sliced snippets to an S3-compatible bucket under
//! `snippets/{snippet_id}{ext}` and builds the public URL they are served
//! from. When the store is not configured, callers keep the local file
//! path instead.

use std::path::Path;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::config::BlobConfig;

const DEFAULT_EXTENSION: &str = ".opus";

/// Upload failure
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Blob store is not configured")]
    NotConfigured,

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

/// S3-compatible snippet store
pub struct BlobStore {
    cfg: BlobConfig,
    client: OnceCell<aws_sdk_s3::Client>,
}

impl BlobStore {
    pub fn new(cfg: BlobConfig) -> Self {
        Self {
            cfg,
            client: OnceCell::new(),
        }
    }

    /// True only when endpoint, both keys, and bucket are all present
    pub fn is_configured(&self) -> bool {
        self.cfg.is_configured()
    }

    fn object_key(snippet_id: &str, extension: &str) -> String {
        format!("snippets/{snippet_id}{extension}")
    }

    /// Public URL for an object: custom domain when configured, else the
    /// bucket's default public subdomain
    fn public_url(&self, key: &str) -> String {
        if let Some(domain) = &self.cfg.public_domain {
            return format!("https://{domain}/{key}");
        }
        let bucket = self.cfg.bucket.as_deref().unwrap_or_default();
        format!("https://{bucket}.r2.dev/{key}")
    }

    async fn client(&self) -> Result<&aws_sdk_s3::Client, StorageError> {
        if !self.is_configured() {
            return Err(StorageError::NotConfigured);
        }

        Ok(self
            .client
            .get_or_init(|| async {
                let creds = Credentials::new(
                    self.cfg.access_key_id.clone().unwrap_or_default(),
                    self.cfg.secret_access_key.clone().unwrap_or_default(),
                    None,
                    None,
                    "env",
                );
                let conf = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .region(Region::new("auto"))
                    .endpoint_url(self.cfg.endpoint.clone().unwrap_or_default())
                    .credentials_provider(creds)
                    .force_path_style(true)
                    .build();
                aws_sdk_s3::Client::from_conf(conf)
            })
            .await)
    }

    /// Upload a snippet file and return its public URL
    pub async fn upload(
        &self,
        file: &Path,
        snippet_id: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let client = self.client().await?;

        let extension = file
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        let key = Self::object_key(snippet_id, &extension);

        let body = ByteStream::from_path(file)
            .await
            .map_err(|_| StorageError::FileNotFound(file.display().to_string()))?;

        let bucket = self.cfg.bucket.clone().unwrap_or_default();

        client
            .put_object()
            .bucket(bucket)
            .key(key.as_str())
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        Ok(self.public_url(&key))
    }

    /// Best-effort removal of a stored snippet
    pub async fn delete(&self, snippet_id: &str, extension: &str) -> bool {
        let Ok(client) = self.client().await else {
            return false;
        };
        let key = Self::object_key(snippet_id, extension);
        let bucket = self.cfg.bucket.clone().unwrap_or_default();

        match client
            .delete_object()
            .bucket(bucket)
            .key(key.as_str())
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Snippet delete failed");
                false
            }
        }
    }
}
