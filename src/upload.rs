//! Optional upload of run artifacts to S3-compatible storage.
//!
//! Files land under `{prefix}/{YYYYmmdd_HHMMSS}/{file name}`. An upload
//! failure is logged and reported, never raised: the local artifacts are
//! the result of the run.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tracing::{info, instrument, warn};

use crate::config::UploadConfig;
use crate::error::{BenchError, Result};

/// Outcome of an upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Disabled,
    Uploaded { keys: Vec<String> },
    Failed { reason: String },
}

pub struct ArtifactUploader {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ArtifactUploader {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Build an S3 uploader. Fails with a configuration error if a required
    /// setting is missing.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        if let Some(missing) = config.missing_setting() {
            return Err(BenchError::Config(format!("upload requires {missing}")));
        }
        let endpoint = if config.endpoint.contains("://") {
            config.endpoint.clone()
        } else if config.secure {
            format!("https://{}", config.endpoint)
        } else {
            format!("http://{}", config.endpoint)
        };

        let store = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_endpoint(endpoint)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_allow_http(!config.secure)
            .with_virtual_hosted_style_request(false)
            .build()?;
        Ok(Self::new(Arc::new(store), &config.prefix))
    }

    /// Object key of `file` for a run started at `started_at`.
    pub fn key_for(&self, started_at: DateTime<Utc>, file: &str) -> String {
        let stamp = started_at.format("%Y%m%d_%H%M%S");
        if self.prefix.is_empty() {
            format!("{stamp}/{file}")
        } else {
            format!("{}/{stamp}/{file}", self.prefix)
        }
    }

    /// Upload every file; stops at the first failure.
    pub async fn upload(&self, files: &[&Path], started_at: DateTime<Utc>) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(files.len());
        for file in files {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| BenchError::Validation(format!("not a file: {}", file.display())))?;
            let key = self.key_for(started_at, name);
            let data = Bytes::from(tokio::fs::read(file).await?);
            let size = data.len();
            self.store
                .put(&ObjectPath::from(key.as_str()), PutPayload::from(data))
                .await?;
            info!(key = %key, size, "uploaded artifact");
            keys.push(key);
        }
        Ok(keys)
    }
}

/// Upload `files` when enabled. Never fails the run.
#[instrument(skip_all, fields(enabled = config.enabled, bucket = %config.bucket))]
pub async fn upload_artifacts(
    config: &UploadConfig,
    files: &[&Path],
    started_at: DateTime<Utc>,
) -> UploadOutcome {
    if !config.enabled {
        return UploadOutcome::Disabled;
    }
    let result = match ArtifactUploader::from_config(config) {
        Ok(uploader) => uploader.upload(files, started_at).await,
        Err(e) => Err(e),
    };
    settle(result)
}

/// Turn an upload result into an outcome, logging failures.
pub fn settle(result: Result<Vec<String>>) -> UploadOutcome {
    match result {
        Ok(keys) => UploadOutcome::Uploaded { keys },
        Err(e) => {
            warn!(error = %e, "artifact upload failed; local results are kept");
            UploadOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}
