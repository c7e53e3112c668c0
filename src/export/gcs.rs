// src/export/gcs.rs

use anyhow::{Context, Result};
use async_trait::async_trait;
use google_cloud_storage::{
    client::{Client, ClientConfig},
    http::objects::upload::{Media, UploadObjectRequest, UploadType},
};
use std::path::Path;
use tracing::{info, instrument};

use super::ObjectStore;

/// Google Cloud Storage behind the `ObjectStore` seam.
pub struct GcsStore {
    client: Client,
}

impl GcsStore {
    /// Authenticate with application default credentials.
    pub async fn from_env() -> Result<Self> {
        let config = ClientConfig::default()
            .with_auth()
            .await
            .context("authenticating to GCS")?;
        Ok(Self {
            client: Client::new(config),
        })
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    #[instrument(level = "debug", skip(self, path), fields(file = %path.display()))]
    async fn upload_file(
        &self,
        bucket: &str,
        object_name: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let len = data.len() as u64;

        let mut media = Media::new(object_name.to_string());
        media.content_type = content_type.to_string().into();
        media.content_length = Some(len);

        let request = UploadObjectRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };

        self.client
            .upload_object(&request, data, &UploadType::Simple(media))
            .await
            .with_context(|| format!("Failed to upload {} to GCS bucket {}", object_name, bucket))?;

        info!(object = %object_name, bytes = len, "Uploaded to gs://{}/{}", bucket, object_name);
        Ok(())
    }
}
