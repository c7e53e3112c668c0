// src/export/mod.rs
//! CSV serialization into run-scoped scratch space, then upload.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{ffi::OsStr, path::Path};
use tempfile::TempDir;
use tracing::{info, instrument};

use crate::process::table::Table;

pub mod csv_writer;
pub mod gcs;

pub use csv_writer::{fingerprint_file, write_csv, CsvStats};
pub use gcs::GcsStore;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

/// Durable object storage the finished CSV is handed to.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_file(
        &self,
        bucket: &str,
        object_name: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()>;
}

/// What ended up in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub bucket: String,
    pub object_name: String,
    pub rows: usize,
    pub bytes: u64,
    /// Hex sha256 of the uploaded bytes.
    pub fingerprint: String,
}

impl ExportSummary {
    pub fn gcs_uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object_name)
    }
}

fn scratch_dir(parent: Option<&Path>) -> Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("socrata-export-");
    match parent {
        Some(p) => {
            std::fs::create_dir_all(p).with_context(|| format!("creating {}", p.display()))?;
            builder
                .tempdir_in(p)
                .with_context(|| format!("creating scratch dir in {}", p.display()))
        }
        None => builder.tempdir().context("creating scratch dir"),
    }
}

/// Write `table` to a scratch CSV and upload it as `object_name`.
///
/// The scratch directory lives only for this call and is removed whether or
/// not the upload succeeds.
#[instrument(level = "info", skip(table, store, scratch_parent), fields(rows = table.len()))]
pub async fn export_and_upload(
    table: &Table,
    store: &dyn ObjectStore,
    bucket: &str,
    object_name: &str,
    scratch_parent: Option<&Path>,
) -> Result<ExportSummary> {
    let scratch = scratch_dir(scratch_parent)?;
    let file_name = Path::new(object_name)
        .file_name()
        .unwrap_or_else(|| OsStr::new(object_name));
    let local = scratch.path().join(file_name);

    let stats = write_csv(table, &local)?;
    let fingerprint = fingerprint_file(&local)?;
    info!(
        rows = stats.rows,
        bytes = stats.bytes,
        fingerprint = %fingerprint,
        "Executing export of {} to gs://{}/{}",
        local.display(),
        bucket,
        object_name
    );

    store
        .upload_file(bucket, object_name, &local, CSV_CONTENT_TYPE)
        .await
        .with_context(|| format!("uploading {} to gs://{}", object_name, bucket))?;
    info!("Loaded CSV: {}", object_name);

    Ok(ExportSummary {
        bucket: bucket.to_string(),
        object_name: object_name.to_string(),
        rows: stats.rows,
        bytes: stats.bytes,
        fingerprint,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use anyhow::bail;
    use std::path::PathBuf;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    pub struct Upload {
        pub bucket: String,
        pub object_name: String,
        pub content_type: String,
        pub local_path: PathBuf,
        pub contents: String,
    }

    /// Captures uploads in memory; can be told to fail.
    #[derive(Default)]
    pub struct RecordingStore {
        pub uploads: Mutex<Vec<Upload>>,
        pub fail: bool,
    }

    impl RecordingStore {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        pub fn uploads(&self) -> Vec<Upload> {
            self.uploads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn upload_file(
            &self,
            bucket: &str,
            object_name: &str,
            path: &Path,
            content_type: &str,
        ) -> Result<()> {
            let contents = std::fs::read_to_string(path)?;
            self.uploads.lock().unwrap().push(Upload {
                bucket: bucket.to_string(),
                object_name: object_name.to_string(),
                content_type: content_type.to_string(),
                local_path: path.to_path_buf(),
                contents,
            });
            if self.fail {
                bail!("simulated upload failure");
            }
            Ok(())
        }
    }
}
