// src/pipeline.rs
//! The two real tasks of the graph: Socrata → GCS, then GCS → BigQuery.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, instrument, warn};
use url::Url;

use crate::config::PipelineConfig;
use crate::export::{export_and_upload, ExportSummary, ObjectStore};
use crate::fetch::PageSource;
use crate::history::{LoadHistory, LoadedRow};
use crate::load::{load_job_id, TableTarget, WarehouseLoader};
use crate::process::{extract_table, ExtractPlan};

/// How the warehouse step ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { job_id: String },
    /// The same bytes were already appended to the same table.
    SkippedDuplicate,
}

/// One configured pipeline wired to its collaborators.
pub struct Pipeline<'a> {
    pub config: &'a PipelineConfig,
    pub endpoint: Url,
    pub target: TableTarget,
    pub source: &'a dyn PageSource,
    pub store: &'a dyn ObjectStore,
    pub loader: &'a dyn WarehouseLoader,
    pub history: &'a LoadHistory,
}

impl<'a> Pipeline<'a> {
    pub fn extract_plan(&self) -> ExtractPlan {
        let src = &self.config.source;
        ExtractPlan {
            endpoint: self.endpoint.clone(),
            items_per_page: src.items_per_page,
            paging: src.paging.clone(),
            failure_policy: src.failure_policy.clone(),
            date_column: src.date_column.clone(),
        }
    }

    /// Fetch every page, normalize, write CSV, upload it.
    #[instrument(level = "info", skip(self), fields(dag = %self.config.dag_id))]
    pub async fn socrata_to_gcs(&self) -> Result<ExportSummary> {
        let extracted = extract_table(self.source, &self.extract_plan())
            .await
            .context("extracting from Socrata")?;
        if extracted.pages_skipped > 0 {
            warn!(
                pages_skipped = extracted.pages_skipped,
                "some pages were skipped; the export is incomplete"
            );
        }

        export_and_upload(
            &extracted.table,
            self.store,
            &self.config.destination.bucket,
            &self.config.object_name(),
            self.config.scratch_dir.as_deref(),
        )
        .await
    }

    /// Append the uploaded object to the warehouse table.
    #[instrument(level = "info", skip(self, export), fields(object = %export.object_name))]
    pub async fn gcs_to_bigquery(&self, export: &ExportSummary) -> Result<LoadOutcome> {
        let target = self.target.to_string();
        if self.config.warehouse.skip_duplicate_loads
            && self
                .history
                .already_loaded(&target, &export.object_name, &export.fingerprint)
        {
            warn!(
                target = %target,
                fingerprint = %export.fingerprint,
                "identical content already loaded; skipping append"
            );
            return Ok(LoadOutcome::SkippedDuplicate);
        }

        let mut job_id = load_job_id(&self.target, &export.object_name, &export.fingerprint);
        if !self.config.warehouse.skip_duplicate_loads {
            // every call is a fresh append
            job_id = format!("{job_id}_{}", Utc::now().format("%Y%m%d%H%M%S%f"));
        }
        let job_id = self
            .loader
            .load_csv(&job_id, &export.gcs_uri(), &self.target)
            .await?;
        self.history
            .add(&LoadedRow {
                target,
                object_name: export.object_name.clone(),
                fingerprint: export.fingerprint.clone(),
                rows: export.rows as u64,
                job_id: job_id.clone(),
                loaded_at: Utc::now(),
            })
            .context("recording load in history")?;
        info!(job_id = %job_id, rows = export.rows, "warehouse load complete");
        Ok(LoadOutcome::Loaded { job_id })
    }
}
