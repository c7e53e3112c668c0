// src/load/bigquery.rs

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use google_cloud_bigquery::client::{Client, ClientConfig};
use google_cloud_bigquery::http::error::Error as BigQueryError;
use google_cloud_bigquery::http::job::get::GetJobRequest;
use google_cloud_bigquery::http::job::{
    Job, JobConfiguration, JobConfigurationLoad, JobReference, JobState, JobType,
    WriteDisposition,
};
use google_cloud_bigquery::http::table::{SourceFormat, TableReference};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::{TableTarget, WarehouseLoader};

/// BigQuery load jobs: CSV with a header row, schema auto-detect, append.
pub struct BigQueryLoader {
    client: Client,
    /// Project the job runs in; usually the one the credentials belong to.
    job_project: String,
    location: Option<String>,
    poll_interval: Duration,
}

impl BigQueryLoader {
    pub async fn from_env(project_override: Option<String>) -> Result<Self> {
        let (config, project_id) = ClientConfig::new_with_auth()
            .await
            .context("authenticating BigQuery client")?;
        let job_project = project_override
            .or(project_id)
            .ok_or_else(|| anyhow!("no project_id from credentials; set GCP_PROJECT_ID"))?;
        let client = Client::new(config)
            .await
            .context("creating BigQuery client")?;
        Ok(Self {
            client,
            job_project,
            location: None,
            poll_interval: Duration::from_secs(2),
        })
    }

    pub fn project_id(&self) -> &str {
        &self.job_project
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

/// The load job for one CSV object.
pub fn build_load_job(
    job_project: &str,
    job_id: &str,
    location: Option<String>,
    source_uri: &str,
    target: &TableTarget,
) -> Job {
    Job {
        job_reference: JobReference {
            project_id: job_project.to_string(),
            job_id: job_id.to_string(),
            location,
        },
        configuration: JobConfiguration {
            job: JobType::Load(JobConfigurationLoad {
                source_uris: vec![source_uri.to_string()],
                source_format: Some(SourceFormat::Csv),
                skip_leading_rows: Some(1),
                autodetect: Some(true),
                write_disposition: Some(WriteDisposition::WriteAppend),
                destination_table: TableReference {
                    project_id: target.project_id.clone(),
                    dataset_id: target.dataset.clone(),
                    table_id: target.table.clone(),
                },
                ..Default::default()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// 409: a job with this id was created earlier.
fn is_already_exists(err: &BigQueryError) -> bool {
    matches!(err, BigQueryError::Response(resp) if resp.code == 409)
}

#[async_trait]
impl WarehouseLoader for BigQueryLoader {
    #[instrument(level = "info", skip(self), fields(target = %target))]
    async fn load_csv(&self, job_id: &str, source_uri: &str, target: &TableTarget) -> Result<String> {
        let job = build_load_job(
            &self.job_project,
            job_id,
            self.location.clone(),
            source_uri,
            target,
        );

        match self.client.job().create(&job).await {
            Ok(created) => {
                info!(job_id = %job_id, state = ?created.status.state, "load job created")
            }
            Err(e) if is_already_exists(&e) => {
                warn!(job_id = %job_id, "load job already exists; waiting on it instead of appending again")
            }
            Err(e) => return Err(e).with_context(|| format!("creating load job {job_id}")),
        }

        let request = GetJobRequest {
            location: self.location.clone(),
        };
        loop {
            let current = self
                .client
                .job()
                .get(&self.job_project, job_id, &request)
                .await
                .with_context(|| format!("polling load job {job_id}"))?;
            if current.status.state == JobState::Done {
                if let Some(err) = current.status.error_result {
                    bail!("load job {job_id} into {target} failed: {err:?}");
                }
                info!(job_id = %job_id, "Loaded {} into {}", source_uri, target);
                return Ok(job_id.to_string());
            }
            debug!(job_id = %job_id, state = ?current.status.state, "waiting for load job");
            sleep(self.poll_interval).await;
        }
    }
}
