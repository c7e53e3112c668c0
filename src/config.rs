// src/config.rs

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use crate::dag::schedule::MonthlySchedule;
use crate::fetch::FailurePolicy;
use crate::process::pages::Paging;

/// Everything one pipeline needs: where to read, where to write, when to run.
///
/// Defaults reproduce the SF eviction-notices pipeline; a YAML file can
/// override any part of it and a handful of environment variables override
/// the deployment-specific bits on top of that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dag_id: String,
    pub source: SourceConfig,
    pub destination: DestinationConfig,
    pub warehouse: WarehouseConfig,
    pub schedule: ScheduleConfig,
    /// Holds the run lock and the load history.
    pub state_dir: PathBuf,
    /// Parent for per-run scratch directories; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub alert_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Absolute URL, or a path resolved against the connection's base URL.
    pub endpoint: String,
    pub connection: SocrataConnection,
    pub method: String,
    pub items_per_page: usize,
    pub paging: Paging,
    pub failure_policy: FailurePolicy,
    /// Column normalized to a canonical date before export.
    pub date_column: String,
    pub extra_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SocrataConnection {
    pub host: Option<String>,
    /// URL scheme used when `host` carries none; `http` when unset.
    pub schema: Option<String>,
    pub app_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationConfig {
    pub bucket: String,
    /// Object name without the `.csv` suffix.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    pub project_id: Option<String>,
    pub dataset: String,
    pub table: String,
    pub skip_duplicate_loads: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(flatten)]
    pub monthly: MonthlySchedule,
    pub start_date: NaiveDate,
    pub catchup: bool,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dag_id: "socrata-to-gcs-to-bq".to_string(),
            source: SourceConfig::default(),
            destination: DestinationConfig::default(),
            warehouse: WarehouseConfig::default(),
            schedule: ScheduleConfig::default(),
            state_dir: PathBuf::from("state"),
            scratch_dir: None,
            alert_email: None,
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://data.sfgov.org/resource/5cei-gny5.json".to_string(),
            connection: SocrataConnection::default(),
            method: "GET".to_string(),
            items_per_page: 150_000,
            paging: Paging::default(),
            failure_policy: FailurePolicy::default(),
            date_column: "file_date".to_string(),
            extra_headers: BTreeMap::new(),
        }
    }
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            path: "eviction_data".to_string(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            dataset: "airflow_socrata_dataset".to_string(),
            table: "eviction_notices".to_string(),
            skip_duplicate_loads: true,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            monthly: MonthlySchedule::default(),
            start_date: NaiveDate::from_ymd_opt(2019, 1, 1).expect("valid start date"),
            catchup: true,
            retries: 2,
            retry_delay_secs: 60,
        }
    }
}

impl PipelineConfig {
    /// Read the YAML file (if any), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text =
                    fs::read_to_string(p).with_context(|| format!("reading config {:?}", p))?;
                Self::from_yaml(&text).with_context(|| format!("parsing config {:?}", p))?
            }
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Overlay deployment settings from `lookup` (normally the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("GCP_PROJECT_ID") {
            self.warehouse.project_id = Some(v);
        }
        if let Some(v) = lookup("GCP_GCS_BUCKET") {
            self.destination.bucket = v;
        }
        if let Some(v) = lookup("SOCRATA_APP_TOKEN") {
            self.source.connection.app_token = Some(v);
        }
        if let Some(v) = lookup("SOCRATA_HOST") {
            self.source.connection.host = Some(v);
        }
        if let Some(v) = lookup("ALERT_EMAIL").filter(|v| !v.is_empty()) {
            self.alert_email = Some(v);
        }
        if let Some(v) = lookup("PIPELINE_STATE_DIR") {
            self.state_dir = PathBuf::from(v);
        }
    }

    pub fn normalize(&mut self) {
        self.destination.bucket = normalize_bucket(&self.destination.bucket);
        self.destination.path = normalize_object_path(&self.destination.path);
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.items_per_page == 0 {
            bail!("source.items_per_page must be greater than zero");
        }
        if self.destination.bucket.is_empty() {
            bail!("destination bucket is not set (config or GCP_GCS_BUCKET)");
        }
        if self.destination.path.is_empty() {
            bail!("destination.path must not be empty");
        }
        if self.source.date_column.is_empty() {
            bail!("source.date_column must not be empty");
        }
        self.schedule.monthly.validate()?;
        Ok(())
    }

    /// Name of the CSV object written on every run.
    pub fn object_name(&self) -> String {
        format!("{}.csv", self.destination.path)
    }
}

/// `gs://bucket/` → `bucket`
pub fn normalize_bucket(name: &str) -> String {
    let bucket = name.strip_prefix("gs://").unwrap_or(name);
    bucket.trim_matches('/').to_string()
}

/// `/eviction_data` → `eviction_data`
pub fn normalize_object_path(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn bucket_names_lose_scheme_and_slashes() {
        assert_eq!(normalize_bucket("gs://my-bucket/"), "my-bucket");
        assert_eq!(normalize_bucket("/my-bucket"), "my-bucket");
        assert_eq!(normalize_bucket("my-bucket"), "my-bucket");
    }

    #[test]
    fn object_path_loses_leading_slash() {
        assert_eq!(normalize_object_path("/eviction_data"), "eviction_data");
        assert_eq!(normalize_object_path("raw/eviction_data"), "raw/eviction_data");
    }

    #[test]
    fn env_overrides_win_over_defaults() {
        let env: HashMap<&str, &str> = [
            ("GCP_GCS_BUCKET", "gs://landing/"),
            ("GCP_PROJECT_ID", "proj-1"),
            ("SOCRATA_APP_TOKEN", "tok"),
            ("ALERT_EMAIL", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = PipelineConfig::default();
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        cfg.normalize();

        assert_eq!(cfg.destination.bucket, "landing");
        assert_eq!(cfg.warehouse.project_id.as_deref(), Some("proj-1"));
        assert_eq!(cfg.source.connection.app_token.as_deref(), Some("tok"));
        assert!(cfg.alert_email.is_none());
        assert_eq!(cfg.object_name(), "eviction_data.csv");
        cfg.validate().unwrap();
    }

    #[test]
    fn yaml_overrides_selected_fields() {
        let yaml = r#"
dag_id: permits
source:
  endpoint: /resource/abcd-1234.json
  items_per_page: 1000
  paging:
    mode: known_total
    total_rows: 2500
  failure_policy:
    policy: skip
destination:
  bucket: gs://permits-bucket
  path: /permits
schedule:
  day_of_month: 5
  retries: 0
"#;
        let mut cfg = PipelineConfig::from_yaml(yaml).unwrap();
        cfg.normalize();

        assert_eq!(cfg.dag_id, "permits");
        assert_eq!(cfg.source.items_per_page, 1000);
        assert_eq!(cfg.source.paging, Paging::KnownTotal { total_rows: 2500 });
        assert_eq!(cfg.source.failure_policy, FailurePolicy::Skip);
        assert_eq!(cfg.source.date_column, "file_date");
        assert_eq!(cfg.destination.bucket, "permits-bucket");
        assert_eq!(cfg.object_name(), "permits.csv");
        assert_eq!(cfg.schedule.monthly.day_of_month, 5);
        assert_eq!(cfg.schedule.monthly.hour, 6);
        assert_eq!(cfg.schedule.retries, 0);
        assert_eq!(cfg.warehouse.table, "eviction_notices");
    }

    #[test]
    fn missing_bucket_is_rejected() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_err());
    }
}
