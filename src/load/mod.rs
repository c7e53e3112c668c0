// src/load/mod.rs
//! Bulk-loading the exported CSV into the warehouse.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;

pub mod bigquery;

pub use bigquery::BigQueryLoader;

/// `<project>.<dataset>.<table>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableTarget {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
}

impl fmt::Display for TableTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset, self.table)
    }
}

/// Job id for appending `fingerprint`'s content, stored as `object_name`, to `target`.
///
/// The same content headed for the same table always gets the same id, so a
/// retried load attaches to the job that already ran instead of appending again.
pub fn load_job_id(target: &TableTarget, object_name: &str, fingerprint: &str) -> String {
    let digest = Sha256::digest(format!("{target}--{object_name}--{fingerprint}"));
    format!("socrata_load_{:x}", digest)
}

/// Appends a CSV object (header row included) to a warehouse table,
/// letting the warehouse detect the schema.
#[async_trait]
pub trait WarehouseLoader: Send + Sync {
    /// Run (or attach to) load job `job_id` and wait for it; returns `job_id`
    /// once the job has finished successfully.
    async fn load_csv(&self, job_id: &str, source_uri: &str, target: &TableTarget) -> Result<String>;
}


#[cfg(test)]
mod tests {
    use super::*;

    fn target(table: &str) -> TableTarget {
        TableTarget {
            project_id: "proj".into(),
            dataset: "airflow_socrata_dataset".into(),
            table: table.into(),
        }
    }

    #[test]
    fn job_id_is_stable_per_content_and_destination() {
        let a = load_job_id(&target("eviction_notices"), "eviction_data.csv", "abc");
        assert_eq!(a, load_job_id(&target("eviction_notices"), "eviction_data.csv", "abc"));
        assert_ne!(a, load_job_id(&target("eviction_notices"), "eviction_data.csv", "abd"));
        assert_ne!(a, load_job_id(&target("other"), "eviction_data.csv", "abc"));
        assert_ne!(a, load_job_id(&target("eviction_notices"), "other.csv", "abc"));
    }

    #[test]
    fn job_id_uses_only_characters_bigquery_accepts() {
        let id = load_job_id(&target("eviction_notices"), "raw/eviction data.csv", "abc");
        assert!(id.starts_with("socrata_load_"));
        assert!(id.len() <= 1024);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }
}
