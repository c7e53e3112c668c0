use anyhow::Result;
use arrow::{
    array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{path::PathBuf, sync::Arc};

use crate::history::table_history::{string_column, HistoryRow, TableHistory};

/// One CSV object successfully appended to a warehouse table.
pub struct LoadedRow {
    pub target: String,
    pub object_name: String,
    pub fingerprint: String,
    pub rows: u64,
    pub job_id: String,
    pub loaded_at: DateTime<Utc>,
}

/// Key shared by rows written now and rows read back later.
pub fn load_key(target: &str, object_name: &str, fingerprint: &str) -> String {
    format!("{}--{}--{}", target, object_name, fingerprint)
}

impl HistoryRow for LoadedRow {
    fn partition_date(&self) -> NaiveDate {
        self.loaded_at.date_naive()
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new("target", ArrowDataType::Utf8, false),
            Field::new("object_name", ArrowDataType::Utf8, false),
            Field::new("fingerprint", ArrowDataType::Utf8, false),
            Field::new("rows", ArrowDataType::UInt64, false),
            Field::new("job_id", ArrowDataType::Utf8, false),
            Field::new(
                "loaded_at",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(StringArray::from(vec![self.target.clone()])),
            Arc::new(StringArray::from(vec![self.object_name.clone()])),
            Arc::new(StringArray::from(vec![self.fingerprint.clone()])),
            Arc::new(UInt64Array::from(vec![self.rows])),
            Arc::new(StringArray::from(vec![self.job_id.clone()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .loaded_at
                .timestamp_micros()])),
        ]
    }

    fn unique_key(&self) -> String {
        load_key(&self.target, &self.object_name, &self.fingerprint)
    }

    fn extract_key(batch: &RecordBatch, row: usize) -> Result<String> {
        Ok(load_key(
            string_column(batch, 0)?.value(row),
            string_column(batch, 1)?.value(row),
            string_column(batch, 2)?.value(row),
        ))
    }
}

pub type LoadHistory = TableHistory<LoadedRow>;

impl TableHistory<LoadedRow> {
    pub fn open_loads(base: impl Into<PathBuf>) -> Result<Self> {
        TableHistory::open(base, "loads")
    }

    /// Has this exact content already been appended to `target` under `object_name`?
    pub fn already_loaded(&self, target: &str, object_name: &str, fingerprint: &str) -> bool {
        self.contains(&load_key(target, object_name, fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glob::glob;
    use tempfile::tempdir;

    fn row(fingerprint: &str) -> LoadedRow {
        LoadedRow {
            target: "proj.ds.eviction_notices".into(),
            object_name: "eviction_data.csv".into(),
            fingerprint: fingerprint.into(),
            rows: 6,
            job_id: "job-1".into(),
            loaded_at: Utc::now(),
        }
    }

    #[test]
    fn add_then_lookup() {
        let tmp = tempdir().unwrap();
        let hist = LoadHistory::open_loads(tmp.path()).unwrap();
        assert!(hist.is_empty());

        assert!(hist.add(&row("abc")).unwrap());
        assert!(hist.already_loaded("proj.ds.eviction_notices", "eviction_data.csv", "abc"));
        assert!(!hist.already_loaded("proj.ds.eviction_notices", "eviction_data.csv", "def"));
        assert!(!hist.already_loaded("proj.ds.other", "eviction_data.csv", "abc"));

        let files: Vec<_> = glob(&format!("{}/loads/date=*/*.parquet", tmp.path().display()))
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn same_key_is_written_once() {
        let tmp = tempdir().unwrap();
        let hist = LoadHistory::open_loads(tmp.path()).unwrap();
        assert!(hist.add(&row("abc")).unwrap());
        assert!(!hist.add(&row("abc")).unwrap());
        assert_eq!(hist.len(), 1);
    }

    #[test]
    fn keys_survive_reopening() {
        let tmp = tempdir().unwrap();
        {
            let hist = LoadHistory::open_loads(tmp.path()).unwrap();
            hist.add(&row("abc")).unwrap();
        }
        let reopened = LoadHistory::open_loads(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.already_loaded("proj.ds.eviction_notices", "eviction_data.csv", "abc"));
    }
}
