use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::Schema as ArrowSchema,
    record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::debug;

/// A row type stored in a [`TableHistory`].
pub trait HistoryRow: Sized {
    /// Partition date (UTC naive) for hive partitioning
    fn partition_date(&self) -> NaiveDate;
    /// Arrow schema for this row type
    fn schema() -> ArrowSchema;
    /// Convert this row into single-element column arrays matching the schema
    fn to_arrays(&self) -> Vec<ArrayRef>;
    /// Dedupe key for this row
    fn unique_key(&self) -> String;
    /// Rebuild the dedupe key of `row` in a batch read back from disk
    fn extract_key(batch: &RecordBatch, row: usize) -> Result<String>;
}

/// Borrow column `idx` of `batch` as UTF-8 strings.
pub fn string_column(batch: &RecordBatch, idx: usize) -> Result<&StringArray> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| anyhow!("history column {} is not a string column", idx))
}

/// Hive-partitioned (`<table>/date=YYYYMMDD/*.parquet`) append-only ledger.
///
/// Every `add` writes one single-row parquet file; opening the table scans
/// all of them to rebuild the set of known keys.
pub struct TableHistory<R: HistoryRow> {
    base_dir: PathBuf,
    table: String,
    schema: Arc<ArrowSchema>,
    seen: Mutex<HashSet<String>>,
    _marker: PhantomData<R>,
}

impl<R: HistoryRow> TableHistory<R> {
    pub fn open(base_dir: impl Into<PathBuf>, table: &str) -> Result<Self> {
        let base_dir = base_dir.into();
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;

        let mut seen = HashSet::new();
        for entry in glob(&format!("{}/date=*/*.parquet", table_dir.display()))? {
            let path = entry?;
            let file = File::open(&path)
                .with_context(|| format!("failed to open `{}`", path.display()))?;
            let mut reader = ParquetRecordBatchReaderBuilder::try_new(file)?
                .with_batch_size(1024)
                .build()?;
            while let Some(batch) = reader.next().transpose()? {
                for i in 0..batch.num_rows() {
                    seen.insert(R::extract_key(&batch, i)?);
                }
            }
        }
        debug!(table, keys = seen.len(), "history loaded");

        Ok(Self {
            base_dir,
            table: table.to_string(),
            schema: Arc::new(R::schema()),
            seen: Mutex::new(seen),
            _marker: PhantomData,
        })
    }

    /// Persist `row` unless its key is already known. Returns whether it was written.
    pub fn add(&self, row: &R) -> Result<bool> {
        let key = row.unique_key();
        if self.contains(&key) {
            return Ok(false);
        }

        let partition = format!("date={}", row.partition_date().format("%Y%m%d"));
        let dir = self.base_dir.join(&self.table).join(partition);
        fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp_micros();
        let final_path = dir.join(format!("{}.parquet", ts));
        let tmp = dir.join(format!("{}.parquet.tmp", ts));

        let file = File::create(&tmp)
            .with_context(|| format!("creating history file `{}`", tmp.display()))?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;
        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())
            .context("building history record batch")?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;

        self.seen
            .lock()
            .map_err(|_| anyhow!("history lock poisoned"))?
            .insert(key);
        Ok(true)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen
            .lock()
            .map(|seen| seen.contains(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
