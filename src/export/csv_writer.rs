// src/export/csv_writer.rs

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::{
    fs::File,
    io::{self, BufWriter},
    path::Path,
};

use crate::process::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvStats {
    pub rows: usize,
    pub bytes: u64,
}

/// Write `table` as CSV: header row in column order, then one line per row.
pub fn write_csv(table: &Table, path: &Path) -> Result<CsvStats> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));

    writer
        .write_record(table.columns())
        .context("writing CSV header")?;
    for (i, row) in table.rows().iter().enumerate() {
        writer
            .write_record(table.row_cells(row).map(cell_text))
            .with_context(|| format!("writing CSV row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    drop(writer);

    let bytes = std::fs::metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .len();
    Ok(CsvStats {
        rows: table.len(),
        bytes,
    })
}

/// Text of one cell. Absent and null cells are empty; nested values are compact JSON.
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Lowercase hex sha256 of the file at `path`.
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).with_context(|| format!("hashing {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::table::Record;
    use serde_json::json;
    use tempfile::tempdir;

    fn rec(v: Value) -> Record {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn round_trip_preserves_rows_columns_and_cells() {
        let mut table = Table::new();
        table.append(vec![
            rec(json!({"eviction_id": "M1", "address": "1 Main St, Apt 2", "file_date": "2020-01-15", "breach": true})),
            rec(json!({"eviction_id": "M2", "address": "say \"hi\"", "file_date": null, "breach": false})),
            rec(json!({"eviction_id": "M3", "supervisor_district": 9, "shape": {"type": "Point", "coordinates": [-122.4, 37.7]}})),
        ]);

        let dir = tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let stats = write_csv(&table, &path).unwrap();
        assert_eq!(stats.rows, 3);
        assert!(stats.bytes > 0);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            vec!["eviction_id", "address", "file_date", "breach", "supervisor_district", "shape"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][1], "1 Main St, Apt 2");
        assert_eq!(&rows[0][3], "true");
        assert_eq!(&rows[1][1], "say \"hi\"");
        assert_eq!(&rows[1][2], "");
        assert_eq!(&rows[2][1], "");
        assert_eq!(&rows[2][4], "9");
        assert_eq!(&rows[2][5], r#"{"type":"Point","coordinates":[-122.4,37.7]}"#);
    }

    #[test]
    fn empty_table_writes_only_a_blank_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        let stats = write_csv(&Table::new(), &path).unwrap();
        assert_eq!(stats.rows, 0);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        std::fs::write(&a, "id\n1\n").unwrap();
        std::fs::write(&b, "id\n1\n").unwrap();
        let fa = fingerprint_file(&a).unwrap();
        assert_eq!(fa.len(), 64);
        assert_eq!(fa, fingerprint_file(&b).unwrap());

        std::fs::write(&b, "id\n2\n").unwrap();
        assert_ne!(fa, fingerprint_file(&b).unwrap());
    }
}
