use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::PipelineError;
use crate::process::table::Table;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];

/// Parse the date part of the textual date/timestamp shapes Socrata hands out.
///
/// Floating timestamps (`2020-01-15T00:00:00.000`) keep their calendar date;
/// zoned ones (RFC 3339) keep the date in their own offset.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Rewrite every value of `column` as a canonical `YYYY-MM-DD` date.
///
/// Nulls and absent cells stay empty. One bad value fails the whole table,
/// in which case nothing is rewritten. Returns the number of rewritten cells.
#[instrument(level = "info", skip(table), fields(rows = table.len()))]
pub fn normalize_date_column(table: &mut Table, column: &str) -> Result<usize, PipelineError> {
    if !table.has_column(column) {
        return Err(PipelineError::MissingDateColumn {
            column: column.to_string(),
        });
    }

    let mut parsed = Vec::with_capacity(table.len());
    for (row, record) in table.rows().iter().enumerate() {
        let date = match record.get(column) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => parse_date(s),
            Some(_) => None,
        };
        match date {
            Some(d) => parsed.push((row, d)),
            None => {
                let value = match &record[column] {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return Err(PipelineError::DateNormalization {
                    column: column.to_string(),
                    row,
                    value,
                });
            }
        }
    }

    let rows = table.rows_mut();
    for (row, date) in &parsed {
        rows[*row].insert(column.to_string(), Value::String(date.format("%Y-%m-%d").to_string()));
    }
    debug!(column, normalized = parsed.len(), "normalized date column");
    Ok(parsed.len())
}
