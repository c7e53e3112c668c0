// src/process/table.rs

use serde_json::{Map, Value};
use std::collections::HashSet;

/// One API row: column name → scalar, in the order the API sent them.
pub type Record = Map<String, Value>;

/// Every fetched page concatenated in fetch order.
///
/// `columns` is the first-seen union of record keys: the first record fixes
/// the leading columns, later records can only append new ones.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    /// Same names as `columns`, for membership checks.
    known: HashSet<String>,
    rows: Vec<Record>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page. Order is preserved and nothing is deduplicated.
    pub fn append(&mut self, records: Vec<Record>) {
        self.rows.reserve(records.len());
        for record in records {
            for key in record.keys() {
                if !self.known.contains(key) {
                    self.known.insert(key.clone());
                    self.columns.push(key.clone());
                }
            }
            self.rows.push(record);
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.known.contains(name)
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Record] {
        &mut self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of `row` laid out in column order; absent keys come back as `None`.
    pub fn row_cells<'a>(&'a self, row: &'a Record) -> impl Iterator<Item = Option<&'a Value>> + 'a {
        self.columns.iter().map(move |c| row.get(c))
    }
}
