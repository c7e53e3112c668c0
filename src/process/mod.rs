// src/process/mod.rs
//! Turning pages into one normalized table.

pub mod date_parser;
pub mod driver;
pub mod pages;
pub mod table;

pub use date_parser::{normalize_date_column, parse_date};
pub use driver::{extract_table, ExtractPlan, Extracted};
pub use pages::{num_pages, Paging};
pub use table::{Record, Table};
