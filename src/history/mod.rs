// src/history/mod.rs
//! Parquet-backed ledger of what has already been loaded.

pub mod loaded;
pub mod table_history;

pub use loaded::{load_key, LoadHistory, LoadedRow};
pub use table_history::{HistoryRow, TableHistory};
