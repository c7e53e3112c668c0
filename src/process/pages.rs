// src/process/pages.rs

use serde::{Deserialize, Serialize};

/// How the driver decides it has seen the whole resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Paging {
    /// Fetch `floor(total_rows / limit) + 1` pages, whatever they return.
    KnownTotal { total_rows: usize },
    /// Keep going until a page comes back shorter than the limit.
    UntilShortPage {
        #[serde(default)]
        max_pages: Option<usize>,
    },
}

impl Default for Paging {
    fn default() -> Self {
        Paging::UntilShortPage { max_pages: None }
    }
}

/// Page count for a previously measured row total.
///
/// Always one more than the number of full pages, so an exact multiple ends
/// on a trailing empty page.
pub fn num_pages(total_rows: usize, items_per_page: usize) -> usize {
    total_rows / items_per_page + 1
}

impl Paging {
    /// Upper bound on pages to request, if the mode has one.
    pub fn page_limit(&self, items_per_page: usize) -> Option<usize> {
        match self {
            Paging::KnownTotal { total_rows } => Some(num_pages(*total_rows, items_per_page)),
            Paging::UntilShortPage { max_pages } => *max_pages,
        }
    }

    /// Whether a page that returned `rows` records ends the loop.
    pub fn is_last_page(&self, rows: usize, items_per_page: usize) -> bool {
        match self {
            Paging::KnownTotal { .. } => false,
            Paging::UntilShortPage { .. } => rows < items_per_page,
        }
    }
}
