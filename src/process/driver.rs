// src/process/driver.rs

use tracing::{info, instrument, warn};
use url::Url;

use crate::error::PipelineError;
use crate::fetch::{fetch_with_policy, FailurePolicy, PageOutcome, PageRequest, PageSource};
use crate::process::{date_parser::normalize_date_column, pages::Paging, table::Table};

/// Everything the fetch/accumulate loop needs to know about one resource.
#[derive(Debug, Clone)]
pub struct ExtractPlan {
    pub endpoint: Url,
    pub items_per_page: usize,
    pub paging: Paging,
    pub failure_policy: FailurePolicy,
    pub date_column: String,
}

impl ExtractPlan {
    /// Fixed page count from a previously measured total, failed pages skipped.
    pub fn known_total(
        endpoint: Url,
        items_per_page: usize,
        total_rows: usize,
        date_column: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            items_per_page,
            paging: Paging::KnownTotal { total_rows },
            failure_policy: FailurePolicy::Skip,
            date_column: date_column.into(),
        }
    }
}

/// The normalized table plus a little bookkeeping about how it was built.
#[derive(Debug)]
pub struct Extracted {
    pub table: Table,
    pub pages_fetched: usize,
    pub pages_skipped: usize,
}

/// Fetch every page of `plan.endpoint` in order, accumulate, normalize dates.
#[instrument(level = "info", skip(source, plan), fields(endpoint = %plan.endpoint, per_page = plan.items_per_page))]
pub async fn extract_table(
    source: &dyn PageSource,
    plan: &ExtractPlan,
) -> Result<Extracted, PipelineError> {
    let limit = plan.paging.page_limit(plan.items_per_page);
    if let Some(n) = limit {
        info!(num_pages = n, "fetching a fixed number of pages");
    }

    let mut table = Table::new();
    let mut page = 0;
    let mut pages_skipped = 0;

    while limit.map_or(true, |n| page < n) {
        let request = PageRequest::new(plan.endpoint.clone(), page, plan.items_per_page);
        info!(page, offset = request.offset, "Executing export of page from {}", request.url());

        let rows = match fetch_with_policy(source, &request, &plan.failure_policy).await? {
            PageOutcome::Records { records, attempts } => {
                let n = records.len();
                table.append(records);
                info!(page, rows = n, attempts, total_rows = table.len(), "page accumulated");
                n
            }
            PageOutcome::Skipped(e) => {
                warn!(page, error = %e, "page contributed no rows");
                pages_skipped += 1;
                0
            }
        };

        page += 1;
        if plan.paging.is_last_page(rows, plan.items_per_page) {
            break;
        }
    }

    normalize_date_column(&mut table, &plan.date_column)?;
    info!(
        pages = page,
        pages_skipped,
        rows = table.len(),
        columns = table.columns().len(),
        "extraction complete"
    );

    Ok(Extracted {
        table,
        pages_fetched: page,
        pages_skipped,
    })
}
