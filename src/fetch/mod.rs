// src/fetch/mod.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};
use url::Url;

use crate::error::{PageError, PipelineError};
use crate::process::table::Record;

pub mod socrata;

pub use socrata::SocrataClient;

/// One limit/offset slice of the remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub endpoint: Url,
    pub page: usize,
    pub limit: usize,
    pub offset: usize,
}

impl PageRequest {
    pub fn new(endpoint: Url, page: usize, limit: usize) -> Self {
        Self {
            endpoint,
            page,
            limit,
            offset: page * limit,
        }
    }

    /// `endpoint` with `$limit` and `$offset` appended, percent-encoded.
    pub fn url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("$limit", &self.limit.to_string())
            .append_pair("$offset", &self.offset.to_string());
        url
    }
}

/// Anything that can answer a page request with records.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, PageError>;
}

/// What the driver does when a page request fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log non-2xx pages and carry on as if they were empty.
    Skip,
    /// Retry retryable failures with exponential backoff, then fail the run.
    Retry {
        max_retries: u32,
        initial_backoff_ms: u64,
    },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Retry {
            max_retries: 3,
            initial_backoff_ms: 500,
        }
    }
}

/// Result of one page after the failure policy has been applied.
#[derive(Debug)]
pub enum PageOutcome {
    Records { records: Vec<Record>, attempts: u32 },
    Skipped(PageError),
}

/// Fetch `request` from `source`, honouring `policy`.
pub async fn fetch_with_policy(
    source: &dyn PageSource,
    request: &PageRequest,
    policy: &FailurePolicy,
) -> Result<PageOutcome, PipelineError> {
    let fail = |attempts: u32, source: PageError| PipelineError::PageFailed {
        page: request.page,
        offset: request.offset,
        attempts,
        source,
    };

    match policy {
        FailurePolicy::Skip => match source.fetch_page(request).await {
            Ok(records) => Ok(PageOutcome::Records {
                records,
                attempts: 1,
            }),
            Err(e @ PageError::Status { .. }) => {
                error!(page = request.page, offset = request.offset, error = %e, "Error from request response, skipping page");
                Ok(PageOutcome::Skipped(e))
            }
            Err(e) => Err(fail(1, e)),
        },
        FailurePolicy::Retry {
            max_retries,
            initial_backoff_ms,
        } => {
            let mut attempts = 0;
            loop {
                attempts += 1;
                match source.fetch_page(request).await {
                    Ok(records) => return Ok(PageOutcome::Records { records, attempts }),
                    Err(e) if e.is_retryable() && attempts <= *max_retries => {
                        let backoff = initial_backoff_ms * 2u64.pow(attempts - 1);
                        warn!(page = request.page, attempt = attempts, delay_ms = backoff, error = %e, "Retrying page");
                        sleep(Duration::from_millis(backoff)).await;
                    }
                    Err(e) => {
                        error!(page = request.page, attempts, error = %e, "Giving up on page");
                        return Err(fail(attempts, e));
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    fn request(page: usize) -> PageRequest {
        PageRequest::new(
            Url::parse("https://data.example.org/resource/abcd.json").unwrap(),
            page,
            150_000,
        )
    }

    #[test]
    fn page_url_carries_encoded_limit_and_offset() {
        let url = request(2).url();
        assert_eq!(url.query(), Some("%24limit=150000&%24offset=300000"));
        assert_eq!(url.path(), "/resource/abcd.json");
    }

    #[test]
    fn trailing_question_mark_does_not_double_up() {
        let endpoint = Url::parse("https://data.example.org/resource/abcd.json?").unwrap();
        let url = PageRequest::new(endpoint, 0, 10).url();
        assert_eq!(url.as_str(), "https://data.example.org/resource/abcd.json?%24limit=10&%24offset=0");
    }

    #[tokio::test]
    async fn skip_policy_swallows_status_errors() {
        let source = ScriptedSource::new(vec![Err(status(500))]);
        let out = fetch_with_policy(&source, &request(0), &FailurePolicy::Skip)
            .await
            .unwrap();
        assert!(matches!(out, PageOutcome::Skipped(e) if e.status() == Some(500)));
        assert_eq!(source.offsets(), vec![0]);
    }

    #[tokio::test]
    async fn skip_policy_still_fails_on_undecodable_body() {
        let source = ScriptedSource::new(vec![Err(PageError::Decode {
            url: "http://test".into(),
            message: "expected array".into(),
        })]);
        let err = fetch_with_policy(&source, &request(0), &FailurePolicy::Skip)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PageFailed { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn retry_policy_recovers_from_transient_failures() {
        let source = ScriptedSource::new(vec![Err(status(503)), Err(status(429)), Ok(rows("a", 2))]);
        let policy = FailurePolicy::Retry {
            max_retries: 3,
            initial_backoff_ms: 1,
        };
        match fetch_with_policy(&source, &request(1), &policy).await.unwrap() {
            PageOutcome::Records { records, attempts } => {
                assert_eq!(records.len(), 2);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(source.offsets(), vec![150_000; 3]);
    }

    #[tokio::test]
    async fn retry_policy_gives_up_after_max_retries() {
        let source = ScriptedSource::new(vec![Err(status(500)), Err(status(500)), Err(status(500))]);
        let policy = FailurePolicy::Retry {
            max_retries: 2,
            initial_backoff_ms: 1,
        };
        let err = fetch_with_policy(&source, &request(0), &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PageFailed { page: 0, attempts: 3, .. }));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let source = ScriptedSource::new(vec![Err(status(403)), Ok(rows("a", 1))]);
        let err = fetch_with_policy(&source, &request(0), &FailurePolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PageFailed { attempts: 1, .. }));
        assert_eq!(source.offsets().len(), 1);
    }
}
