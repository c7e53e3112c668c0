// src/fetch/socrata.rs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE},
    Client, Method,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};
use url::Url;

use super::{PageRequest, PageSource};
use crate::config::SocrataConnection;
use crate::error::PageError;
use crate::process::table::Record;

const APP_TOKEN_HEADER: &str = "X-App-Token";

/// Authenticated client for a Socrata open-data portal.
#[derive(Clone)]
pub struct SocrataClient {
    client: Client,
    base_url: Option<Url>,
    method: Method,
    headers: HeaderMap,
}

impl SocrataClient {
    pub fn new(
        connection: &SocrataConnection,
        method: &str,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<Self> {
        Self::with_client(Client::new(), connection, method, extra_headers)
    }

    pub fn with_client(
        client: Client,
        connection: &SocrataConnection,
        method: &str,
        extra_headers: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let base_url = base_url_for(connection)?;
        if let Some(base) = &base_url {
            info!("Base url is: {}", base);
        }

        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .with_context(|| format!("invalid HTTP method {method:?}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &connection.app_token {
            let mut value = HeaderValue::from_str(token).context("app token is not a valid header value")?;
            value.set_sensitive(true);
            headers.insert(APP_TOKEN_HEADER, value);
        }
        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name {name:?}"))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header {name}"))?;
            headers.insert(name, value);
        }
        debug!(headers = ?headers.keys().collect::<Vec<_>>(), "final headers used");

        Ok(Self {
            client,
            base_url,
            method,
            headers,
        })
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// Absolute endpoints are used as-is; relative ones hang off the connection host.
    pub fn resolve_endpoint(&self, endpoint: &str) -> Result<Url> {
        match Url::parse(endpoint) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base_url
                    .as_ref()
                    .ok_or_else(|| anyhow!("endpoint {endpoint:?} is relative and no host is configured"))?;
                base.join(endpoint)
                    .with_context(|| format!("joining {endpoint:?} onto {base}"))
            }
            Err(e) => Err(e).with_context(|| format!("parsing endpoint {endpoint:?}")),
        }
    }
}

fn base_url_for(connection: &SocrataConnection) -> Result<Option<Url>> {
    let Some(host) = connection.host.as_deref().filter(|h| !h.is_empty()) else {
        return Ok(None);
    };
    let raw = if host.contains("://") {
        host.to_string()
    } else {
        let schema = connection.schema.as_deref().unwrap_or("http");
        format!("{schema}://{host}")
    };
    let url = Url::parse(&raw).with_context(|| format!("parsing connection host {raw:?}"))?;
    Ok(Some(url))
}

#[async_trait]
impl PageSource for SocrataClient {
    #[instrument(level = "debug", skip(self, request), fields(page = request.page, offset = request.offset))]
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Record>, PageError> {
        let url = request.url();
        let transport = |e: reqwest::Error| PageError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };

        let resp = self
            .client
            .request(self.method.clone(), url.clone())
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status().as_u16();
        // 299 itself counts as a failure.
        if !(200..299).contains(&status) {
            return Err(PageError::Status {
                url: url.to_string(),
                status,
            });
        }
        info!("Request was successful with {}", status);

        let body = resp.bytes().await.map_err(transport)?;
        serde_json::from_slice::<Vec<Record>>(&body).map_err(|e| PageError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}
