//! # Provider Traits Module
//!
//! The interface every scholarly source implements, plus the request plumbing the
//! providers share (retrying GET, status mapping, pagination URL rewriting).
//!
//! ## Key Components
//!
//! - [`SourceProvider`]: typed `search` plus a `fetch` that never fails
//! - [`SourceResult`]: what one source contributed to a run
//! - [`ProviderError`]: error taxonomy, split into transient and permanent failures
//!
//! ## Provider Implementation Guide
//!
//! ```no_run
//! use async_trait::async_trait;
//! use rust_research_orchestrator::client::{PaperRecord, SourceName};
//! use rust_research_orchestrator::client::providers::{ProviderError, SourceProvider};
//!
//! struct MyProvider;
//!
//! #[async_trait]
//! impl SourceProvider for MyProvider {
//!     fn name(&self) -> SourceName { SourceName::Openalex }
//!     fn error_prefix(&self) -> &'static str { "Error fetching from MyProvider" }
//!
//!     async fn search(&self, query_or_url: &str, max_results: u32) -> Result<Vec<PaperRecord>, ProviderError> {
//!         Ok(Vec::new())
//!     }
//! }
//! ```

use crate::client::{render_records, PaperRecord, SourceName, NO_RESULTS};
use crate::config::ResearchSourceConfig;
use crate::resilience::{with_retry, RetryConfig, Transient};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Errors that can occur during provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Map a non-success HTTP status to an error
    #[must_use]
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let snippet: String = body.chars().take(200).collect();
        match status.as_u16() {
            429 => Self::RateLimit,
            401 | 403 => Self::Auth(format!("HTTP {status}")),
            500..=599 => Self::ServiceUnavailable(format!("HTTP {status}")),
            _ => Self::InvalidQuery(format!("HTTP {status}: {snippet}")),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Network(format!("Connection failed: {e}"))
        } else {
            Self::Network(format!("Request failed: {e}"))
        }
    }
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::RateLimit | Self::ServiceUnavailable(_) | Self::Timeout
        )
    }
}

/// Settings shared by every provider
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    /// Endpoint the provider builds default requests against
    pub base_url: String,
    pub retry: RetryConfig,
    /// Records published before this year are dropped
    pub min_year: Option<u32>,
    /// Upper bound on pages read while back-filling after the year filter
    pub max_pages: u32,
}

impl ProviderSettings {
    #[must_use]
    pub fn from_config(config: &ResearchSourceConfig, base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            retry: RetryConfig {
                max_attempts: config.max_retries,
                base_delay: Duration::from_millis(config.retry_base_delay_ms),
                jitter: true,
            },
            min_year: config.min_year.filter(|y| *y > 0),
            max_pages: config.max_pages.max(1),
        }
    }

    /// Whether a record survives the minimum-year filter (unknown years pass)
    #[must_use]
    pub fn keeps(&self, record: &PaperRecord) -> bool {
        match (self.min_year, record.year_number()) {
            (Some(min), Some(year)) => i64::from(year) >= i64::from(min),
            _ => true,
        }
    }
}

/// What one source contributed to a run
#[derive(Debug, Clone, Serialize)]
pub struct SourceResult {
    pub source: SourceName,
    /// Records separated by blank lines, or a placeholder / error string
    pub raw_text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub records: Vec<PaperRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceResult {
    #[must_use]
    pub fn from_records(source: SourceName, records: Vec<PaperRecord>) -> Self {
        Self {
            source,
            raw_text: render_records(&records),
            records,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(source: SourceName, message: String) -> Self {
        Self {
            source,
            raw_text: message.clone(),
            records: Vec::new(),
            error: Some(message),
        }
    }

    /// Placeholder for a source that was not queried or did not finish
    #[must_use]
    pub fn not_queried(source: SourceName) -> Self {
        Self {
            source,
            raw_text: NO_RESULTS.to_string(),
            records: Vec::new(),
            error: None,
        }
    }

    /// Raw text supplied from outside (e.g. a `/synthesize` request)
    #[must_use]
    pub fn from_raw(source: SourceName, raw_text: String) -> Self {
        Self {
            source,
            raw_text,
            records: Vec::new(),
            error: None,
        }
    }
}

/// Core trait for scholarly source providers.
///
/// Implementors must:
/// - Be thread-safe (`Send + Sync`)
/// - Never return more than `max_results` records from `search`
/// - Skip malformed entries rather than failing the whole response
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Which source this provider queries
    fn name(&self) -> SourceName;

    /// Prefix of the error string `fetch` reports on failure
    fn error_prefix(&self) -> &'static str;

    /// Search by free text or by a fully built request URL (anything starting with `http`).
    async fn search(
        &self,
        query_or_url: &str,
        max_results: u32,
    ) -> Result<Vec<PaperRecord>, ProviderError>;

    /// Run a search and capture the outcome, recovering from any failure
    async fn collect(&self, query_or_url: &str, max_results: u32) -> SourceResult {
        match self.search(query_or_url, max_results).await {
            Ok(mut records) => {
                records.truncate(max_results as usize);
                SourceResult::from_records(self.name(), records)
            }
            Err(e) => {
                warn!("{} search failed: {}", self.name().display_name(), e);
                SourceResult::failed(self.name(), format!("{}: {e}", self.error_prefix()))
            }
        }
    }

    /// Records separated by blank lines, `"No papers found."`, or an error string
    async fn fetch(&self, query_or_url: &str, max_results: u32) -> String {
        self.collect(query_or_url, max_results).await.raw_text
    }
}

/// Whether the argument is a prebuilt request URL rather than free text
#[must_use]
pub fn is_request_url(query_or_url: &str) -> bool {
    query_or_url.trim_start().starts_with("http")
}

/// GET a URL as text, retrying transient failures
pub async fn get_text(
    client: &Client,
    url: &str,
    retry: &RetryConfig,
    label: &str,
) -> Result<String, ProviderError> {
    with_retry(retry, label, || async {
        debug!("{} request: {}", label, url);
        let response = client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }
        response
            .text()
            .await
            .map_err(|e| ProviderError::Network(format!("Failed to read response: {e}")))
    })
    .await
}

/// Parse a request URL
pub fn parse_url(raw: &str) -> Result<Url, ProviderError> {
    Url::parse(raw.trim()).map_err(|e| ProviderError::InvalidQuery(format!("Invalid URL '{raw}': {e}")))
}

/// Read a numeric query parameter
#[must_use]
pub fn query_param_u32(url: &Url, key: &str) -> Option<u32> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.trim().parse().ok())
}

/// Replace (or add) a query parameter, keeping every other pair in order
#[must_use]
pub fn set_query_param(url: &Url, key: &str, value: &str) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut updated = url.clone();
    {
        let mut serializer = updated.query_pairs_mut();
        serializer.clear();
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
        serializer.append_pair(key, value);
    }
    updated
}
