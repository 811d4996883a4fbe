//! # Client Module
//!
//! HTTP plumbing and the normalized record type shared by every scholarly source.
//!
//! - **Provider Layer**: one fetcher per source (`arXiv`, `PubMed`, `OpenAlex`) in [`providers`]
//! - **Records**: [`PaperRecord`] is what every fetcher produces and what the ranker consumes
//! - **Transport**: [`SecureHttpClientFactory`] builds the `reqwest` clients the providers share
//!
//! ## Security Considerations
//!
//! All HTTP clients are configured with:
//! - HTTPS-only connections unless explicitly relaxed (local mocks)
//! - Certificate validation with the built-in root store
//! - Request and connect timeouts

pub mod providers;

use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder text a fetcher returns when nothing matched
pub const NO_PAPERS_FOUND: &str = "No papers found.";

/// Placeholder text for a source that was never queried
pub const NO_RESULTS: &str = "No results";

/// HTTP client configuration for research source integration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout duration
    pub timeout: Duration,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Maximum redirects to follow
    pub max_redirects: u32,
    /// User agent string
    pub user_agent: String,
    /// Refuse plain-HTTP URLs
    pub https_only: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            connect_timeout: Duration::from_secs(3),
            max_redirects: 10,
            user_agent: "rust_research_orchestrator/0.3 (Academic Research Tool)".to_string(),
            https_only: true,
        }
    }
}

impl HttpClientConfig {
    /// Build from the `research_source` configuration section
    #[must_use]
    pub fn from_source_config(config: &crate::config::ResearchSourceConfig) -> Self {
        let all_https = [
            &config.arxiv_base_url,
            &config.pubmed_base_url,
            &config.openalex_base_url,
        ]
        .iter()
        .all(|url| url.starts_with("https://"));

        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            user_agent: config.user_agent.clone(),
            https_only: all_https,
            ..Self::default()
        }
    }
}

/// Factory for HTTP clients with enforced transport defaults.
///
/// # Example
///
/// ```no_run
/// use rust_research_orchestrator::client::{SecureHttpClientFactory, HttpClientConfig};
/// use std::time::Duration;
///
/// let config = HttpClientConfig {
///     timeout: Duration::from_secs(10),
///     ..HttpClientConfig::default()
/// };
///
/// let client = SecureHttpClientFactory::create_client(&config)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SecureHttpClientFactory;

impl SecureHttpClientFactory {
    /// Creates an HTTP client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend fails to initialize.
    pub fn create_client(config: &HttpClientConfig) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .user_agent(&config.user_agent)
            .tls_built_in_root_certs(true)
            .https_only(config.https_only)
            .connection_verbose(false)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(crate::Error::Http)
    }
}

/// The scholarly sources the orchestrator knows how to query
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    Arxiv,
    Pubmed,
    Openalex,
}

impl SourceName {
    pub const ALL: [Self; 3] = [Self::Arxiv, Self::Pubmed, Self::Openalex];

    /// Lowercase key used in payloads and logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Arxiv => "arxiv",
            Self::Pubmed => "pubmed",
            Self::Openalex => "openalex",
        }
    }

    /// Human-facing name
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Arxiv => "arXiv",
            Self::Pubmed => "PubMed",
            Self::Openalex => "OpenAlex",
        }
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(Self::Arxiv),
            "pubmed" => Ok(Self::Pubmed),
            "openalex" => Ok(Self::Openalex),
            other => Err(crate::Error::InvalidInput {
                field: "source".to_string(),
                reason: format!("Unknown source '{other}'"),
            }),
        }
    }
}

/// A normalized paper as returned by any source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PaperRecord {
    pub title: String,
    /// Four-digit year, or `"N/A"`
    pub year: String,
    /// Comma-separated author list, or `"N/A"`
    pub authors: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_url: Option<String>,
}

impl PaperRecord {
    /// Build a record, substituting placeholders for missing fields
    #[must_use]
    pub fn new(
        title: Option<String>,
        year: Option<String>,
        authors: &[String],
        abstract_text: Option<String>,
        url: Option<String>,
    ) -> Self {
        let authors: Vec<&str> = authors
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();

        Self {
            title: title
                .map(|t| collapse_whitespace(&t))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "No title".to_string()),
            year: year
                .map(|y| y.trim().to_string())
                .filter(|y| !y.is_empty())
                .unwrap_or_else(|| "N/A".to_string()),
            authors: if authors.is_empty() {
                "N/A".to_string()
            } else {
                authors.join(", ")
            },
            abstract_text: abstract_text
                .map(|a| collapse_whitespace(&a))
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| "No abstract".to_string()),
            url: url.map(|u| u.trim().to_string()).unwrap_or_default(),
            pdf_url: None,
        }
    }

    #[must_use]
    pub fn with_pdf_url(mut self, url: Option<String>) -> Self {
        self.pdf_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    /// Publication year as a number, when known
    #[must_use]
    pub fn year_number(&self) -> Option<i32> {
        self.year.parse().ok()
    }

    /// Text block used in raw source output and synthesis input
    #[must_use]
    pub fn render(&self) -> String {
        let mut block = format!(
            "{} ({}) by {}\nAbstract: {}\nURL: {}",
            self.title, self.year, self.authors, self.abstract_text, self.url
        );
        if let Some(pdf) = &self.pdf_url {
            block.push_str("\nPDF: ");
            block.push_str(pdf);
        }
        block
    }

    /// Dedup identity: the url, else the title
    #[must_use]
    pub fn identity(&self) -> &str {
        if self.url.is_empty() {
            &self.title
        } else {
            &self.url
        }
    }
}

/// Join records the way every source reports them
#[must_use]
pub fn render_records(records: &[PaperRecord]) -> String {
    if records.is_empty() {
        return NO_PAPERS_FOUND.to_string();
    }
    records
        .iter()
        .map(PaperRecord::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Whether a source's text holds records rather than a placeholder or an error
#[must_use]
pub fn is_usable_content(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text != NO_RESULTS
        && !text.starts_with("No papers found")
        && !text.starts_with("Error")
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
