use super::traits::{
    get_text, is_request_url, parse_url, query_param_u32, set_query_param, ProviderError,
    ProviderSettings, SourceProvider,
};
use crate::client::{HttpClientConfig, PaperRecord, SecureHttpClientFactory, SourceName};
use crate::config::ResearchSourceConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use url::Url;

/// Inverted-index positions at or beyond this are ignored
const MAX_ABSTRACT_WORDS: usize = 10_000;

/// OpenAlex API provider
///
/// OpenAlex is a fully open catalog of scholarly works; no authentication is required.
/// API Documentation: https://docs.openalex.org/
pub struct OpenAlexProvider {
    client: Client,
    settings: ProviderSettings,
}

/// OpenAlex Work response structure
#[derive(Debug, Clone, Deserialize)]
struct OpenAlexWork {
    id: Option<String>,
    display_name: Option<String>,
    title: Option<String>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    publication_year: Option<i64>,
    primary_location: Option<Location>,
    best_oa_location: Option<Location>,
    abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Authorship {
    author: Option<AuthorInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct AuthorInfo {
    display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Location {
    source: Option<SourceInfo>,
    pdf_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceInfo {
    url: Option<String>,
}

/// OpenAlex API response structure
#[derive(Debug, Clone, Deserialize)]
struct OpenAlexResponse {
    #[serde(default)]
    results: Vec<Value>,
}

impl OpenAlexProvider {
    #[must_use]
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }

    /// Create a provider with its own HTTP client
    pub fn from_config(config: &ResearchSourceConfig) -> crate::Result<Self> {
        let client = SecureHttpClientFactory::create_client(&HttpClientConfig::from_source_config(config))?;
        Ok(Self::new(
            client,
            ProviderSettings::from_config(config, &config.openalex_base_url),
        ))
    }

    fn build_default_url(&self, query: &str, max_results: u32) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.settings.base_url)
            .map_err(|e| ProviderError::Other(format!("Invalid base URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("search", query.trim())
            .append_pair("per_page", &max_results.clamp(1, 200).to_string())
            .append_pair("sort", "publication_year:desc");

        Ok(url)
    }

    /// Parse a works page; returns the number of results seen and the usable records
    fn parse_response(body: &str) -> Result<(usize, Vec<PaperRecord>), ProviderError> {
        let response: OpenAlexResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::Parse(format!("Invalid OpenAlex response: {e}")))?;

        let seen = response.results.len();
        let mut records = Vec::new();

        for value in response.results {
            let work = match serde_json::from_value::<OpenAlexWork>(value) {
                Ok(work) => work,
                Err(e) => {
                    warn!("Skipping malformed OpenAlex work: {}", e);
                    continue;
                }
            };

            let authors: Vec<String> = work
                .authorships
                .iter()
                .filter_map(|a| a.author.as_ref())
                .filter_map(|a| a.display_name.clone())
                .collect();

            let url = work
                .primary_location
                .as_ref()
                .and_then(|loc| loc.source.as_ref())
                .and_then(|src| src.url.clone())
                .filter(|u| !u.is_empty())
                .or_else(|| work.id.clone());

            let pdf_url = work
                .best_oa_location
                .as_ref()
                .and_then(|loc| loc.pdf_url.clone())
                .or_else(|| work.primary_location.as_ref().and_then(|loc| loc.pdf_url.clone()));

            let abstract_text = Self::reconstruct_abstract(work.abstract_inverted_index.as_ref());

            records.push(
                PaperRecord::new(
                    work.display_name.or(work.title),
                    work.publication_year.map(|y| y.to_string()),
                    &authors,
                    abstract_text,
                    url,
                )
                .with_pdf_url(pdf_url),
            );
        }

        debug!("Parsed {} of {} OpenAlex works", records.len(), seen);
        Ok((seen, records))
    }

    /// Reconstruct abstract text from OpenAlex's inverted index format
    fn reconstruct_abstract(inverted_index: Option<&HashMap<String, Vec<u32>>>) -> Option<String> {
        let index = inverted_index?;

        let max_position = index
            .values()
            .flatten()
            .map(|&pos| pos as usize)
            .filter(|&pos| pos < MAX_ABSTRACT_WORDS)
            .max()?;

        let mut words = vec![None; max_position + 1];
        for (word, positions) in index {
            for &pos in positions {
                if let Some(slot) = words.get_mut(pos as usize) {
                    *slot = Some(word.as_str());
                }
            }
        }

        let abstract_text = words.into_iter().flatten().collect::<Vec<&str>>().join(" ");
        if abstract_text.trim().is_empty() {
            None
        } else {
            Some(abstract_text)
        }
    }
}

#[async_trait]
impl SourceProvider for OpenAlexProvider {
    fn name(&self) -> SourceName {
        SourceName::Openalex
    }

    fn error_prefix(&self) -> &'static str {
        "Error fetching from OpenAlex"
    }

    async fn search(
        &self,
        query_or_url: &str,
        max_results: u32,
    ) -> Result<Vec<PaperRecord>, ProviderError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let mut url = if is_request_url(query_or_url) {
            parse_url(query_or_url)?
        } else {
            self.build_default_url(query_or_url, max_results)?
        };

        let page_size = match query_param_u32(&url, "per_page").filter(|n| *n > 0) {
            Some(size) => size,
            None => {
                url = set_query_param(&url, "per_page", &max_results.to_string());
                max_results
            }
        };
        let mut page_number = query_param_u32(&url, "page").unwrap_or(1).max(1);

        info!("Searching OpenAlex (max {})", max_results);

        let mut records = Vec::new();
        for page in 0..self.settings.max_pages {
            let body = match get_text(&self.client, url.as_str(), &self.settings.retry, "openalex").await {
                Ok(body) => body,
                Err(e) if page > 0 => {
                    warn!("OpenAlex page {} failed, keeping {} records: {}", page_number, records.len(), e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let (seen, parsed) = Self::parse_response(&body)?;
            records.extend(parsed.into_iter().filter(|r| self.settings.keeps(r)));

            if records.len() >= max_results as usize || seen < page_size as usize {
                break;
            }

            page_number = page_number.saturating_add(1);
            url = set_query_param(&url, "page", &page_number.to_string());
            debug!("OpenAlex back-filling from page={}", page_number);
        }

        records.truncate(max_results as usize);
        info!("OpenAlex search completed: {} papers", records.len());
        Ok(records)
    }
}
