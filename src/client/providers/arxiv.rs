use super::traits::{
    get_text, is_request_url, parse_url, query_param_u32, set_query_param, ProviderError,
    ProviderSettings, SourceProvider,
};
use crate::client::{HttpClientConfig, PaperRecord, SecureHttpClientFactory, SourceName};
use crate::config::ResearchSourceConfig;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

/// arXiv Atom API provider
pub struct ArxivProvider {
    client: Client,
    settings: ProviderSettings,
}

impl ArxivProvider {
    #[must_use]
    pub fn new(client: Client, settings: ProviderSettings) -> Self {
        Self { client, settings }
    }

    /// Create a provider with its own HTTP client
    pub fn from_config(config: &ResearchSourceConfig) -> crate::Result<Self> {
        let client = SecureHttpClientFactory::create_client(&HttpClientConfig::from_source_config(config))?;
        Ok(Self::new(
            client,
            ProviderSettings::from_config(config, &config.arxiv_base_url),
        ))
    }

    /// Resolve relative URLs to absolute URLs
    fn resolve_pdf_url(href: &str) -> Option<String> {
        if href.starts_with("http://") || href.starts_with("https://") {
            return Some(href.to_string());
        }
        if href.starts_with('/') {
            return Some(format!("https://arxiv.org{href}"));
        }
        if !href.contains("://") && href.contains("pdf") {
            return Some(format!("https://arxiv.org/{href}"));
        }
        Url::parse(href).ok().map(|u| u.to_string())
    }

    /// Default request for free text: `all:` search, newest first
    fn build_default_url(&self, query: &str, max_results: u32) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.settings.base_url)
            .map_err(|e| ProviderError::Other(format!("Invalid base URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("search_query", &format!("all:{}", query.trim()))
            .append_pair("start", "0")
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", "submittedDate")
            .append_pair("sortOrder", "descending");

        Ok(url)
    }

    /// Parse an Atom feed; returns the number of entries seen and the usable records
    fn parse_feed(response_text: &str) -> Result<(usize, Vec<PaperRecord>), ProviderError> {
        use roxmltree::Document;

        let doc = Document::parse(response_text)
            .map_err(|e| ProviderError::Parse(format!("Failed to parse XML: {e}")))?;

        let mut seen = 0;
        let mut records = Vec::new();

        for entry in doc.descendants().filter(|n| n.has_tag_name("entry")) {
            seen += 1;

            let mut id = None;
            let mut title = None;
            let mut summary = None;
            let mut year = None;
            let mut authors = Vec::new();
            let mut link = None;
            let mut pdf_url = None;

            for child in entry.children().filter(roxmltree::Node::is_element) {
                match child.tag_name().name() {
                    "id" => id = child.text().map(|t| t.trim().to_string()),
                    "title" => title = child.text().map(str::to_string),
                    "summary" => summary = child.text().map(str::to_string),
                    "published" => {
                        year = child
                            .text()
                            .map(str::trim)
                            .filter(|p| p.len() >= 4)
                            .and_then(|p| p.get(..4))
                            .map(str::to_string);
                    }
                    "author" => {
                        for name in child.descendants().filter(|n| n.has_tag_name("name")) {
                            if let Some(author) = name.text() {
                                authors.push(author.trim().to_string());
                            }
                        }
                    }
                    "link" => {
                        let Some(href) = child.attribute("href") else {
                            continue;
                        };
                        if child.attribute("type") == Some("application/pdf")
                            || child.attribute("title") == Some("pdf")
                        {
                            pdf_url = Self::resolve_pdf_url(href);
                        } else if child.attribute("rel").unwrap_or("alternate") == "alternate" {
                            link = Some(href.to_string());
                        }
                    }
                    _ => {}
                }
            }

            if title.as_deref().map_or(true, |t| t.trim().is_empty()) && id.is_none() {
                debug!("Skipping arXiv entry without title or id");
                continue;
            }

            records.push(
                PaperRecord::new(title, year, &authors, summary, link.or(id)).with_pdf_url(pdf_url),
            );
        }

        debug!("Parsed {} of {} arXiv entries", records.len(), seen);
        Ok((seen, records))
    }
}

#[async_trait]
impl SourceProvider for ArxivProvider {
    fn name(&self) -> SourceName {
        SourceName::Arxiv
    }

    fn error_prefix(&self) -> &'static str {
        "Error fetching from arXiv"
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

        let page_size = match query_param_u32(&url, "max_results").filter(|n| *n > 0) {
            Some(size) => size,
            None => {
                url = set_query_param(&url, "max_results", &max_results.to_string());
                max_results
            }
        };
        let mut start = query_param_u32(&url, "start").unwrap_or(0);

        info!("Searching arXiv (max {})", max_results);

        let mut records = Vec::new();
        for page in 0..self.settings.max_pages {
            let body = match get_text(&self.client, url.as_str(), &self.settings.retry, "arxiv").await {
                Ok(body) => body,
                Err(e) if page > 0 => {
                    warn!("arXiv page {} failed, keeping {} records: {}", page + 1, records.len(), e);
                    break;
                }
                Err(e) => return Err(e),
            };

            let (seen, parsed) = Self::parse_feed(&body)?;
            records.extend(parsed.into_iter().filter(|r| self.settings.keeps(r)));

            if records.len() >= max_results as usize || seen < page_size as usize {
                break;
            }

            start = start.saturating_add(page_size);
            url = set_query_param(&url, "start", &start.to_string());
            debug!("arXiv back-filling from start={}", start);
        }

        records.truncate(max_results as usize);
        info!("arXiv search completed: {} papers", records.len());
        Ok(records)
    }
}
