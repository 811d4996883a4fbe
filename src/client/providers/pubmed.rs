use super::traits::{
    get_text, is_request_url, parse_url, query_param_u32, set_query_param, ProviderError,
    ProviderSettings, SourceProvider,
};
use crate::client::{HttpClientConfig, PaperRecord, SecureHttpClientFactory, SourceName};
use crate::config::ResearchSourceConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

/// PubMed provider (NCBI E-utilities: esearch for ids, efetch for records)
pub struct PubMedProvider {
    client: Client,
    settings: ProviderSettings,
    etiquette: Etiquette,
}

/// NCBI usage parameters appended to every request
#[derive(Debug, Clone, Default)]
pub struct Etiquette {
    pub tool: String,
    pub email: Option<String>,
    pub api_key: Option<String>,
}

impl Etiquette {
    #[must_use]
    pub fn from_config(config: &ResearchSourceConfig) -> Self {
        Self {
            tool: config.pubmed_tool.clone(),
            email: config.pubmed_email.clone().filter(|e| !e.trim().is_empty()),
            api_key: config.pubmed_api_key.clone().filter(|k| !k.trim().is_empty()),
        }
    }

    fn apply(&self, url: &Url) -> Url {
        let mut url = url.clone();
        let params = [
            ("tool", Some(self.tool.as_str()).filter(|t| !t.is_empty())),
            ("email", self.email.as_deref()),
            ("api_key", self.api_key.as_deref()),
        ];
        for (key, value) in params {
            let Some(value) = value else { continue };
            if !url.query_pairs().any(|(k, _)| k == key) {
                url.query_pairs_mut().append_pair(key, value);
            }
        }
        url
    }
}

#[derive(Debug, Deserialize)]
struct PubMedSearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default, deserialize_with = "deserialize_idlist")]
    idlist: Vec<String>,
}

/// Support both array and string forms for idlist
fn deserialize_idlist<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct IdListVisitor;

    impl<'de> serde::de::Visitor<'de> for IdListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("string or list of strings")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(vec![v.to_string()])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::SeqAccess<'de>,
        {
            let mut values = Vec::new();
            while let Some(value) = seq.next_element::<String>()? {
                values.push(value);
            }
            Ok(values)
        }
    }

    deserializer.deserialize_any(IdListVisitor)
}

/// Concatenated text of an element and its descendants
fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.descendants()
        .filter(roxmltree::Node::is_text)
        .filter_map(|n| n.text())
        .collect::<String>()
}

fn child_text(node: roxmltree::Node<'_, '_>, name: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(name))
        .map(element_text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

impl PubMedProvider {
    #[must_use]
    pub fn new(client: Client, settings: ProviderSettings, etiquette: Etiquette) -> Self {
        Self {
            client,
            settings,
            etiquette,
        }
    }

    /// Create a provider with its own HTTP client
    pub fn from_config(config: &ResearchSourceConfig) -> crate::Result<Self> {
        let client = SecureHttpClientFactory::create_client(&HttpClientConfig::from_source_config(config))?;
        Ok(Self::new(
            client,
            ProviderSettings::from_config(config, &config.pubmed_base_url),
            Etiquette::from_config(config),
        ))
    }

    fn endpoint(&self, name: &str) -> Result<Url, ProviderError> {
        let base = self.settings.base_url.trim_end_matches('/');
        Url::parse(&format!("{base}/{name}"))
            .map_err(|e| ProviderError::Other(format!("Invalid base URL: {e}")))
    }

    fn build_esearch_url(&self, term: &str, max_results: u32) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("esearch.fcgi")?;
        url.query_pairs_mut()
            .append_pair("db", "pubmed")
            .append_pair("term", term.trim())
            .append_pair("retmax", &max_results.to_string())
            .append_pair("sort", "pub date")
            .append_pair("retmode", "json");
        Ok(url)
    }

    fn build_efetch_url(&self, ids: &[String]) -> Result<Url, ProviderError> {
        let mut url = self.endpoint("efetch.fcgi")?;
        url.query_pairs_mut()
            .append_pair("db", "pubmed")
            .append_pair("id", &ids.join(","))
            .append_pair("retmode", "xml");
        Ok(self.etiquette.apply(&url))
    }

    /// One esearch page plus the efetch for its ids; returns the id count and records
    async fn fetch_page(&self, esearch_url: &Url) -> Result<(usize, Vec<PaperRecord>), ProviderError> {
        let body = get_text(&self.client, esearch_url.as_str(), &self.settings.retry, "pubmed").await?;
        let ids = Self::parse_id_list(&body)?;
        if ids.is_empty() {
            return Ok((0, Vec::new()));
        }
        let efetch_url = self.build_efetch_url(&ids)?;
        let xml = get_text(&self.client, efetch_url.as_str(), &self.settings.retry, "pubmed").await?;
        Ok((ids.len(), Self::parse_articles(&xml)?))
    }

    fn parse_id_list(body: &str) -> Result<Vec<String>, ProviderError> {
        let response: PubMedSearchResponse = serde_json::from_str(body)
            .map_err(|e| ProviderError::Parse(format!("Invalid esearch response: {e}")))?;
        debug!(
            "PubMed esearch reported {} total hits",
            response.esearchresult.count.as_deref().unwrap_or("?")
        );
        Ok(response
            .esearchresult
            .idlist
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect())
    }

    fn parse_articles(xml: &str) -> Result<Vec<PaperRecord>, ProviderError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| ProviderError::Parse(format!("Failed to parse PubMed XML: {e}")))?;

        let mut records = Vec::new();
        for article in doc.descendants().filter(|n| n.has_tag_name("PubmedArticle")) {
            let Some(art) = article.descendants().find(|n| n.has_tag_name("Article")) else {
                debug!("Skipping PubMed entry without Article element");
                continue;
            };

            let title = art
                .children()
                .find(|n| n.has_tag_name("ArticleTitle"))
                .map(element_text);

            let pub_date = article.descendants().find(|n| n.has_tag_name("PubDate"));
            let year = pub_date.and_then(|d| {
                child_text(d, "Year").or_else(|| {
                    child_text(d, "MedlineDate").and_then(|m| m.get(..4).map(str::to_string))
                })
            });

            let authors: Vec<String> = article
                .descendants()
                .filter(|n| n.has_tag_name("Author"))
                .filter_map(|a| {
                    match (child_text(a, "ForeName"), child_text(a, "LastName")) {
                        (Some(first), Some(last)) => Some(format!("{first} {last}")),
                        (None, Some(last)) => Some(last),
                        (Some(first), None) => Some(first),
                        (None, None) => None,
                    }
                })
                .collect();

            let abstract_text = article
                .descendants()
                .find(|n| n.has_tag_name("Abstract"))
                .map(|abs| {
                    abs.descendants()
                        .filter(|n| n.has_tag_name("AbstractText"))
                        .map(element_text)
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join(" ")
                });

            let url = article
                .descendants()
                .find(|n| n.has_tag_name("PMID"))
                .map(element_text)
                .map(|pmid| pmid.trim().to_string())
                .filter(|pmid| !pmid.is_empty())
                .map(|pmid| format!("https://pubmed.ncbi.nlm.nih.gov/{pmid}/"));

            records.push(PaperRecord::new(title, year, &authors, abstract_text, url));
        }

        debug!("Parsed {} PubMed articles", records.len());
        Ok(records)
    }
}

#[async_trait]
impl SourceProvider for PubMedProvider {
    fn name(&self) -> SourceName {
        SourceName::Pubmed
    }

    fn error_prefix(&self) -> &'static str {
        "Error searching PubMed"
    }

    async fn search(
        &self,
        query_or_url: &str,
        max_results: u32,
    ) -> Result<Vec<PaperRecord>, ProviderError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let url = if is_request_url(query_or_url) {
            parse_url(query_or_url)?
        } else {
            self.build_esearch_url(query_or_url, max_results)?
        };
        let mut url = self.etiquette.apply(&url);

        let page_size = match query_param_u32(&url, "retmax").filter(|n| *n > 0) {
            Some(size) => size,
            None => {
                url = set_query_param(&url, "retmax", &max_results.to_string());
                max_results
            }
        };
        let mut start = query_param_u32(&url, "retstart").unwrap_or(0);

        info!("Searching PubMed (max {})", max_results);

        let mut records = Vec::new();
        for page in 0..self.settings.max_pages {
            let (seen, parsed) = match self.fetch_page(&url).await {
                Ok(page) => page,
                Err(e) if page > 0 => {
                    warn!("PubMed page {} failed, keeping {} records: {}", page + 1, records.len(), e);
                    break;
                }
                Err(e) => return Err(e),
            };

            records.extend(parsed.into_iter().filter(|r| self.settings.keeps(r)));

            if records.len() >= max_results as usize || seen < page_size as usize {
                break;
            }

            start = start.saturating_add(page_size);
            url = set_query_param(&url, "retstart", &start.to_string());
            debug!("PubMed back-filling from retstart={}", start);
        }

        records.truncate(max_results as usize);
        info!("PubMed search completed: {} papers", records.len());
        Ok(records)
    }
}
