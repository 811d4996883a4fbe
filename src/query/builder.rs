//! Pure builders that render optimized keywords into source request URLs.

use crate::client::SourceName;
use crate::config::ResearchSourceConfig;
use crate::query::OptimizedQuery;
use regex::Regex;
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::LazyLock;
use url::form_urlencoded;

const DOMAIN_ANCHORS: [&str; 11] = [
    "material",
    "catalyst",
    "alloy",
    "crystal",
    "molecule",
    "molecular",
    "synthesis",
    "adsorption",
    "band gap",
    "formation energy",
    "surfaces",
];

const GRAPH_MODEL_TERMS: [&str; 5] = ["neural", "gnn", "message passing", "convolution", "attention"];

static SUBJECT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z-]+\.[A-Za-z]{2,3}$").expect("subject code pattern is valid"));

static PUBMED_REWRITES: LazyLock<[(Regex, &'static str); 2]> = LazyLock::new(|| {
    [
        (Regex::new(r"\btherapy\b").expect("valid pattern"), "therapeutic"),
        (Regex::new(r"\btreatment\b").expect("valid pattern"), "therapeutic"),
    ]
});

static ARXIV_REWRITES: LazyLock<[(Regex, &'static str); 2]> = LazyLock::new(|| {
    [
        (Regex::new(r"\bnew\b").expect("valid pattern"), "novel"),
        (Regex::new(r"\bbest\b").expect("valid pattern"), "optimal"),
    ]
});

/// Endpoints the builders render URLs against
#[derive(Debug, Clone)]
pub struct QueryEndpoints {
    pub arxiv: String,
    pub pubmed_esearch: String,
    pub openalex: String,
}

impl Default for QueryEndpoints {
    fn default() -> Self {
        Self::from_config(&ResearchSourceConfig::default())
    }
}

impl QueryEndpoints {
    #[must_use]
    pub fn from_config(config: &ResearchSourceConfig) -> Self {
        Self {
            arxiv: config.arxiv_base_url.clone(),
            pubmed_esearch: format!("{}/esearch.fcgi", config.pubmed_base_url.trim_end_matches('/')),
            openalex: config.openalex_base_url.clone(),
        }
    }
}

/// One request per source, built from the same keywords
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct ApiQueries {
    pub arxiv: String,
    pub pubmed: String,
    pub openalex: String,
    pub google_scholar: String,
}

impl ApiQueries {
    /// Request for a source; empty when no keywords were available
    #[must_use]
    pub fn for_source(&self, source: SourceName) -> &str {
        match source {
            SourceName::Arxiv => &self.arxiv,
            SourceName::Pubmed => &self.pubmed,
            SourceName::Openalex => &self.openalex,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    endpoints: QueryEndpoints,
}

fn split_keywords(keywords: &[String]) -> (Vec<&str>, Vec<&str>) {
    let singles = keywords
        .iter()
        .filter(|kw| !kw.contains(' '))
        .map(String::as_str)
        .collect();
    let phrases = keywords
        .iter()
        .filter(|kw| kw.contains(' '))
        .map(String::as_str)
        .collect();
    (singles, phrases)
}

fn scoped_group(terms: &[&str]) -> String {
    let scoped: Vec<String> = terms
        .iter()
        .map(|t| format!("ti:\"{t}\""))
        .chain(terms.iter().map(|t| format!("abs:\"{t}\"")))
        .collect();
    format!("({})", scoped.join(" OR "))
}

fn with_params(base: &str, params: &[(&str, String)]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
        serializer.append_pair(key, value);
    }
    format!("{base}?{}", serializer.finish())
}

fn is_domain_anchor(phrase: &str) -> bool {
    let lowered = phrase.to_lowercase();
    DOMAIN_ANCHORS.iter().any(|tok| lowered.contains(tok))
}

fn is_graph_model_anchor(phrase: &str) -> bool {
    let lowered = phrase.to_lowercase();
    lowered.contains("graph") && GRAPH_MODEL_TERMS.iter().any(|t| lowered.contains(t))
}

impl QueryBuilder {
    #[must_use]
    pub fn new(endpoints: QueryEndpoints) -> Self {
        Self { endpoints }
    }

    /// Boolean `ti:`/`abs:` query, newest submissions first
    #[must_use]
    pub fn arxiv(&self, keywords: &[String], _year: i32, max_results: u32) -> String {
        if keywords.is_empty() {
            return String::new();
        }

        let (singles, phrases) = split_keywords(keywords);
        let mut must_groups = Vec::new();
        let mut optional_groups = Vec::new();

        if !phrases.is_empty() {
            let anchors: Vec<&str> = phrases.iter().copied().filter(|p| is_domain_anchor(p)).collect();
            let graph_phrases: Vec<&str> = phrases
                .iter()
                .copied()
                .filter(|p| is_graph_model_anchor(p))
                .collect();

            let core: Vec<&str> = match anchors.first() {
                Some(&anchor) => {
                    let mut core = vec![anchor];
                    if let Some(&graph) = graph_phrases.first() {
                        if graph != anchor {
                            core.push(graph);
                        }
                    }
                    core
                }
                None => vec![phrases[0]],
            };

            for phrase in &core {
                must_groups.push(format!("(ti:\"{phrase}\" OR abs:\"{phrase}\")"));
            }

            let remaining: Vec<&str> = phrases.iter().copied().filter(|p| !core.contains(p)).collect();
            if !remaining.is_empty() {
                optional_groups.push(scoped_group(&remaining));
            }
        }

        if !singles.is_empty() {
            optional_groups.push(scoped_group(&singles));
        }

        let subject_codes: Vec<String> = keywords
            .iter()
            .filter(|kw| SUBJECT_CODE.is_match(kw))
            .map(|code| format!("cat:{code}"))
            .collect();
        if !subject_codes.is_empty() {
            optional_groups.push(format!("({})", subject_codes.join(" OR ")));
        }

        let search_query = if !must_groups.is_empty() {
            if !optional_groups.is_empty() {
                must_groups.push(format!("({})", optional_groups.join(" OR ")));
            }
            must_groups.join(" AND ")
        } else if !optional_groups.is_empty() {
            format!("({})", optional_groups.join(" OR "))
        } else {
            keywords
                .iter()
                .map(|kw| format!("\"{kw}\""))
                .collect::<Vec<_>>()
                .join(" OR ")
        };

        with_params(
            &self.endpoints.arxiv,
            &[
                ("search_query", format!("({search_query})")),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ],
        )
    }

    /// PubMed search term (`"kw"[Title/Abstract]` alternatives plus a publication-date floor)
    #[must_use]
    pub fn pubmed_term(keywords: &[String], year: i32) -> String {
        if keywords.is_empty() {
            return String::new();
        }
        let (singles, phrases) = split_keywords(keywords);
        let keyword_query = phrases
            .iter()
            .chain(singles.iter())
            .map(|kw| format!("\"{kw}\"[Title/Abstract]"))
            .collect::<Vec<_>>()
            .join(" OR ");
        format!("({keyword_query}) AND ({year}[Date - Publication] : 3000[Date - Publication])")
    }

    /// esearch URL sorted by relevance
    #[must_use]
    pub fn pubmed(&self, keywords: &[String], year: i32, max_results: u32) -> String {
        if keywords.is_empty() {
            return String::new();
        }
        with_params(
            &self.endpoints.pubmed_esearch,
            &[
                ("db", "pubmed".to_string()),
                ("term", Self::pubmed_term(keywords, year)),
                ("retmax", max_results.to_string()),
                ("retmode", "json".to_string()),
                ("sort", "relevance".to_string()),
            ],
        )
    }

    /// Works search sorted newest first, filtered to `year` and later
    #[must_use]
    pub fn openalex(&self, keywords: &[String], year: i32, max_results: u32) -> String {
        if keywords.is_empty() {
            return String::new();
        }
        with_params(
            &self.endpoints.openalex,
            &[
                ("search", keywords.join(" ")),
                ("per_page", max_results.to_string()),
                ("sort", "publication_year:desc".to_string()),
                ("filter", format!("publication_year:>{}", year.saturating_sub(1))),
            ],
        )
    }

    /// Requests for every source, with per-API keyword rewrites applied
    #[must_use]
    pub fn api_queries(&self, optimized: &OptimizedQuery, max_results: u32) -> ApiQueries {
        let keywords = &optimized.keywords;
        let year = optimized.preferred_year;
        ApiQueries {
            arxiv: self.arxiv(
                &optimize_keywords_for_api(keywords, SourceName::Arxiv),
                year,
                max_results,
            ),
            pubmed: self.pubmed(
                &optimize_keywords_for_api(keywords, SourceName::Pubmed),
                year,
                max_results,
            ),
            openalex: self.openalex(keywords, year, max_results),
            google_scholar: build_google_scholar_query(keywords, year),
        }
    }
}

#[must_use]
pub fn build_arxiv_query(keywords: &[String], year: i32, max_results: u32) -> String {
    QueryBuilder::default().arxiv(keywords, year, max_results)
}

#[must_use]
pub fn build_pubmed_query(keywords: &[String], year: i32, max_results: u32) -> String {
    QueryBuilder::default().pubmed(keywords, year, max_results)
}

#[must_use]
pub fn build_openalex_query(keywords: &[String], year: i32, max_results: u32) -> String {
    QueryBuilder::default().openalex(keywords, year, max_results)
}

/// Quoted keywords with an `after:` year filter
#[must_use]
pub fn build_google_scholar_query(keywords: &[String], year: i32) -> String {
    if keywords.is_empty() {
        return String::new();
    }
    let quoted = keywords
        .iter()
        .map(|kw| format!("\"{kw}\""))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{quoted} after:{}", year.saturating_sub(1))
}

/// Lowercase keywords and apply per-source vocabulary rewrites
#[must_use]
pub fn optimize_keywords_for_api(keywords: &[String], api: SourceName) -> Vec<String> {
    let rewrites: &[(Regex, &str)] = match api {
        SourceName::Pubmed => &*PUBMED_REWRITES,
        SourceName::Arxiv => &*ARXIV_REWRITES,
        SourceName::Openalex => &[],
    };

    keywords
        .iter()
        .map(|kw| {
            rewrites
                .iter()
                .fold(kw.trim().to_lowercase(), |acc, (pattern, replacement)| {
                    pattern.replace_all(&acc, *replacement).into_owned()
                })
        })
        .collect()
}

/// Requests for every source against the public endpoints
#[must_use]
pub fn build_api_queries(optimized: &OptimizedQuery, max_results: u32) -> ApiQueries {
    QueryBuilder::default().api_queries(optimized, max_results)
}
