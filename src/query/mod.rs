//! Turning a research question into per-source search requests.
//!
//! [`optimizer`] extracts keywords (LLM first, rule-based fallback) and
//! [`builder`] renders them into arXiv, PubMed and OpenAlex request URLs.

pub mod builder;
pub mod optimizer;

pub use builder::{
    build_api_queries, build_arxiv_query, build_google_scholar_query, build_openalex_query,
    build_pubmed_query, optimize_keywords_for_api, ApiQueries, QueryBuilder, QueryEndpoints,
};
pub use optimizer::{
    fallback_optimization, normalize, optimize_with_fallback, OptimizationOutcome,
    OptimizedQuery, OptimizerOutput, OptimizerPath, QueryOptimizer,
};

use chrono::Datelike;

/// Calendar year used for recency scoring and the default preferred year
#[must_use]
pub fn current_year() -> i32 {
    chrono::Utc::now().year()
}

/// Longest accepted research question, in characters
pub const MAX_QUERY_CHARS: usize = 1000;

/// Reject empty or oversized questions
pub fn validate_query(query: &str) -> crate::Result<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(crate::Error::InvalidInput {
            field: "query".to_string(),
            reason: "Query cannot be empty".to_string(),
        });
    }
    if trimmed.chars().count() > MAX_QUERY_CHARS {
        return Err(crate::Error::InvalidInput {
            field: "query".to_string(),
            reason: format!("Query must be at most {MAX_QUERY_CHARS} characters"),
        });
    }
    Ok(trimmed)
}
