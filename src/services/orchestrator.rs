//! # Research Orchestrator
//!
//! One run goes: optimize the question, build a request per source, fetch the selected
//! sources concurrently under a call budget and a run deadline, rank and trim, then hand
//! the assembled text to the synthesizer.
//!
//! Source failures never fail the run; they surface as error strings in the payload.

use super::budget::CallBudget;
use crate::client::providers::{default_providers, ProviderMap, SourceResult};
use crate::client::{is_usable_content, SourceName};
use crate::config::{BudgetConfig, Config, ResearchConfig};
use crate::llm::{OpenAiCompatibleClient, SynthesisOptions, Synthesizer};
use crate::query::{
    current_year, optimize_with_fallback, validate_query, ApiQueries, OptimizedQuery,
    OptimizerPath, QueryBuilder, QueryEndpoints, QueryOptimizer,
};
use crate::ranking::{count_records, rank_and_trim, RankingPolicy, SourceResults};
use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

/// Synthesis result when no source returned usable content
pub const NO_PAPERS_TO_ANALYZE: &str = "No papers found to analyze.";

const DIRECT_SUMMARY: &str = "direct: fetched arXiv, PubMed, OpenAlex";

const BIOMEDICAL_TERMS: [&str; 13] = [
    "biomed",
    "biomedical",
    "health",
    "disease",
    "clinical",
    "trial",
    "patient",
    "medicine",
    "pubmed",
    "randomized",
    "cohort",
    "drug",
    "therapy",
];

const COMPUTING_TERMS: [&str; 6] = [
    "ml",
    "machine learning",
    "deep learning",
    "neural",
    "computer science",
    "ai",
];

/// Which sources a run queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResearchStrategy {
    /// arXiv, PubMed and OpenAlex
    #[default]
    All,
    /// Sources chosen from domain keywords in the question
    Heuristic,
}

impl FromStr for ResearchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "all_sources" | "direct" => Ok(Self::All),
            "heuristic" | "agent" => Ok(Self::Heuristic),
            other => Err(Error::InvalidInput {
                field: "research.strategy".to_string(),
                reason: format!("Unknown strategy '{other}' (expected all or heuristic)"),
            }),
        }
    }
}

fn mentions(lowered: &str, tokens: &HashSet<&str>, term: &str) -> bool {
    // two-letter abbreviations only count as whole words
    if term.len() <= 2 {
        tokens.contains(term)
    } else {
        lowered.contains(term)
    }
}

/// Sources to query for `query` under `strategy`
#[must_use]
pub fn select_sources(strategy: ResearchStrategy, query: &str) -> Vec<SourceName> {
    match strategy {
        ResearchStrategy::All => SourceName::ALL.to_vec(),
        ResearchStrategy::Heuristic => {
            let lowered = query.to_lowercase();
            let tokens: HashSet<&str> = lowered
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .collect();

            if BIOMEDICAL_TERMS.iter().any(|t| mentions(&lowered, &tokens, t)) {
                debug!("Biomedical question; querying PubMed and arXiv");
                return vec![SourceName::Pubmed, SourceName::Arxiv];
            }
            if COMPUTING_TERMS.iter().any(|t| mentions(&lowered, &tokens, t)) {
                debug!("Computing question; querying arXiv and OpenAlex");
            }
            vec![SourceName::Arxiv, SourceName::Openalex]
        }
    }
}

/// One research question plus its per-request settings
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    pub query: String,
    /// Results per source (and the total under global ranking)
    pub max_results: u32,
    pub synthesis: SynthesisOptions,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ResearchSummary {
    /// Records across all sources with usable content
    pub total: usize,
    pub sources: Vec<SourceName>,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct OptimizationReport {
    pub original_query: String,
    pub optimized_query: OptimizedQuery,
    pub method: OptimizerPath,
    pub api_queries_built: bool,
    pub api_queries: ApiQueries,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct ResearchPayload {
    /// Ranked text per source, or its placeholder / error string
    pub raw_results: BTreeMap<SourceName, String>,
    pub summary: ResearchSummary,
    pub optimized_query: OptimizedQuery,
    pub optimization: OptimizationReport,
    pub used_sources: Vec<SourceName>,
    pub agent_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    #[serde(skip)]
    pub results: SourceResults,
}

/// Concatenated, size-capped synthesis input, or `None` when nothing is usable
#[must_use]
pub fn build_synthesis_prompt(
    query: &str,
    raw_results: &BTreeMap<SourceName, String>,
    max_chars: usize,
) -> Option<String> {
    let mut combined = String::new();
    for (source, content) in raw_results {
        if is_usable_content(content) {
            combined.push_str(&format!(
                "\n=== {} Results ===\n{}\n",
                source.as_str().to_uppercase(),
                content
            ));
        }
    }

    if combined.is_empty() {
        return None;
    }
    if combined.chars().count() > max_chars {
        combined = combined.chars().take(max_chars).collect();
    }
    Some(format!("User Query: {query}\n\nPaper Data:\n{combined}"))
}

pub struct ResearchOrchestrator {
    providers: ProviderMap,
    optimizer: Option<Arc<dyn QueryOptimizer>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    builder: QueryBuilder,
    research: ResearchConfig,
    budget: BudgetConfig,
    ranking: RankingPolicy,
    optimizer_timeout: Duration,
}

impl std::fmt::Debug for ResearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResearchOrchestrator")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("optimizer", &self.optimizer.is_some())
            .field("synthesizer", &self.synthesizer.is_some())
            .field("research", &self.research)
            .field("budget", &self.budget)
            .field("ranking", &self.ranking)
            .finish()
    }
}

impl ResearchOrchestrator {
    #[must_use]
    pub fn new(
        providers: ProviderMap,
        research: ResearchConfig,
        budget: BudgetConfig,
        ranking: RankingPolicy,
    ) -> Self {
        Self {
            providers,
            optimizer: None,
            synthesizer: None,
            builder: QueryBuilder::default(),
            research,
            budget,
            ranking,
            optimizer_timeout: Duration::from_secs(60),
        }
    }

    /// Wire providers, query builder and (when enabled) the LLM client from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let providers = default_providers(&config.research_source)?;
        let mut orchestrator = Self::new(
            providers,
            config.research.clone(),
            config.budget.clone(),
            config.ranking.policy,
        )
        .with_query_builder(QueryBuilder::new(QueryEndpoints::from_config(
            &config.research_source,
        )))
        .with_optimizer_timeout(Duration::from_secs(config.llm.timeout_secs));

        if config.llm.enabled {
            let client = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
            if !client.has_api_key() {
                info!("No LLM API key configured; keyword optimization uses the rule-based fallback");
            }
            orchestrator = orchestrator
                .with_optimizer(client.clone())
                .with_synthesizer(client);
        }

        Ok(orchestrator)
    }

    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Arc<dyn QueryOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    #[must_use]
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    #[must_use]
    pub fn with_query_builder(mut self, builder: QueryBuilder) -> Self {
        self.builder = builder;
        self
    }

    #[must_use]
    pub fn with_optimizer_timeout(mut self, timeout: Duration) -> Self {
        self.optimizer_timeout = timeout;
        self
    }

    #[must_use]
    pub fn research_config(&self) -> &ResearchConfig {
        &self.research
    }

    /// Search and rank without synthesis
    #[instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn collect(&self, query: &str, max_results: u32) -> Result<ResearchPayload> {
        let query = validate_query(query)?;
        let max_results = if max_results == 0 {
            self.research.default_max_results
        } else {
            max_results
        };
        let year = current_year();

        let outcome =
            optimize_with_fallback(self.optimizer.as_deref(), query, self.optimizer_timeout, year).await;
        debug!(
            "Optimized via {:?}: {:?}",
            outcome.path, outcome.query.keywords
        );

        let per_source_cap = max_results.min(self.budget.per_source_max).max(1);
        let api_queries = self.builder.api_queries(&outcome.query, per_source_cap);
        let selected = select_sources(self.research.strategy, query);

        let fetched = self
            .fetch_sources(&selected, &api_queries, query, per_source_cap)
            .await;
        let ranked = rank_and_trim(fetched, query, self.ranking, max_results as usize, year);

        let raw_results: BTreeMap<SourceName, String> = ranked
            .iter()
            .map(|(source, result)| (*source, result.raw_text.clone()))
            .collect();
        let used_sources: Vec<SourceName> = raw_results
            .iter()
            .filter(|(_, text)| is_usable_content(text))
            .map(|(source, _)| *source)
            .collect();
        let total: usize = raw_results.values().map(|text| count_records(text)).sum();

        let agent_summary = match self.research.strategy {
            ResearchStrategy::All => DIRECT_SUMMARY.to_string(),
            ResearchStrategy::Heuristic => {
                let used = if used_sources.is_empty() {
                    "no".to_string()
                } else {
                    used_sources
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                format!("Fetched up to {max_results} results from {used} sources.")
            }
        };

        info!(
            "Collected {} records from {} sources",
            total,
            used_sources.len()
        );

        Ok(ResearchPayload {
            summary: ResearchSummary {
                total,
                sources: used_sources.clone(),
                query: query.to_string(),
            },
            optimization: OptimizationReport {
                original_query: query.to_string(),
                optimized_query: outcome.query.clone(),
                method: outcome.path,
                api_queries_built: !outcome.query.keywords.is_empty(),
                api_queries,
            },
            optimized_query: outcome.query,
            raw_results,
            used_sources,
            agent_summary,
            synthesis: None,
            results: ranked,
        })
    }

    /// Full run: collect, then synthesize
    #[instrument(skip(self, request), fields(query_len = request.query.len()))]
    pub async fn run(&self, request: &ResearchRequest) -> Result<ResearchPayload> {
        let mut payload = self.collect(&request.query, request.max_results).await?;
        let synthesis = self
            .synthesize_results(&payload.summary.query, &payload.raw_results, &request.synthesis)
            .await;
        payload.synthesis = Some(synthesis);
        Ok(payload)
    }

    /// Synthesis text for a run; never fails
    pub async fn synthesize_results(
        &self,
        query: &str,
        raw_results: &BTreeMap<SourceName, String>,
        options: &SynthesisOptions,
    ) -> String {
        match self.synthesize_provided(query, raw_results, options).await {
            Ok(text) => text,
            Err(Error::InvalidInput { .. }) => NO_PAPERS_TO_ANALYZE.to_string(),
            Err(e) => {
                warn!("Synthesis failed: {}", e);
                format!("Synthesis unavailable: {e}")
            }
        }
    }

    /// Synthesize caller-supplied results; `InvalidInput` when nothing is usable
    pub async fn synthesize_provided(
        &self,
        query: &str,
        raw_results: &BTreeMap<SourceName, String>,
        options: &SynthesisOptions,
    ) -> Result<String> {
        let prompt = build_synthesis_prompt(query, raw_results, self.research.max_combined_chars)
            .ok_or_else(|| Error::InvalidInput {
                field: "raw_results".to_string(),
                reason: "No valid papers to synthesize".to_string(),
            })?;

        let synthesizer = self
            .synthesizer
            .as_ref()
            .ok_or_else(|| Error::Llm("No synthesizer configured".to_string()))?;

        info!("Synthesizing {} chars of paper data", prompt.len());
        synthesizer.synthesize(&prompt, options).await
    }

    async fn fetch_sources(
        &self,
        selected: &[SourceName],
        api_queries: &ApiQueries,
        raw_query: &str,
        per_source_cap: u32,
    ) -> SourceResults {
        let budget = Arc::new(CallBudget::default());
        budget.configure(
            self.budget.max_calls,
            Duration::from_secs(self.budget.window_secs),
            per_source_cap,
        );

        let mut results: SourceResults = SourceName::ALL
            .iter()
            .map(|source| (*source, SourceResult::not_queried(*source)))
            .collect();

        let mut tasks = JoinSet::new();
        for source in selected {
            let Some(provider) = self.providers.get(source).cloned() else {
                warn!("No provider registered for {}", source);
                continue;
            };
            let built = api_queries.for_source(*source);
            let request = (if built.is_empty() { raw_query } else { built }).to_string();
            let budget = Arc::clone(&budget);
            let source = *source;

            tasks.spawn(async move {
                match budget.check_and_increment() {
                    Ok(()) => provider.collect(&request, budget.cap(per_source_cap)).await,
                    Err(e) => {
                        warn!("{} skipped: {}", source.display_name(), e);
                        SourceResult::failed(source, format!("Error: {e}"))
                    }
                }
            });
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.research.run_timeout_secs);
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(result))) => {
                    debug!("{} finished", result.source);
                    results.insert(result.source, result);
                }
                Ok(Some(Err(e))) => warn!("Source task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Run deadline of {}s reached; aborting {} in-flight fetches",
                        self.research.run_timeout_secs,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        debug!("Budget spent {} calls", budget.calls_made());
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("direct".parse::<ResearchStrategy>().unwrap(), ResearchStrategy::All);
        assert_eq!("Heuristic".parse::<ResearchStrategy>().unwrap(), ResearchStrategy::Heuristic);
        assert!("random".parse::<ResearchStrategy>().is_err());
    }

    #[test]
    fn test_heuristic_source_selection() {
        assert_eq!(
            select_sources(ResearchStrategy::Heuristic, "Randomized trial of statins"),
            vec![SourceName::Pubmed, SourceName::Arxiv]
        );
        assert_eq!(
            select_sources(ResearchStrategy::Heuristic, "AI for protein folding"),
            vec![SourceName::Arxiv, SourceName::Openalex]
        );
        // "ai" inside another word is not a match, and neither domain applies
        assert_eq!(
            select_sources(ResearchStrategy::Heuristic, "Sustainable urban planning"),
            vec![SourceName::Arxiv, SourceName::Openalex]
        );
        assert_eq!(
            select_sources(ResearchStrategy::All, "anything"),
            SourceName::ALL.to_vec()
        );
    }

    #[test]
    fn test_synthesis_prompt() {
        let mut raw = BTreeMap::new();
        raw.insert(SourceName::Arxiv, "Paper A (2024) by X\nAbstract: a\nURL: u".to_string());
        raw.insert(SourceName::Pubmed, "Error searching PubMed: Timeout occurred".to_string());
        raw.insert(SourceName::Openalex, "No results".to_string());

        let prompt = build_synthesis_prompt("q", &raw, 20_000).unwrap();
        assert_eq!(
            prompt,
            "User Query: q\n\nPaper Data:\n\n=== ARXIV Results ===\nPaper A (2024) by X\nAbstract: a\nURL: u\n"
        );

        let capped = build_synthesis_prompt("q", &raw, 10).unwrap();
        assert_eq!(capped, "User Query: q\n\nPaper Data:\n\n=== ARXIV");

        raw.insert(SourceName::Arxiv, "No papers found.".to_string());
        assert!(build_synthesis_prompt("q", &raw, 20_000).is_none());
    }
}
