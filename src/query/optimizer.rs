use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Keywords and term classes extracted from a research question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizedQuery {
    /// Ordered search keywords, each at most three words
    pub keywords: Vec<String>,
    pub preferred_year: i32,
    pub disease_terms: Vec<String>,
    pub intervention_terms: Vec<String>,
    pub outcome_terms: Vec<String>,
    pub study_type_terms: Vec<String>,
}

/// Raw optimizer output; every field may be missing
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
#[serde(default)]
pub struct OptimizerOutput {
    pub keywords: Option<Vec<String>>,
    pub preferred_year: Option<i32>,
    pub disease_terms: Option<Vec<String>>,
    pub intervention_terms: Option<Vec<String>>,
    pub outcome_terms: Option<Vec<String>>,
    pub study_type_terms: Option<Vec<String>>,
}

/// Which path produced the keywords
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerPath {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOutcome {
    pub query: OptimizedQuery,
    pub path: OptimizerPath,
}

/// Keyword extraction backed by an external model
#[async_trait]
pub trait QueryOptimizer: Send + Sync {
    async fn optimize(&self, query: &str) -> crate::Result<OptimizerOutput>;
}

const ABBREVIATIONS: [(&str, &str); 10] = [
    ("dici", "drug induced cognitive impairment"),
    ("adr", "adverse drug reaction"),
    ("ae", "adverse event"),
    ("cns", "central nervous system"),
    ("cog", "cognitive"),
    ("neuro", "neurological"),
    ("psych", "psychiatric"),
    ("med", "medication"),
    ("rx", "prescription"),
    ("tx", "treatment"),
];

const PHRASES: [&str; 17] = [
    "drug induced cognitive impairment",
    "cognitive impairment",
    "adverse drug reaction",
    "drug toxicity",
    "neurotoxicity",
    "central nervous system",
    "medication side effects",
    "drug adverse effects",
    "cognitive dysfunction",
    "memory impairment",
    "attention deficit",
    "executive dysfunction",
    "graph neural network",
    "machine learning",
    "deep learning",
    "materials discovery",
    "formation energy",
];

const STOP_WORDS: [&str; 37] = [
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with", "what", "most", "recent", "new",
];

const DISEASE_VOCAB: [&str; 8] = [
    "cognitive", "impairment", "dysfunction", "deficit", "neuro", "brain", "memory", "attention",
];

const INTERVENTION_VOCAB: [&str; 8] = [
    "drug", "medication", "treatment", "therapy", "induced", "adverse", "side effect", "toxicity",
];

const OUTCOME_VOCAB: [&str; 6] = [
    "impairment", "dysfunction", "deficit", "adverse", "toxicity", "effect",
];

const STUDY_TYPES: [&str; 4] = ["study", "research", "clinical", "trial"];

static ABBREVIATION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    ABBREVIATIONS
        .iter()
        .map(|(abbrev, full)| {
            let pattern = format!(r"\b{}\b", regex::escape(abbrev));
            (Regex::new(&pattern).expect("abbreviation pattern is valid"), *full)
        })
        .collect()
});

static TOKEN_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9]+").expect("token pattern is valid"));

fn classify(keywords: &[String], vocabulary: &[&str]) -> Vec<String> {
    keywords
        .iter()
        .filter(|kw| vocabulary.iter().any(|term| kw.contains(term)))
        .cloned()
        .collect()
}

/// Rule-based keyword extraction used whenever the primary optimizer is unavailable
#[must_use]
pub fn fallback_optimization(user_query: &str, current_year: i32) -> OptimizedQuery {
    let mut expanded = user_query.to_lowercase();
    for (pattern, full) in ABBREVIATION_PATTERNS.iter() {
        expanded = pattern.replace_all(&expanded, *full).into_owned();
    }

    let found_phrases = PHRASES
        .iter()
        .filter(|phrase| expanded.contains(*phrase))
        .map(|phrase| (*phrase).to_string());

    let stop_words: HashSet<&str> = STOP_WORDS.into_iter().collect();
    let single_words = TOKEN_SPLIT
        .split(&expanded)
        .filter(|w| !w.is_empty() && w.len() > 2 && !stop_words.contains(w))
        .map(str::to_string);

    let mut seen = HashSet::new();
    let keywords: Vec<String> = found_phrases
        .chain(single_words)
        .filter(|kw| seen.insert(kw.clone()))
        .collect();

    let base = normalize(
        OptimizerOutput {
            keywords: Some(keywords),
            preferred_year: Some(current_year - 1),
            ..OptimizerOutput::default()
        },
        current_year,
    );

    OptimizedQuery {
        disease_terms: classify(&base.keywords, &DISEASE_VOCAB),
        intervention_terms: classify(&base.keywords, &INTERVENTION_VOCAB),
        outcome_terms: classify(&base.keywords, &OUTCOME_VOCAB),
        study_type_terms: STUDY_TYPES.iter().map(|s| (*s).to_string()).collect(),
        ..base
    }
}

fn clean_terms(terms: Option<Vec<String>>) -> Vec<String> {
    terms
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Fill missing fields and cap keywords to three words
#[must_use]
pub fn normalize(output: OptimizerOutput, current_year: i32) -> OptimizedQuery {
    let mut seen = HashSet::new();
    let keywords = clean_terms(output.keywords)
        .into_iter()
        .map(|kw| kw.split_whitespace().take(3).collect::<Vec<_>>().join(" "))
        .filter(|kw| seen.insert(kw.clone()))
        .collect();

    OptimizedQuery {
        keywords,
        preferred_year: output.preferred_year.unwrap_or(current_year - 1),
        disease_terms: clean_terms(output.disease_terms),
        intervention_terms: clean_terms(output.intervention_terms),
        outcome_terms: clean_terms(output.outcome_terms),
        study_type_terms: clean_terms(output.study_type_terms),
    }
}

/// Ask the primary optimizer, falling back to rule-based extraction on any failure
pub async fn optimize_with_fallback(
    optimizer: Option<&dyn QueryOptimizer>,
    user_query: &str,
    timeout: Duration,
    current_year: i32,
) -> OptimizationOutcome {
    if let Some(optimizer) = optimizer {
        match tokio::time::timeout(timeout, optimizer.optimize(user_query)).await {
            Ok(Ok(output)) => {
                let query = normalize(output, current_year);
                if !query.keywords.is_empty() {
                    debug!("Primary optimizer produced {} keywords", query.keywords.len());
                    return OptimizationOutcome {
                        query,
                        path: OptimizerPath::Primary,
                    };
                }
                warn!("Primary optimizer returned no keywords, using fallback");
            }
            Ok(Err(e)) => warn!("Primary optimizer failed, using fallback: {}", e),
            Err(_) => warn!("Primary optimizer timed out after {:?}, using fallback", timeout),
        }
    }

    OptimizationOutcome {
        query: fallback_optimization(user_query, current_year),
        path: OptimizerPath::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedOptimizer(crate::Result<OptimizerOutput>);

    #[async_trait]
    impl QueryOptimizer for FixedOptimizer {
        async fn optimize(&self, _query: &str) -> crate::Result<OptimizerOutput> {
            match &self.0 {
                Ok(output) => Ok(output.clone()),
                Err(e) => Err(crate::Error::Llm(e.to_string())),
            }
        }
    }

    struct SlowOptimizer;

    #[async_trait]
    impl QueryOptimizer for SlowOptimizer {
        async fn optimize(&self, _query: &str) -> crate::Result<OptimizerOutput> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(OptimizerOutput::default())
        }
    }

    #[test]
    fn test_fallback_expands_abbreviations() {
        let q = fallback_optimization("What causes DICI in CNS patients?", 2025);
        assert_eq!(q.keywords[0], "drug induced cognitive");
        assert!(q.keywords.contains(&"cognitive impairment".to_string()));
        assert!(q.keywords.contains(&"central nervous system".to_string()));
        assert!(q.keywords.contains(&"patients".to_string()));
        assert!(!q.keywords.iter().any(|k| k == "what" || k == "in"));
        assert_eq!(q.preferred_year, 2024);
        assert_eq!(q.study_type_terms, vec!["study", "research", "clinical", "trial"]);
        assert!(q.disease_terms.contains(&"cognitive impairment".to_string()));
        assert!(q.intervention_terms.iter().any(|t| t.starts_with("drug")));
    }

    #[test]
    fn test_fallback_abbreviation_needs_word_boundary() {
        let q = fallback_optimization("medical imaging", 2025);
        assert_eq!(q.keywords, vec!["medical", "imaging"]);
    }

    #[test]
    fn test_fallback_detects_domain_phrase() {
        let q = fallback_optimization("graph neural networks for materials", 2025);
        assert_eq!(q.keywords[0], "graph neural network");
        assert_eq!(&q.keywords[1..], ["graph", "neural", "networks", "materials"]);
    }

    #[test]
    fn test_fallback_drops_short_tokens_and_duplicates() {
        let q = fallback_optimization("AI ai of graphs graphs", 2025);
        assert_eq!(q.keywords, vec!["graphs"]);
    }

    #[test]
    fn test_normalize_fills_missing_fields() {
        let q = normalize(
            OptimizerOutput {
                keywords: Some(vec![
                    "  protein folding  ".to_string(),
                    String::new(),
                    "very long keyword phrase here".to_string(),
                ]),
                ..OptimizerOutput::default()
            },
            2025,
        );
        assert_eq!(q.keywords, vec!["protein folding", "very long keyword"]);
        assert_eq!(q.preferred_year, 2024);
        assert!(q.disease_terms.is_empty());
        assert!(q.study_type_terms.is_empty());
    }

    #[tokio::test]
    async fn test_primary_result_is_used() {
        let optimizer = FixedOptimizer(Ok(OptimizerOutput {
            keywords: Some(vec!["alpha fold".to_string()]),
            preferred_year: Some(2023),
            ..OptimizerOutput::default()
        }));
        let outcome =
            optimize_with_fallback(Some(&optimizer), "q", Duration::from_secs(1), 2025).await;
        assert_eq!(outcome.path, OptimizerPath::Primary);
        assert_eq!(outcome.query.keywords, vec!["alpha fold"]);
        assert_eq!(outcome.query.preferred_year, 2023);
    }

    #[tokio::test]
    async fn test_failure_falls_back() {
        let optimizer = FixedOptimizer(Err(crate::Error::Llm("down".into())));
        let outcome = optimize_with_fallback(
            Some(&optimizer),
            "graph neural networks",
            Duration::from_secs(1),
            2025,
        )
        .await;
        assert_eq!(outcome.path, OptimizerPath::Fallback);
        assert_eq!(outcome.query.keywords[0], "graph neural network");
    }

    #[tokio::test]
    async fn test_empty_primary_falls_back() {
        let optimizer = FixedOptimizer(Ok(OptimizerOutput::default()));
        let outcome =
            optimize_with_fallback(Some(&optimizer), "protein design", Duration::from_secs(1), 2025)
                .await;
        assert_eq!(outcome.path, OptimizerPath::Fallback);
        assert_eq!(outcome.query.keywords, vec!["protein", "design"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_falls_back() {
        let outcome = optimize_with_fallback(
            Some(&SlowOptimizer),
            "protein design",
            Duration::from_millis(50),
            2025,
        )
        .await;
        assert_eq!(outcome.path, OptimizerPath::Fallback);
    }

    #[tokio::test]
    async fn test_no_optimizer_uses_fallback() {
        let outcome = optimize_with_fallback(None, "protein design", Duration::from_secs(1), 2025).await;
        assert_eq!(outcome.path, OptimizerPath::Fallback);
    }
}
