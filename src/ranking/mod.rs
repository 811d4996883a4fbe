//! Cross-source result ranking.
//!
//! Source output is split into records ([`parser`]), scored by title overlap and recency
//! ([`scorer`]), then trimmed per source or as one pool ([`ranker`]).

pub mod parser;
pub mod ranker;
pub mod scorer;

pub use parser::{parse_chunks, ChunkMetadata};
pub use ranker::{count_records, rank_and_trim, try_rank_and_trim, SourceResults};
pub use scorer::{score, tokenize};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How results are trimmed to the requested depth
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RankingPolicy {
    /// Keep the top results of each source
    #[default]
    PerSource,
    /// Pool every source, dedup, keep the top results overall
    Global,
}

impl FromStr for RankingPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "per_source" => Ok(Self::PerSource),
            "global" => Ok(Self::Global),
            other => Err(crate::Error::InvalidInput {
                field: "ranking.policy".to_string(),
                reason: format!("Unknown ranking policy '{other}' (expected per_source or global)"),
            }),
        }
    }
}

impl std::fmt::Display for RankingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PerSource => write!(f, "per_source"),
            Self::Global => write!(f, "global"),
        }
    }
}
