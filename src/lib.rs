//! Rust Research Orchestrator - multi-source scholarly research with cited synthesis
//!
//! This crate answers a research question by optimizing it into keyword searches, fetching
//! `arXiv`, `PubMed` and `OpenAlex` concurrently under a call budget, ranking the merged
//! results, and handing them to an LLM for synthesis. A per-client quota and depth gate
//! protects the HTTP surface.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::format_push_string)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::map_unwrap_or)]

pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod query;
pub mod ranking;
pub mod resilience;
pub mod server;
pub mod services;

pub use client::{PaperRecord, SourceName};
pub use config::{Config, ConfigOverrides};
pub use error::{Error, Result};
pub use query::{OptimizedQuery, QueryBuilder};
pub use ranking::RankingPolicy;
pub use resilience::RetryConfig;
pub use server::Server;
pub use services::{
    AccessGate, CallBudget, QuotaGate, ResearchOrchestrator, ResearchPayload, ResearchRequest,
    ResearchStrategy,
};
