pub mod access;
pub mod budget;
pub mod orchestrator;
pub mod quota;

pub use access::{AccessDecision, AccessGate, AccessPolicy, DepthRequest, DepthTier};
pub use budget::{CallBudget, DEFAULT_PER_SOURCE_MAX};
pub use orchestrator::{
    build_synthesis_prompt, select_sources, OptimizationReport, ResearchOrchestrator,
    ResearchPayload, ResearchRequest, ResearchStrategy, ResearchSummary, NO_PAPERS_TO_ANALYZE,
};
pub use quota::{QuotaDecision, QuotaGate};
