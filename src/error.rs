//! Crate-wide error type.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Which ceiling of the call budget was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetLimit {
    /// The run's wall-clock window elapsed
    Time,
    /// The run's tool-call count reached its cap
    Calls,
}

impl std::fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Time => write!(f, "time"),
            Self::Calls => write!(f, "tool calls"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Research budget exceeded ({0})")]
    BudgetExceeded(BudgetLimit),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Service error: {0}")]
    Service(String),
}

impl Error {
    /// Whether this error came from the call budget guard
    #[must_use]
    pub const fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::BudgetExceeded(_))
    }
}
