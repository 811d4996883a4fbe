//! OpenAI-compatible chat client used for keyword optimization and synthesis.

use crate::config::LlmConfig;
use crate::query::{OptimizerOutput, QueryOptimizer};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const OPTIMIZER_INSTRUCTIONS: &str = "You are an academic research librarian. Turn the user's \
research question into keyword searches for scholarly APIs. Extract the topic, population, \
method and outcome; prefer domain terminology; add closely related keywords; keep every \
keyword at three words or fewer. Reply with one JSON object and nothing else: \
{\"keywords\": [\"...\"], \"preferred_year\": <year>}";

const SYNTHESIS_INSTRUCTIONS: &str = "You are a scholarly synthesis engine. Using only the \
titles, authors and abstracts provided, write a synthesis of about 200 words that connects \
the papers, notes contradictions and emerging themes, and cites claims inline as \
[Title, Year]. Finish with a References section listing Title - URL.";

/// Per-request synthesis settings; unset fields use the configured defaults
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    pub model: Option<String>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    /// Caller-supplied key used instead of the configured one
    pub api_key: Option<String>,
}

/// Produces a cited report from assembled paper text
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, prompt: &str, options: &SynthesisOptions) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    verbosity: Option<&'a str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Chat Completions client for any OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    model: String,
    optimizer_model: String,
    api_key: Option<String>,
    reasoning_effort: Option<String>,
    verbosity: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            optimizer_model: config
                .optimizer_model
                .clone()
                .unwrap_or_else(|| config.model.clone()),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            reasoning_effort: config.reasoning_effort.clone(),
            verbosity: config.verbosity.clone(),
        })
    }

    /// Whether calls can be made without a caller-supplied key
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(
        &self,
        model: &str,
        system: &str,
        user: &str,
        api_key: Option<&str>,
        reasoning_effort: Option<&str>,
        verbosity: Option<&str>,
    ) -> Result<String> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .or(self.api_key.as_deref())
            .ok_or_else(|| Error::Llm("No API key configured".to_string()))?;

        let request = ChatCompletionsRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(system.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user.to_string()),
                },
            ],
            reasoning_effort,
            verbosity,
        };

        debug!("Chat completion request to {} with model {}", self.base_url, model);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(Error::Llm(format!("API error ({status}): {snippet}")));
        }

        let parsed: ChatCompletionsResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| Error::Llm("Empty completion".to_string()))
    }
}

/// Pull the first JSON object out of a completion, tolerating code fences and prose
pub fn parse_optimizer_output(content: &str) -> Result<OptimizerOutput> {
    let start = content.find('{');
    let end = content.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(serde_json::from_str(&content[start..=end])?),
        _ => Err(Error::Parse("Optimizer reply contained no JSON object".to_string())),
    }
}

#[async_trait]
impl QueryOptimizer for OpenAiCompatibleClient {
    async fn optimize(&self, query: &str) -> Result<OptimizerOutput> {
        let content = self
            .complete(&self.optimizer_model, OPTIMIZER_INSTRUCTIONS, query, None, None, None)
            .await?;
        parse_optimizer_output(&content)
    }
}

#[async_trait]
impl Synthesizer for OpenAiCompatibleClient {
    async fn synthesize(&self, prompt: &str, options: &SynthesisOptions) -> Result<String> {
        let model = options.model.as_deref().unwrap_or(&self.model);
        info!("Synthesizing with model {}", model);
        self.complete(
            model,
            SYNTHESIS_INSTRUCTIONS,
            prompt,
            options.api_key.as_deref(),
            options
                .reasoning_effort
                .as_deref()
                .or(self.reasoning_effort.as_deref()),
            options.verbosity.as_deref().or(self.verbosity.as_deref()),
        )
        .await
    }
}
