use crate::ranking::RankingPolicy;
use crate::services::access::DepthTier;
use crate::services::orchestrator::ResearchStrategy;
use ipnetwork::IpNetwork;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Scholarly source fetch configuration
    pub research_source: ResearchSourceConfig,
    /// Per-run tool-call budget
    pub budget: BudgetConfig,
    /// Per-client request quota
    pub quota: QuotaConfig,
    /// Result-depth tiers
    pub depth: DepthConfig,
    /// Ranking policy
    pub ranking: RankingConfig,
    /// Orchestration settings
    pub research: ResearchConfig,
    /// LLM collaborator (optimizer and synthesizer)
    pub llm: LlmConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Environment profile (development, production)
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Configuration schema version
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ServerConfig {
    /// Server listen port
    pub port: u16,
    /// Server bind address
    pub host: String,
    /// Request body limit in kilobytes
    pub body_limit_kb: usize,
    /// Graceful shutdown timeout in seconds
    pub graceful_shutdown_timeout_secs: u64,
    /// Proxies whose `X-Forwarded-For` header is trusted (CIDR notation)
    pub trusted_proxies: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ResearchSourceConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
    /// Maximum attempts per HTTP request
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds
    pub retry_base_delay_ms: u64,
    /// Maximum pages fetched while back-filling after the year filter
    pub max_pages: u32,
    /// Drop records published before this year
    pub min_year: Option<u32>,
    /// User agent sent to every source
    pub user_agent: String,
    /// arXiv Atom API endpoint
    pub arxiv_base_url: String,
    /// NCBI E-utilities base (ending in `/entrez/eutils`)
    pub pubmed_base_url: String,
    /// OpenAlex works endpoint
    pub openalex_base_url: String,
    /// NCBI `tool` etiquette parameter
    pub pubmed_tool: String,
    /// NCBI `email` etiquette parameter
    pub pubmed_email: Option<String>,
    /// NCBI API key
    pub pubmed_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum source fetches per run
    pub max_calls: u32,
    /// Wall-clock window per run in seconds
    pub window_secs: u64,
    /// Upper bound for results requested from a single source
    pub per_source_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct QuotaConfig {
    /// Free requests per window and client IP; `<= 0` disables the quota
    pub free_limit: i64,
    /// Quota window in seconds
    pub window_secs: u64,
    /// Client addresses exempt from quota and depth limits
    pub bypass_ips: Vec<String>,
    /// Client subnets exempt from quota and depth limits
    pub bypass_cidrs: Vec<String>,
    /// Reject requests that carry no API key (unless bypassed)
    pub require_api_key: bool,
    /// Interval between sweeps of expired quota entries, in seconds
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DepthConfig {
    /// Per-source cap for the `low` tier
    pub low: u32,
    /// Per-source cap for the `med` tier
    pub med: u32,
    /// Per-source cap for the `high` tier
    pub high: u32,
    /// Highest tier available without an API key
    pub default_tier: DepthTier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RankingConfig {
    /// `per_source` or `global`
    pub policy: RankingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ResearchConfig {
    /// Which sources to query
    pub strategy: ResearchStrategy,
    /// Cap on the text handed to the synthesizer
    pub max_combined_chars: usize,
    /// Results per source when a request names none
    pub default_max_results: u32,
    /// Deadline for the source fetches of one run
    pub run_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LlmConfig {
    /// Use the LLM for optimization and synthesis
    pub enabled: bool,
    /// OpenAI-compatible API base URL
    pub base_url: String,
    /// Model used for synthesis
    pub model: String,
    /// Model used for query optimization (defaults to `model`)
    pub optimizer_model: Option<String>,
    /// API key for the LLM endpoint
    pub api_key: Option<String>,
    /// Timeout per LLM call in seconds
    pub timeout_secs: u64,
    /// Default reasoning effort hint
    pub reasoning_effort: Option<String>,
    /// Default verbosity hint
    pub verbosity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

fn default_profile() -> String {
    "development".to_string()
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

/// CLI argument overrides for configuration
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub server_port: Option<u16>,
    pub server_host: Option<String>,
    pub log_level: Option<String>,
    pub profile: Option<String>,
    pub ranking_policy: Option<RankingPolicy>,
}

/// Environment variable overrides with the `RESEARCH_` prefix
#[derive(Debug, Default, Deserialize)]
pub struct ConfigEnvOverrides {
    pub server_port: Option<u16>,
    pub server_host: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub profile: Option<String>,
    pub budget_max_calls: Option<u32>,
    pub budget_window_secs: Option<u64>,
    pub budget_per_source_max: Option<u32>,
    pub quota_free_limit: Option<i64>,
    pub quota_window_secs: Option<u64>,
    pub bypass_ips: Option<Vec<String>>,
    pub bypass_cidrs: Option<Vec<String>>,
    pub require_api_key: Option<bool>,
    pub depth_caps: Option<String>,
    pub ranking_policy: Option<String>,
    pub strategy: Option<String>,
    pub min_year: Option<u32>,
    pub max_combined_chars: Option<usize>,
    pub user_agent: Option<String>,
    pub pubmed_email: Option<String>,
    pub pubmed_api_key: Option<String>,
    pub llm_enabled: Option<bool>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            research_source: ResearchSourceConfig::default(),
            budget: BudgetConfig::default(),
            quota: QuotaConfig::default(),
            depth: DepthConfig::default(),
            ranking: RankingConfig::default(),
            research: ResearchConfig::default(),
            llm: LlmConfig::default(),
            logging: LoggingConfig::default(),
            profile: default_profile(),
            schema_version: default_schema_version(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            body_limit_kb: 256,
            graceful_shutdown_timeout_secs: 5,
            trusted_proxies: Vec::new(),
        }
    }
}

impl Default for ResearchSourceConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            connect_timeout_secs: 3,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            max_pages: 5,
            min_year: None,
            user_agent: "rust_research_orchestrator/0.3 (Academic Research Tool)".to_string(),
            arxiv_base_url: "https://export.arxiv.org/api/query".to_string(),
            pubmed_base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            openalex_base_url: "https://api.openalex.org/works".to_string(),
            pubmed_tool: "rust_research_orchestrator".to_string(),
            pubmed_email: None,
            pubmed_api_key: None,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_calls: 3,
            window_secs: 30,
            per_source_max: 10,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_limit: 10,
            window_secs: 3600,
            bypass_ips: Vec::new(),
            bypass_cidrs: Vec::new(),
            require_api_key: false,
            sweep_interval_secs: 300,
        }
    }
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            low: 3,
            med: 5,
            high: 10,
            default_tier: DepthTier::Med,
        }
    }
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            strategy: ResearchStrategy::All,
            max_combined_chars: 20_000,
            default_max_results: 3,
            run_timeout_secs: 30,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-5".to_string(),
            optimizer_model: None,
            api_key: None,
            timeout_secs: 60,
            reasoning_effort: None,
            verbosity: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Parse a depth table such as `low=3,med=5,high=10` onto `depth`
pub fn parse_depth_caps(spec: &str, depth: &mut DepthConfig) -> crate::Result<()> {
    for pair in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (tier, cap) = pair.split_once('=').ok_or_else(|| crate::Error::InvalidInput {
            field: "depth_caps".to_string(),
            reason: format!("Expected tier=cap, got '{pair}'"),
        })?;
        let cap: u32 = cap.trim().parse().map_err(|_| crate::Error::InvalidInput {
            field: "depth_caps".to_string(),
            reason: format!("Cap for '{}' is not a number", tier.trim()),
        })?;
        match DepthTier::from_str(tier.trim())? {
            DepthTier::Low => depth.low = cap,
            DepthTier::Med => depth.med = cap,
            DepthTier::High => depth.high = cap,
        }
    }
    Ok(())
}

impl Config {
    /// Load configuration with layered precedence: defaults < file < env vars < CLI args
    pub fn load() -> crate::Result<Self> {
        Self::load_with_overrides(None, &ConfigOverrides::default())
    }

    /// Load configuration with CLI overrides
    pub fn load_with_overrides(
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> crate::Result<Self> {
        debug!("Loading configuration with layered approach");

        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                config = Self::load_from_toml_file(path)?;
                debug!("Loaded configuration from file: {}", path.display());
            } else {
                warn!("Configuration file not found: {}", path.display());
            }
        } else if let Some(standard_config) = Self::try_load_standard_locations()? {
            config = standard_config;
            debug!("Loaded configuration from standard location");
        }

        match envy::prefixed("RESEARCH_").from_env::<ConfigEnvOverrides>() {
            Ok(env_overrides) => config.apply_env_overrides(env_overrides)?,
            Err(e) => debug!("No valid environment variable overrides found: {}", e),
        }
        if config.llm.api_key.is_none() {
            config.llm.api_key = std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }

        config.apply_cli_overrides(overrides);
        config.apply_profile_settings();
        debug!("Applied profile-specific settings for: {}", config.profile);

        config.validate()?;
        debug!("Configuration validation passed");

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from_toml_file(path: &Path) -> crate::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        if metadata.file_type().is_symlink() {
            warn!("Configuration file is a symbolic link: {}", path.display());
        }

        let config_str = std::fs::read_to_string(path)?;
        toml::from_str(&config_str)
            .map_err(|e| crate::Error::Config(config::ConfigError::Foreign(Box::new(e))))
    }

    fn try_load_standard_locations() -> crate::Result<Option<Self>> {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(None);
        };
        let config_dir = config_dir.join("rust_research_orchestrator");

        let config_files = [
            config_dir.join("config.toml"),
            config_dir.join("config.development.toml"),
            config_dir.join("config.production.toml"),
        ];

        for config_file in &config_files {
            if config_file.exists() {
                debug!("Found config file: {}", config_file.display());
                return Ok(Some(Self::load_from_toml_file(config_file)?));
            }
        }

        Ok(None)
    }

    /// Apply environment variable overrides (already parsed from `RESEARCH_*`)
    pub fn apply_env_overrides(&mut self, env: ConfigEnvOverrides) -> crate::Result<()> {
        if let Some(port) = env.server_port {
            if port > 0 {
                self.server.port = port;
            } else {
                warn!("Invalid port value from env: {}, ignoring", port);
            }
        }
        if let Some(host) = env.server_host.filter(|h| !h.trim().is_empty()) {
            self.server.host = host;
        }
        if let Some(level) = env.log_level {
            self.logging.level = level;
        }
        if let Some(format) = env.log_format {
            self.logging.format = format;
        }
        if let Some(profile) = env.profile {
            self.profile = profile;
        }

        if let Some(max_calls) = env.budget_max_calls {
            self.budget.max_calls = max_calls;
        }
        if let Some(window) = env.budget_window_secs {
            self.budget.window_secs = window;
        }
        if let Some(cap) = env.budget_per_source_max {
            self.budget.per_source_max = cap;
        }

        if let Some(limit) = env.quota_free_limit {
            self.quota.free_limit = limit;
        }
        if let Some(window) = env.quota_window_secs {
            self.quota.window_secs = window;
        }
        if let Some(ips) = env.bypass_ips {
            self.quota.bypass_ips = ips.into_iter().filter(|s| !s.trim().is_empty()).collect();
        }
        if let Some(cidrs) = env.bypass_cidrs {
            self.quota.bypass_cidrs = cidrs
                .into_iter()
                .filter(|s| !s.trim().is_empty())
                .collect();
        }
        if let Some(required) = env.require_api_key {
            self.quota.require_api_key = required;
        }
        if let Some(caps) = env.depth_caps {
            parse_depth_caps(&caps, &mut self.depth)?;
        }

        if let Some(policy) = env.ranking_policy {
            self.ranking.policy = RankingPolicy::from_str(&policy)?;
        }
        if let Some(strategy) = env.strategy {
            self.research.strategy = ResearchStrategy::from_str(&strategy)?;
        }
        if let Some(chars) = env.max_combined_chars {
            self.research.max_combined_chars = chars;
        }

        if env.min_year.is_some() {
            self.research_source.min_year = env.min_year.filter(|y| *y > 0);
        }
        if let Some(agent) = env.user_agent.filter(|a| !a.trim().is_empty()) {
            self.research_source.user_agent = agent;
        }
        if env.pubmed_email.is_some() {
            self.research_source.pubmed_email = env.pubmed_email;
        }
        if env.pubmed_api_key.is_some() {
            self.research_source.pubmed_api_key = env.pubmed_api_key;
        }

        if let Some(enabled) = env.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(base_url) = env.llm_base_url {
            self.llm.base_url = base_url;
        }
        if let Some(model) = env.llm_model {
            self.llm.model = model;
        }
        if env.llm_api_key.is_some() {
            self.llm.api_key = env.llm_api_key;
        }

        debug!("Applied environment variable overrides");
        Ok(())
    }

    fn apply_cli_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(ref host) = overrides.server_host {
            self.server.host.clone_from(host);
        }
        if let Some(ref level) = overrides.log_level {
            self.logging.level.clone_from(level);
        }
        if let Some(ref profile) = overrides.profile {
            self.profile.clone_from(profile);
        }
        if let Some(policy) = overrides.ranking_policy {
            self.ranking.policy = policy;
        }
    }

    fn apply_profile_settings(&mut self) {
        match self.profile.as_str() {
            "development" => {
                if self.logging.level == "info" {
                    self.logging.level = "debug".to_string();
                }
            }
            "production" => {
                self.logging.format = "json".to_string();
            }
            _ => {
                warn!("Unknown profile '{}', using defaults", self.profile);
            }
        }
    }

    /// Generate JSON schema for configuration
    #[must_use]
    pub fn generate_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(Self);
        serde_json::to_value(schema).unwrap_or_default()
    }

    /// Render the default configuration as TOML
    pub fn generate_example_config() -> crate::Result<String> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| crate::Error::Config(config::ConfigError::Foreign(Box::new(e))))
    }

    pub fn validate(&self) -> crate::Result<()> {
        let supported_versions = ["1.0"];
        if !supported_versions.contains(&self.schema_version.as_str()) {
            warn!(
                "Unknown config schema version: {}. Supported: {:?}. Attempting to continue...",
                self.schema_version, supported_versions
            );
        }

        if self.server.port == 0 {
            return Err(invalid("server.port", "Server port cannot be 0"));
        }
        for proxy in &self.server.trusted_proxies {
            IpNetwork::from_str(proxy).map_err(|e| {
                invalid(
                    "server.trusted_proxies",
                    &format!("Invalid CIDR '{proxy}': {e}"),
                )
            })?;
        }

        if self.research_source.max_retries == 0 {
            return Err(invalid(
                "research_source.max_retries",
                "At least one attempt is required",
            ));
        }
        if self.research_source.max_pages == 0 {
            return Err(invalid(
                "research_source.max_pages",
                "At least one page is required",
            ));
        }
        for (field, url) in [
            ("research_source.arxiv_base_url", &self.research_source.arxiv_base_url),
            ("research_source.pubmed_base_url", &self.research_source.pubmed_base_url),
            ("research_source.openalex_base_url", &self.research_source.openalex_base_url),
        ] {
            url::Url::parse(url)
                .map_err(|e| invalid(field, &format!("Invalid URL '{url}': {e}")))?;
        }

        if self.budget.max_calls == 0 {
            return Err(invalid("budget.max_calls", "Must be greater than 0"));
        }
        if self.budget.window_secs == 0 {
            return Err(invalid("budget.window_secs", "Must be greater than 0"));
        }
        if self.budget.per_source_max == 0 {
            return Err(invalid("budget.per_source_max", "Must be greater than 0"));
        }

        if self.quota.free_limit > 0 && self.quota.window_secs == 0 {
            return Err(invalid(
                "quota.window_secs",
                "Window must be greater than 0 when the quota is enabled",
            ));
        }
        for ip in &self.quota.bypass_ips {
            ip.parse::<IpAddr>()
                .map_err(|e| invalid("quota.bypass_ips", &format!("Invalid IP '{ip}': {e}")))?;
        }
        for cidr in &self.quota.bypass_cidrs {
            IpNetwork::from_str(cidr).map_err(|e| {
                invalid("quota.bypass_cidrs", &format!("Invalid CIDR '{cidr}': {e}"))
            })?;
        }

        if self.depth.low == 0 || self.depth.low > self.depth.med || self.depth.med > self.depth.high
        {
            return Err(invalid(
                "depth",
                "Depth caps must be positive and satisfy low <= med <= high",
            ));
        }

        if self.research.max_combined_chars == 0 {
            return Err(invalid(
                "research.max_combined_chars",
                "Must be greater than 0",
            ));
        }
        if self.research.default_max_results == 0 {
            return Err(invalid(
                "research.default_max_results",
                "Must be greater than 0",
            ));
        }

        if self.research.run_timeout_secs == 0 {
            return Err(invalid("research.run_timeout_secs", "Must be greater than 0"));
        }

        if self.llm.timeout_secs == 0 {
            return Err(invalid("llm.timeout_secs", "Must be greater than 0"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "logging.level",
                &format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_log_levels
                ),
            ));
        }
        let valid_log_formats = ["json", "text"];
        if !valid_log_formats.contains(&self.logging.format.as_str()) {
            return Err(invalid(
                "logging.format",
                &format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_log_formats
                ),
            ));
        }

        let valid_profiles = ["development", "production"];
        if !valid_profiles.contains(&self.profile.as_str()) {
            warn!(
                "Unknown profile '{}'. Valid profiles: {:?}",
                self.profile, valid_profiles
            );
        }

        Ok(())
    }

    /// Get a copy of the config with secrets redacted
    #[must_use]
    pub fn safe_for_logging(&self) -> Self {
        let mut safe_config = self.clone();
        if safe_config.llm.api_key.is_some() {
            safe_config.llm.api_key = Some("[REDACTED]".to_string());
        }
        if safe_config.research_source.pubmed_api_key.is_some() {
            safe_config.research_source.pubmed_api_key = Some("[REDACTED]".to_string());
        }
        safe_config
    }

    /// Path of the default config file in the user's config directory
    #[must_use]
    pub fn standard_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("rust_research_orchestrator").join("config.toml"))
    }
}

fn invalid(field: &str, reason: &str) -> crate::Error {
    crate::Error::InvalidInput {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
