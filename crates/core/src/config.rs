use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cost::{ModelPricing, PriceTable};
use crate::response::SelectionThresholds;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub thresholds: SelectionThresholds,
    pub guardrails: GuardrailConfig,
    pub cache: CacheConfig,
    pub tools: ToolConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub cost: CostConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub search_url: String,
    pub collection: String,
    pub top_k: usize,
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub classifier_timeout_ms: u64,
    pub fail_open: bool,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    pub redis_url: Option<SecretString>,
    pub embedding_ttl_secs: u64,
    pub tool_result_ttl_secs: u64,
    pub response_ttl_secs: u64,
    pub max_entries: usize,
}

#[derive(Clone, Debug)]
pub struct ToolConfig {
    pub timeout_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Optional flat pricing applied to models missing from the built-in table.
#[derive(Clone, Debug, Default)]
pub struct CostConfig {
    pub input_price_per_million: Option<Decimal>,
    pub output_price_per_million: Option<Decimal>,
}

impl CostConfig {
    pub fn price_table(&self) -> PriceTable {
        match (self.input_price_per_million, self.output_price_per_million) {
            (None, None) => PriceTable::default(),
            (input, output) => PriceTable::default().with_fallback(ModelPricing::new(
                input.unwrap_or(Decimal::ZERO),
                output.unwrap_or(Decimal::ZERO),
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(alias = "openai")]
    OpenAi,
    #[serde(alias = "deepseek")]
    DeepSeek,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

/// Where cached values live: in this process, or in a shared redis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

impl CacheBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub match_threshold: Option<f64>,
    pub direct_threshold: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://concierge.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some(LlmProvider::Ollama.default_base_url().to_string()),
                model: "llama3.1".to_string(),
                embedding_model: "nomic-embed-text".to_string(),
                temperature: 0.3,
                max_tokens: 500,
                timeout_secs: 30,
                max_retries: 1,
            },
            retrieval: RetrievalConfig {
                search_url: "http://localhost:6333".to_string(),
                collection: "response_templates".to_string(),
                top_k: 3,
                timeout_ms: 2_000,
            },
            thresholds: SelectionThresholds::default(),
            guardrails: GuardrailConfig { classifier_timeout_ms: 3_000, fail_open: false },
            cache: CacheConfig {
                backend: CacheBackendKind::Memory,
                redis_url: None,
                embedding_ttl_secs: 86_400,
                tool_result_ttl_secs: 300,
                response_ttl_secs: 3_600,
                max_entries: 10_000,
            },
            tools: ToolConfig { timeout_ms: 2_000 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            cost: CostConfig::default(),
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "deepseek" | "deep_seek" => Ok(Self::DeepSeek),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|deepseek|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for CacheBackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::Validation(format!(
                "unsupported cache backend `{other}` (expected memory|redis)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("concierge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Base URL for the generation provider, falling back to the provider default.
    pub fn llm_base_url(&self) -> String {
        self.llm
            .base_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| self.llm.provider.default_base_url().to_string())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(retrieval) = patch.retrieval {
            if let Some(search_url) = retrieval.search_url {
                self.retrieval.search_url = search_url;
            }
            if let Some(collection) = retrieval.collection {
                self.retrieval.collection = collection;
            }
            if let Some(top_k) = retrieval.top_k {
                self.retrieval.top_k = top_k;
            }
            if let Some(timeout_ms) = retrieval.timeout_ms {
                self.retrieval.timeout_ms = timeout_ms;
            }
        }

        if let Some(thresholds) = patch.thresholds {
            if let Some(match_threshold) = thresholds.match_threshold {
                self.thresholds.match_threshold = match_threshold;
            }
            if let Some(direct_threshold) = thresholds.direct_threshold {
                self.thresholds.direct_threshold = direct_threshold;
            }
            if let Some(enabled) = thresholds.direct_substitution_enabled {
                self.thresholds.direct_substitution_enabled = enabled;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(classifier_timeout_ms) = guardrails.classifier_timeout_ms {
                self.guardrails.classifier_timeout_ms = classifier_timeout_ms;
            }
            if let Some(fail_open) = guardrails.fail_open {
                self.guardrails.fail_open = fail_open;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(backend) = cache.backend {
                self.cache.backend = backend;
            }
            if let Some(redis_url) = cache.redis_url {
                self.cache.redis_url = Some(secret_value(redis_url));
            }
            if let Some(embedding_ttl_secs) = cache.embedding_ttl_secs {
                self.cache.embedding_ttl_secs = embedding_ttl_secs;
            }
            if let Some(tool_result_ttl_secs) = cache.tool_result_ttl_secs {
                self.cache.tool_result_ttl_secs = tool_result_ttl_secs;
            }
            if let Some(response_ttl_secs) = cache.response_ttl_secs {
                self.cache.response_ttl_secs = response_ttl_secs;
            }
            if let Some(max_entries) = cache.max_entries {
                self.cache.max_entries = max_entries;
            }
        }

        if let Some(tools) = patch.tools {
            if let Some(timeout_ms) = tools.timeout_ms {
                self.tools.timeout_ms = timeout_ms;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(cost) = patch.cost {
            if let Some(input) = cost.input_price_per_million {
                self.cost.input_price_per_million = Some(input);
            }
            if let Some(output) = cost.output_price_per_million {
                self.cost.output_price_per_million = Some(output);
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CONCIERGE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CONCIERGE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONCIERGE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = value;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CONCIERGE_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CONCIERGE_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_RETRIEVAL_SEARCH_URL") {
            self.retrieval.search_url = value;
        }
        if let Some(value) = read_env("CONCIERGE_RETRIEVAL_COLLECTION") {
            self.retrieval.collection = value;
        }
        if let Some(value) = read_env("CONCIERGE_RETRIEVAL_TOP_K") {
            self.retrieval.top_k = parse_usize("CONCIERGE_RETRIEVAL_TOP_K", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_THRESHOLDS_MATCH") {
            self.thresholds.match_threshold = parse_f64("CONCIERGE_THRESHOLDS_MATCH", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_THRESHOLDS_DIRECT") {
            self.thresholds.direct_threshold = parse_f64("CONCIERGE_THRESHOLDS_DIRECT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_THRESHOLDS_DIRECT_SUBSTITUTION_ENABLED") {
            self.thresholds.direct_substitution_enabled =
                parse_bool("CONCIERGE_THRESHOLDS_DIRECT_SUBSTITUTION_ENABLED", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_GUARDRAILS_CLASSIFIER_TIMEOUT_MS") {
            self.guardrails.classifier_timeout_ms =
                parse_u64("CONCIERGE_GUARDRAILS_CLASSIFIER_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_GUARDRAILS_FAIL_OPEN") {
            self.guardrails.fail_open = parse_bool("CONCIERGE_GUARDRAILS_FAIL_OPEN", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_CACHE_BACKEND") {
            self.cache.backend = value.parse()?;
        }
        if let Some(value) = read_env("CONCIERGE_CACHE_REDIS_URL") {
            self.cache.redis_url = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONCIERGE_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_usize("CONCIERGE_CACHE_MAX_ENTRIES", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_TOOLS_TIMEOUT_MS") {
            self.tools.timeout_ms = parse_u64("CONCIERGE_TOOLS_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("CONCIERGE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_PORT") {
            self.server.port = parse_u16("CONCIERGE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CONCIERGE_LOGGING_LEVEL").or_else(|| read_env("CONCIERGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONCIERGE_LOGGING_FORMAT").or_else(|| read_env("CONCIERGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(match_threshold) = overrides.match_threshold {
            self.thresholds.match_threshold = match_threshold;
        }
        if let Some(direct_threshold) = overrides.direct_threshold {
            self.thresholds.direct_threshold = direct_threshold;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_retrieval(&self.retrieval)?;
        validate_thresholds(&self.thresholds)?;
        validate_timeouts(self)?;
        validate_cache(&self.cache)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_cost(&self.cost)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("concierge.toml"), PathBuf::from("config/concierge.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_retries > 5 {
        return Err(ConfigError::Validation("llm.max_retries must be at most 5".to_string()));
    }

    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::DeepSeek => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/deepseek providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    Ok(())
}

fn validate_retrieval(retrieval: &RetrievalConfig) -> Result<(), ConfigError> {
    if retrieval.top_k == 0 || retrieval.top_k > 20 {
        return Err(ConfigError::Validation("retrieval.top_k must be in range 1..=20".to_string()));
    }

    let url = retrieval.search_url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "retrieval.search_url must start with http:// or https://".to_string(),
        ));
    }

    if retrieval.collection.trim().is_empty() {
        return Err(ConfigError::Validation(
            "retrieval.collection must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_thresholds(thresholds: &SelectionThresholds) -> Result<(), ConfigError> {
    let in_unit_range = |value: f64| (0.0..=1.0).contains(&value);
    if !in_unit_range(thresholds.match_threshold) || !in_unit_range(thresholds.direct_threshold) {
        return Err(ConfigError::Validation(
            "thresholds.match_threshold and thresholds.direct_threshold must be in range 0.0..=1.0"
                .to_string(),
        ));
    }

    if thresholds.direct_threshold < thresholds.match_threshold {
        return Err(ConfigError::Validation(
            "thresholds.direct_threshold must be greater than or equal to thresholds.match_threshold"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_timeouts(config: &AppConfig) -> Result<(), ConfigError> {
    let checks = [
        ("retrieval.timeout_ms", config.retrieval.timeout_ms),
        ("guardrails.classifier_timeout_ms", config.guardrails.classifier_timeout_ms),
        ("tools.timeout_ms", config.tools.timeout_ms),
    ];
    for (key, value) in checks {
        if value == 0 || value > 60_000 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=60000")));
        }
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.max_entries == 0 {
        return Err(ConfigError::Validation(
            "cache.max_entries must be greater than zero".to_string(),
        ));
    }

    if cache.backend == CacheBackendKind::Redis {
        let url = cache.redis_url.as_ref().map(|url| url.expose_secret().trim()).unwrap_or_default();
        if url.is_empty() {
            return Err(ConfigError::Validation(
                "cache.redis_url is required when cache.backend = redis".to_string(),
            ));
        }
        if !(url.starts_with("redis://") || url.starts_with("rediss://")) {
            return Err(ConfigError::Validation(
                "cache.redis_url must be a `redis://` or `rediss://` URL".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_cost(cost: &CostConfig) -> Result<(), ConfigError> {
    let negative = [cost.input_price_per_million, cost.output_price_per_million]
        .into_iter()
        .flatten()
        .any(|price| price.is_sign_negative());
    if negative {
        return Err(ConfigError::Validation("cost prices must not be negative".to_string()));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    retrieval: Option<RetrievalPatch>,
    thresholds: Option<ThresholdsPatch>,
    guardrails: Option<GuardrailsPatch>,
    cache: Option<CachePatch>,
    tools: Option<ToolsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    cost: Option<CostPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    embedding_model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct RetrievalPatch {
    search_url: Option<String>,
    collection: Option<String>,
    top_k: Option<usize>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ThresholdsPatch {
    match_threshold: Option<f64>,
    direct_threshold: Option<f64>,
    direct_substitution_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailsPatch {
    classifier_timeout_ms: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    backend: Option<CacheBackendKind>,
    redis_url: Option<String>,
    embedding_ttl_secs: Option<u64>,
    tool_result_ttl_secs: Option<u64>,
    response_ttl_secs: Option<u64>,
    max_entries: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolsPatch {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct CostPatch {
    input_price_per_million: Option<Decimal>,
    output_price_per_million: Option<Decimal>,
}
