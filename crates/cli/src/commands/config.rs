use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use concierge_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_key) in effective_values(&config) {
        let source =
            field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, Option<&'static str>)> {
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let redis_url = if config.cache.redis_url.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        ("database.url", config.database.url.clone(), Some("CONCIERGE_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("CONCIERGE_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("CONCIERGE_DATABASE_TIMEOUT_SECS"),
        ),
        ("llm.provider", format!("{:?}", config.llm.provider), Some("CONCIERGE_LLM_PROVIDER")),
        ("llm.model", config.llm.model.clone(), Some("CONCIERGE_LLM_MODEL")),
        (
            "llm.embedding_model",
            config.llm.embedding_model.clone(),
            Some("CONCIERGE_LLM_EMBEDDING_MODEL"),
        ),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            Some("CONCIERGE_LLM_BASE_URL"),
        ),
        ("llm.api_key", llm_api_key.to_string(), Some("CONCIERGE_LLM_API_KEY")),
        ("llm.temperature", config.llm.temperature.to_string(), None),
        ("llm.max_tokens", config.llm.max_tokens.to_string(), None),
        ("llm.max_retries", config.llm.max_retries.to_string(), Some("CONCIERGE_LLM_MAX_RETRIES")),
        (
            "retrieval.search_url",
            config.retrieval.search_url.clone(),
            Some("CONCIERGE_RETRIEVAL_SEARCH_URL"),
        ),
        (
            "retrieval.collection",
            config.retrieval.collection.clone(),
            Some("CONCIERGE_RETRIEVAL_COLLECTION"),
        ),
        ("retrieval.top_k", config.retrieval.top_k.to_string(), Some("CONCIERGE_RETRIEVAL_TOP_K")),
        (
            "thresholds.match_threshold",
            config.thresholds.match_threshold.to_string(),
            Some("CONCIERGE_THRESHOLDS_MATCH"),
        ),
        (
            "thresholds.direct_threshold",
            config.thresholds.direct_threshold.to_string(),
            Some("CONCIERGE_THRESHOLDS_DIRECT"),
        ),
        (
            "guardrails.classifier_timeout_ms",
            config.guardrails.classifier_timeout_ms.to_string(),
            Some("CONCIERGE_GUARDRAILS_CLASSIFIER_TIMEOUT_MS"),
        ),
        (
            "guardrails.fail_open",
            config.guardrails.fail_open.to_string(),
            Some("CONCIERGE_GUARDRAILS_FAIL_OPEN"),
        ),
        ("cache.backend", config.cache.backend.as_str().to_string(), Some("CONCIERGE_CACHE_BACKEND")),
        ("cache.redis_url", redis_url.to_string(), Some("CONCIERGE_CACHE_REDIS_URL")),
        (
            "cache.max_entries",
            config.cache.max_entries.to_string(),
            Some("CONCIERGE_CACHE_MAX_ENTRIES"),
        ),
        ("tools.timeout_ms", config.tools.timeout_ms.to_string(), Some("CONCIERGE_TOOLS_TIMEOUT_MS")),
        (
            "server.bind_address",
            config.server.bind_address.clone(),
            Some("CONCIERGE_SERVER_BIND_ADDRESS"),
        ),
        ("server.port", config.server.port.to_string(), Some("CONCIERGE_SERVER_PORT")),
        ("logging.level", config.logging.level.clone(), Some("CONCIERGE_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("CONCIERGE_LOGGING_FORMAT")),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("concierge.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/concierge.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use concierge_core::config::{AppConfig, CacheBackendKind};
    use toml::Value;

    use super::{contains_path, effective_values, field_source};

    #[test]
    fn api_key_is_never_rendered() {
        let values = effective_values(&AppConfig::default());
        let (_, api_key, _) =
            values.iter().find(|(key, _, _)| *key == "llm.api_key").expect("api key row");
        assert_eq!(api_key, "<unset>");
    }

    #[test]
    fn redis_url_is_redacted_with_its_backend() {
        let mut config = AppConfig::default();
        config.cache.backend = CacheBackendKind::Redis;
        config.cache.redis_url = Some("redis://:hunter2@cache.internal:6379".to_string().into());

        let values = effective_values(&config);
        let row = |name: &str| {
            values.iter().find(|(key, _, _)| *key == name).map(|(_, value, _)| value.clone())
        };
        assert_eq!(row("cache.backend").as_deref(), Some("redis"));
        assert_eq!(row("cache.redis_url").as_deref(), Some("<redacted>"));
        assert!(values.iter().all(|(_, value, _)| !value.contains("hunter2")));
    }

    #[test]
    fn file_source_is_reported_for_nested_keys() {
        let doc: Value = "[retrieval]\ntop_k = 7\n".parse().expect("toml");
        assert!(contains_path(&doc, "retrieval.top_k"));
        assert!(!contains_path(&doc, "retrieval.collection"));

        let source = field_source(
            "retrieval.top_k",
            None,
            Some(&doc),
            Some(Path::new("concierge.toml")),
        );
        assert_eq!(source, "file (concierge.toml)");
        assert_eq!(field_source("retrieval.collection", None, Some(&doc), None), "default");
    }
}
