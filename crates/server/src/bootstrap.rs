use std::sync::Arc;
use std::time::Duration;

use concierge_agent::tools::{PropertyLookupTool, ReservationLookupTool, TemplateRetrievalTool};
use concierge_agent::{
    AgentRuntime, CacheLayer, Embedder, FanOutCoordinator, Generator, GuardrailGate,
    LlmTopicClassifier, PipelineSettings, RegexSpanDetector, SimilaritySearch, SpanDetector,
    TopicClassifier,
};
use concierge_core::cache::{CacheBackend, InMemoryCache};
use concierge_core::config::{AppConfig, CacheBackendKind, CacheConfig, ConfigError, LoadOptions};
use concierge_db::{
    connect_from_config, migrations, DbPool, RedisCache, SqlPropertyRepository,
    SqlReservationRepository,
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::info;

use crate::providers::{HttpEmbedder, HttpGenerator, OpenAiCompatibleClient, QdrantSearch};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: AgentRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client construction failed: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("guardrail patterns failed to compile: {0}")]
    Guardrails(String),
    #[error("cache backend could not be configured: {0}")]
    Cache(String),
}

/// External capabilities the pipeline depends on.
pub struct Capabilities {
    pub generator: Arc<dyn Generator>,
    pub embedder: Arc<dyn Embedder>,
    pub search: Arc<dyn SimilaritySearch>,
    pub detector: Arc<dyn SpanDetector>,
    pub classifier: Arc<dyn TopicClassifier>,
}

impl Capabilities {
    /// HTTP-backed generation, embedding and search; regex span detection;
    /// a topic classifier that reuses the generator.
    pub fn from_config(config: &AppConfig) -> Result<Self, BootstrapError> {
        let client = OpenAiCompatibleClient::from_config(config).map_err(BootstrapError::HttpClient)?;
        let generator: Arc<dyn Generator> =
            Arc::new(HttpGenerator::new(client.clone(), config.llm.model.clone()));
        let detector = RegexSpanDetector::new()
            .map_err(|error| BootstrapError::Guardrails(error.to_string()))?;

        Ok(Self {
            classifier: Arc::new(LlmTopicClassifier::new(Arc::clone(&generator))),
            embedder: Arc::new(HttpEmbedder::new(client, config.llm.embedding_model.clone())),
            search: Arc::new(
                QdrantSearch::from_config(&config.retrieval).map_err(BootstrapError::HttpClient)?,
            ),
            detector: Arc::new(detector),
            generator,
        })
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let capabilities = Capabilities::from_config(&config)?;
    bootstrap_with_capabilities(config, capabilities).await
}

pub async fn bootstrap_with_capabilities(
    config: AppConfig,
    capabilities: Capabilities,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        model = %config.llm.model,
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime = assemble_runtime(&config, &db_pool, capabilities)?;
    Ok(Application { config, db_pool, runtime })
}

/// Wires one process-wide cache and the SQLite record stores into the pipeline.
pub fn assemble_runtime(
    config: &AppConfig,
    db_pool: &DbPool,
    capabilities: Capabilities,
) -> Result<AgentRuntime, BootstrapError> {
    let caches = CacheLayer::new(cache_backend(&config.cache)?, &config.cache);
    let tool_timeout = Duration::from_millis(config.tools.timeout_ms);

    let fanout = FanOutCoordinator::new(
        TemplateRetrievalTool::new(
            capabilities.embedder,
            capabilities.search,
            caches.clone(),
            &config.retrieval,
            config.thresholds.match_threshold,
        ),
        PropertyLookupTool::new(
            Arc::new(SqlPropertyRepository::new(db_pool.clone())),
            caches.properties.clone(),
            tool_timeout,
        ),
        ReservationLookupTool::new(
            Arc::new(SqlReservationRepository::new(db_pool.clone())),
            caches.reservations.clone(),
            tool_timeout,
        ),
    );
    let gate = GuardrailGate::new(capabilities.detector, capabilities.classifier, &config.guardrails)
        .map_err(|error| BootstrapError::Guardrails(error.to_string()))?;

    Ok(AgentRuntime::new(
        gate,
        fanout,
        capabilities.generator,
        caches,
        PipelineSettings::from_config(config),
    ))
}

/// Builds the process-wide cache store. Redis connects lazily on first use.
pub fn cache_backend(config: &CacheConfig) -> Result<Arc<dyn CacheBackend>, BootstrapError> {
    let backend: Arc<dyn CacheBackend> = match config.backend {
        CacheBackendKind::Memory => Arc::new(InMemoryCache::new(config.max_entries)),
        CacheBackendKind::Redis => {
            let url = config
                .redis_url
                .as_ref()
                .ok_or_else(|| BootstrapError::Cache("cache.redis_url is not set".to_string()))?;
            Arc::new(
                RedisCache::open(url.expose_secret())
                    .map_err(|error| BootstrapError::Cache(error.to_string()))?,
            )
        }
    };

    info!(
        event_name = "system.bootstrap.cache_selected",
        correlation_id = "bootstrap",
        backend = config.backend.as_str(),
        "cache backend selected"
    );
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use concierge_core::cache::CacheError;
    use concierge_core::config::{
        AppConfig, CacheBackendKind, ConfigOverrides, LlmProvider, LoadOptions,
    };

    use crate::bootstrap::{bootstrap, cache_backend, BootstrapError};

    #[tokio::test]
    async fn memory_cache_backend_is_the_default() {
        let backend = cache_backend(&AppConfig::default().cache).expect("memory backend");
        assert_eq!(backend.len().await.expect("len"), 0);
    }

    #[tokio::test]
    async fn redis_cache_backend_is_selected_without_connecting() {
        let mut config = AppConfig::default().cache;
        config.backend = CacheBackendKind::Redis;
        config.redis_url = Some("redis://127.0.0.1:1/".to_string().into());

        let backend = cache_backend(&config).expect("selection does not connect");
        assert!(matches!(backend.len().await, Err(CacheError::Backend(_))));
    }

    #[test]
    fn redis_cache_backend_without_a_url_fails() {
        let mut config = AppConfig::default().cache;
        config.backend = CacheBackendKind::Redis;

        assert!(matches!(cache_backend(&config), Err(BootstrapError::Cache(_))));
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_required_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(LlmProvider::OpenAi),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("missing api key should fail").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_starts_with_empty_caches() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with defaults");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('property', 'reservation')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("guest record tables should exist after bootstrap");
        assert_eq!(table_count, 2);
        assert_eq!(app.runtime.caches().entry_count().await.expect("cache size"), 0);

        app.db_pool.close().await;
    }
}
