use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use concierge_core::cache::{Cache, CacheBackend, CacheError};
use concierge_core::config::{CacheConfig, RetrievalConfig};
use concierge_core::domain::template::deduplicate;
use concierge_core::domain::{
    stable_hash, CandidateTemplate, Inquiry, Property, PropertyId, Reservation, ReservationId,
};
use concierge_db::{PropertyRepository, RepositoryError, ReservationRepository};

use crate::llm::{CapabilityError, Embedder};
use crate::retrieval::SimilaritySearch;
use crate::state::CachedResponse;

pub const TOOL_TEMPLATES: &str = "templates";
pub const TOOL_PROPERTY: &str = "property";
pub const TOOL_RESERVATION: &str = "reservation";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LookupFailure {
    #[error("lookup timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("lookup backend failed: {0}")]
    Backend(String),
    /// Corrupt cache state; fatal for the request that observed it.
    #[error("contract violation: {0}")]
    ContractViolation(String),
}

impl From<CacheError> for LookupFailure {
    fn from(error: CacheError) -> Self {
        match error {
            CacheError::Corrupt { .. } => Self::ContractViolation(error.to_string()),
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<CapabilityError> for LookupFailure {
    fn from(error: CapabilityError) -> Self {
        match error {
            CapabilityError::Timeout { after_ms, .. } => Self::Timeout { after_ms },
            other => Self::Backend(other.to_string()),
        }
    }
}

impl From<RepositoryError> for LookupFailure {
    fn from(error: RepositoryError) -> Self {
        Self::Backend(error.to_string())
    }
}

/// Settled state of one fan-out slot.
#[derive(Clone, Debug, PartialEq)]
pub enum LookupOutcome<T> {
    Found(T),
    NotFound,
    Unavailable(LookupFailure),
}

impl<T> LookupOutcome<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "not_found",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Lookup<T> {
    pub outcome: LookupOutcome<T>,
    pub cache_hit: bool,
}

impl<T> Lookup<T> {
    fn settled(outcome: LookupOutcome<T>, cache_hit: bool) -> Self {
        Self { outcome, cache_hit }
    }

    fn unavailable(failure: LookupFailure) -> Self {
        Self { outcome: LookupOutcome::Unavailable(failure), cache_hit: false }
    }
}

/// Typed views over the shared backend, one namespace per logical cache.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    pub embeddings: Cache<Vec<f32>>,
    pub templates: Cache<Vec<CandidateTemplate>>,
    pub properties: Cache<Property>,
    pub reservations: Cache<Reservation>,
    pub responses: Cache<CachedResponse>,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &CacheConfig) -> Self {
        let embedding_ttl = Duration::from_secs(config.embedding_ttl_secs);
        let tool_ttl = Duration::from_secs(config.tool_result_ttl_secs);
        let response_ttl = Duration::from_secs(config.response_ttl_secs);

        Self {
            embeddings: Cache::new(Arc::clone(&backend), "embedding", embedding_ttl),
            templates: Cache::new(Arc::clone(&backend), "templates", tool_ttl),
            properties: Cache::new(Arc::clone(&backend), "property", tool_ttl),
            reservations: Cache::new(Arc::clone(&backend), "reservation", tool_ttl),
            responses: Cache::new(Arc::clone(&backend), "response", response_ttl),
            backend,
        }
    }

    pub async fn entry_count(&self) -> Result<usize, CacheError> {
        self.backend.len().await
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateLookup {
    pub templates: Lookup<Vec<CandidateTemplate>>,
    pub embedding_cache_hit: bool,
}

/// Embeds the inquiry, searches the template index and deduplicates hits.
pub struct TemplateRetrievalTool {
    embedder: Arc<dyn Embedder>,
    search: Arc<dyn SimilaritySearch>,
    caches: CacheLayer,
    top_k: usize,
    score_threshold: f64,
    timeout: Duration,
}

impl TemplateRetrievalTool {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        search: Arc<dyn SimilaritySearch>,
        caches: CacheLayer,
        config: &RetrievalConfig,
        score_threshold: f64,
    ) -> Self {
        Self {
            embedder,
            search,
            caches,
            top_k: config.top_k,
            score_threshold,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    /// An empty result is cached like any other and reported as not found.
    pub async fn retrieve(&self, message: &str) -> TemplateLookup {
        match tokio::time::timeout(self.timeout, self.fetch(message)).await {
            Ok(Ok((templates, cache_hit, embedding_cache_hit))) => {
                let outcome = if templates.is_empty() {
                    LookupOutcome::NotFound
                } else {
                    LookupOutcome::Found(templates)
                };
                TemplateLookup { templates: Lookup::settled(outcome, cache_hit), embedding_cache_hit }
            }
            Ok(Err(failure)) => {
                TemplateLookup { templates: Lookup::unavailable(failure), embedding_cache_hit: false }
            }
            Err(_) => TemplateLookup {
                templates: Lookup::unavailable(LookupFailure::Timeout {
                    after_ms: self.timeout.as_millis() as u64,
                }),
                embedding_cache_hit: false,
            },
        }
    }

    async fn fetch(
        &self,
        message: &str,
    ) -> Result<(Vec<CandidateTemplate>, bool, bool), LookupFailure> {
        let key = stable_hash(message);
        // A cached template set was derived from a cached embedding of the same message.
        if let Some(templates) = self.caches.templates.get(&key).await? {
            return Ok((templates, true, true));
        }

        let embedding = self
            .caches
            .embeddings
            .get_or_compute(&key, move || async move {
                self.embedder.embed(message).await.map_err(LookupFailure::from)
            })
            .await?;

        let hits = self
            .search
            .search(&embedding.value, self.top_k.saturating_mul(2), self.score_threshold)
            .await?;
        let candidates = hits.into_iter().map(|hit| hit.into_candidate()).collect();
        let templates = deduplicate(candidates, self.top_k);

        self.caches.templates.set(&key, &templates).await?;
        Ok((templates, false, embedding.hit))
    }
}

pub struct PropertyLookupTool {
    repository: Arc<dyn PropertyRepository>,
    cache: Cache<Property>,
    timeout: Duration,
}

impl PropertyLookupTool {
    pub fn new(
        repository: Arc<dyn PropertyRepository>,
        cache: Cache<Property>,
        timeout: Duration,
    ) -> Self {
        Self { repository, cache, timeout }
    }

    pub async fn lookup(&self, id: Option<&PropertyId>) -> Lookup<Property> {
        let Some(id) = id else {
            return Lookup::settled(LookupOutcome::NotFound, false);
        };
        cached_record(&self.cache, &stable_hash(&id.0), self.timeout, move || {
            self.repository.find_by_id(id)
        })
        .await
    }
}

pub struct ReservationLookupTool {
    repository: Arc<dyn ReservationRepository>,
    cache: Cache<Reservation>,
    timeout: Duration,
}

impl ReservationLookupTool {
    pub fn new(
        repository: Arc<dyn ReservationRepository>,
        cache: Cache<Reservation>,
        timeout: Duration,
    ) -> Self {
        Self { repository, cache, timeout }
    }

    pub async fn lookup(&self, id: Option<&ReservationId>) -> Lookup<Reservation> {
        let Some(id) = id else {
            return Lookup::settled(LookupOutcome::NotFound, false);
        };
        cached_record(&self.cache, &stable_hash(&id.0), self.timeout, move || {
            self.repository.find_by_id(id)
        })
        .await
    }
}

/// Cache-first record fetch. Missing records are not cached.
async fn cached_record<T, F, Fut>(
    cache: &Cache<T>,
    key: &str,
    timeout: Duration,
    fetch: F,
) -> Lookup<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, RepositoryError>>,
{
    let attempt = async {
        if let Some(record) = cache.get(key).await? {
            return Ok::<_, LookupFailure>(Lookup::settled(LookupOutcome::Found(record), true));
        }
        match fetch().await? {
            Some(record) => {
                cache.set(key, &record).await?;
                Ok(Lookup::settled(LookupOutcome::Found(record), false))
            }
            None => Ok(Lookup::settled(LookupOutcome::NotFound, false)),
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(lookup)) => lookup,
        Ok(Err(failure)) => Lookup::unavailable(failure),
        Err(_) => Lookup::unavailable(LookupFailure::Timeout { after_ms: timeout.as_millis() as u64 }),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ToolResults {
    pub templates: Lookup<Vec<CandidateTemplate>>,
    pub property: Lookup<Property>,
    pub reservation: Lookup<Reservation>,
    pub embedding_cache_hit: bool,
    pub elapsed: Duration,
}

impl ToolResults {
    pub fn templates(&self) -> &[CandidateTemplate] {
        self.templates.outcome.found().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn property(&self) -> Option<&Property> {
        self.property.outcome.found()
    }

    pub fn reservation(&self) -> Option<&Reservation> {
        self.reservation.outcome.found()
    }

    pub fn summary(&self) -> BTreeMap<String, String> {
        [
            (TOOL_TEMPLATES, self.templates.outcome.status()),
            (TOOL_PROPERTY, self.property.outcome.status()),
            (TOOL_RESERVATION, self.reservation.outcome.status()),
        ]
        .into_iter()
        .map(|(tool, status)| (tool.to_string(), status.to_string()))
        .collect()
    }

    /// First slot that failed on a contract violation, if any.
    pub fn contract_violation(&self) -> Option<&str> {
        self.failures()
            .into_iter()
            .find_map(|(_, failure)| match failure {
                LookupFailure::ContractViolation(message) => Some(message.as_str()),
                _ => None,
            })
    }

    pub fn failures(&self) -> Vec<(&'static str, &LookupFailure)> {
        let mut failures = Vec::new();
        if let LookupOutcome::Unavailable(failure) = &self.templates.outcome {
            failures.push((TOOL_TEMPLATES, failure));
        }
        if let LookupOutcome::Unavailable(failure) = &self.property.outcome {
            failures.push((TOOL_PROPERTY, failure));
        }
        if let LookupOutcome::Unavailable(failure) = &self.reservation.outcome {
            failures.push((TOOL_RESERVATION, failure));
        }
        failures
    }
}

/// Runs the three lookups concurrently; every slot settles on its own.
#[derive(Clone)]
pub struct FanOutCoordinator {
    templates: Arc<TemplateRetrievalTool>,
    properties: Arc<PropertyLookupTool>,
    reservations: Arc<ReservationLookupTool>,
}

impl FanOutCoordinator {
    pub fn new(
        templates: TemplateRetrievalTool,
        properties: PropertyLookupTool,
        reservations: ReservationLookupTool,
    ) -> Self {
        Self {
            templates: Arc::new(templates),
            properties: Arc::new(properties),
            reservations: Arc::new(reservations),
        }
    }

    pub async fn gather(&self, inquiry: &Inquiry, correlation_id: &str) -> ToolResults {
        let started = Instant::now();
        let (templates, property, mut reservation) = tokio::join!(
            self.templates.retrieve(&inquiry.message),
            self.properties.lookup(inquiry.property_id.as_ref()),
            self.reservations.lookup(inquiry.reservation_id.as_ref()),
        );

        if let (Some(property_id), LookupOutcome::Found(found)) =
            (inquiry.property_id.as_ref(), &reservation.outcome)
        {
            if !found.belongs_to(property_id) {
                tracing::warn!(
                    event_name = "pipeline.tools.ownership_mismatch",
                    correlation_id,
                    reservation_id = %found.id.0,
                    reservation_property_id = %found.property_id.0,
                    property_id = %property_id.0,
                    "reservation does not belong to the requested property"
                );
                reservation.outcome = LookupOutcome::NotFound;
            }
        }

        let results = ToolResults {
            templates: templates.templates,
            property,
            reservation,
            embedding_cache_hit: templates.embedding_cache_hit,
            elapsed: started.elapsed(),
        };

        for (tool, failure) in results.failures() {
            tracing::warn!(
                event_name = "pipeline.tools.degraded",
                correlation_id,
                tool,
                error = %failure,
                "lookup degraded to unavailable"
            );
        }

        results
    }
}
