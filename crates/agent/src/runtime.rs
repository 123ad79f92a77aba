use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use concierge_core::cache::CacheError;
use concierge_core::config::AppConfig;
use concierge_core::cost::{PriceTable, UsageTotals};
use concierge_core::domain::{Inquiry, StructuredContext};
use concierge_core::errors::{ApplicationError, DomainError};
use concierge_core::flows::PipelineEvent;
use concierge_core::response::{
    best_candidate, select, GuardrailVerdict, ResponsePlan, ResponseTier, SelectionThresholds,
    CUSTOM_GENERATION_CONFIDENCE, NO_RESPONSE_CONFIDENCE, NO_RESPONSE_MESSAGE,
    TEMPLATE_ASSISTED_CONFIDENCE, UNPARSED_TEMPLATE_CONFIDENCE,
};

use crate::guardrails::{GateDecision, GuardrailGate, GuardrailPath};
use crate::llm::{CapabilityError, Generation, GenerationRequest, Generator};
use crate::prompts::{custom_prompt, parse_generation, template_assisted_prompt};
use crate::state::{CachedResponse, ComputedResponse, InquiryResponse, RequestState};
use crate::tools::{CacheLayer, FanOutCoordinator};

/// Immutable knobs threaded through the pipeline.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub thresholds: SelectionThresholds,
    pub max_tokens: u32,
    pub temperature: f32,
    pub generation_timeout: Duration,
    /// Extra attempts after the first failed generation call.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub prices: PriceTable,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            thresholds: SelectionThresholds::default(),
            max_tokens: 500,
            temperature: 0.3,
            generation_timeout: Duration::from_secs(30),
            max_retries: 1,
            retry_backoff: Duration::from_millis(200),
            prices: PriceTable::default(),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            thresholds: config.thresholds,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
            generation_timeout: Duration::from_secs(config.llm.timeout_secs),
            max_retries: config.llm.max_retries,
            retry_backoff: Duration::from_millis(200),
            prices: config.cost.price_table(),
        }
    }
}

/// Result of a response computation that may have been cancelled.
enum Speculation {
    Ready(ComputedResponse),
    Cancelled,
}

enum GenerationOutcome {
    Generated(Generation),
    Exhausted(CapabilityError),
    Cancelled,
}

/// Aborts the speculative task if it is still running when dropped, so it
/// never outlives the request that spawned it.
struct SpeculativeTask(JoinHandle<Result<Speculation, ApplicationError>>);

impl SpeculativeTask {
    async fn join(&mut self) -> Result<Result<Speculation, ApplicationError>, JoinError> {
        (&mut self.0).await
    }
}

impl Drop for SpeculativeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Pipeline {
    gate: GuardrailGate,
    fanout: FanOutCoordinator,
    generator: Arc<dyn Generator>,
    caches: CacheLayer,
    settings: PipelineSettings,
}

/// Entry point for answering inquiries. Cheap to clone; clones share the
/// same capabilities and caches.
#[derive(Clone)]
pub struct AgentRuntime {
    pipeline: Arc<Pipeline>,
}

impl AgentRuntime {
    pub fn new(
        gate: GuardrailGate,
        fanout: FanOutCoordinator,
        generator: Arc<dyn Generator>,
        caches: CacheLayer,
        settings: PipelineSettings,
    ) -> Self {
        Self { pipeline: Arc::new(Pipeline { gate, fanout, generator, caches, settings }) }
    }

    pub fn caches(&self) -> &CacheLayer {
        &self.pipeline.caches
    }

    /// Always returns a well-formed response. Errors and panics inside the
    /// pipeline become a `no_response` answer with `metadata.error` set.
    pub async fn handle(&self, inquiry: Inquiry) -> InquiryResponse {
        let mut state = RequestState::new(inquiry);
        let correlation_id = state.correlation_id();
        tracing::info!(
            event_name = "pipeline.request.received",
            correlation_id = %correlation_id,
            property_id = state.inquiry.property_id.as_ref().map(|id| id.0.as_str()),
            reservation_id = state.inquiry.reservation_id.as_ref().map(|id| id.0.as_str()),
            "inquiry received"
        );

        let outcome = AssertUnwindSafe(self.pipeline.run(&mut state)).catch_unwind().await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error.to_string()),
            Err(panic) => Some(format!("pipeline panicked: {}", panic_message(panic.as_ref()))),
        };

        if let Some(message) = failure {
            tracing::error!(
                event_name = "pipeline.request.failed",
                correlation_id = %correlation_id,
                error = %message,
                "request ended with a contract violation"
            );
            state.metadata.error = Some(message);
            state.finish(ResponseTier::NoResponse, NO_RESPONSE_MESSAGE.to_string(), NO_RESPONSE_CONFIDENCE);
            state.advance(PipelineEvent::Aborted);
        }

        let response = state.into_response();
        tracing::info!(
            event_name = "pipeline.request.completed",
            correlation_id = %correlation_id,
            tier = response.response_tier.as_str(),
            generation_calls = response.metadata.generation_calls,
            cost_usd = %response.metadata.cost_usd,
            total_ms = response.metadata.stage_latency_ms.total,
            "inquiry answered"
        );
        response
    }
}

impl Pipeline {
    async fn run(self: &Arc<Self>, state: &mut RequestState) -> Result<(), ApplicationError> {
        let correlation_id = state.correlation_id();
        let message = state.inquiry.message.clone();
        let started = Instant::now();
        state.advance(PipelineEvent::GuardrailStarted);

        if let Some(denied) = self.gate.check_pii(&message).await {
            state.record_decision(&denied, started.elapsed());
            log_denial(&correlation_id, &denied);
            decline(state);
            return Ok(());
        }

        let cache_key = state.inquiry.fingerprint();
        if let Some(cached) = self.cached_response(&cache_key, &correlation_id).await? {
            state.record_decision(&GateDecision::approve(GuardrailPath::Cached), started.elapsed());
            state.metadata.cache_hits.response = true;
            state.advance(PipelineEvent::ResponseStarted);
            state.finish(cached.response_tier, cached.response_text, cached.confidence_score);
            state.advance(PipelineEvent::ResponseFinalized);
            return Ok(());
        }

        let computed = if self.gate.fast_path(&message) {
            state.record_decision(&GateDecision::approve(GuardrailPath::Fast), started.elapsed());
            state.advance(PipelineEvent::ResponseStarted);
            self.compute_inline(state, &correlation_id).await?
        } else {
            let cancel = CancellationToken::new();
            let mut speculative = SpeculativeTask(tokio::spawn(Arc::clone(self).compute(
                state.inquiry.clone(),
                correlation_id.clone(),
                cancel.child_token(),
                GuardrailVerdict::Pending,
            )));

            let decision = self.gate.classify(&message).await;
            state.record_decision(&decision, started.elapsed());
            if !decision.approved {
                cancel.cancel();
                drop(speculative);
                log_denial(&correlation_id, &decision);
                tracing::info!(
                    event_name = "pipeline.speculation.cancelled",
                    correlation_id = %correlation_id,
                    "speculative response discarded after denial"
                );
                decline(state);
                return Ok(());
            }

            state.advance(PipelineEvent::ResponseStarted);
            match speculative.join().await {
                Ok(Ok(Speculation::Ready(computed))) => computed,
                Ok(Ok(Speculation::Cancelled)) => {
                    tracing::warn!(
                        event_name = "pipeline.speculation.stale",
                        correlation_id = %correlation_id,
                        "speculative result was cancelled; recomputing"
                    );
                    self.compute_inline(state, &correlation_id).await?
                }
                Ok(Err(error)) => return Err(error),
                Err(join_error) if join_error.is_cancelled() => {
                    tracing::warn!(
                        event_name = "pipeline.speculation.stale",
                        correlation_id = %correlation_id,
                        "speculative task was aborted; recomputing"
                    );
                    self.compute_inline(state, &correlation_id).await?
                }
                Err(join_error) => {
                    return Err(DomainError::InvariantViolation(format!(
                        "speculative computation panicked: {}",
                        panic_message(join_error.into_panic().as_ref())
                    ))
                    .into());
                }
            }
        };

        state.record_computed(computed);
        self.store_response(state, &cache_key, &correlation_id).await;
        state.advance(PipelineEvent::ResponseFinalized);
        Ok(())
    }

    async fn compute_inline(
        self: &Arc<Self>,
        state: &RequestState,
        correlation_id: &str,
    ) -> Result<ComputedResponse, ApplicationError> {
        let speculation = Arc::clone(self)
            .compute(
                state.inquiry.clone(),
                correlation_id.to_string(),
                CancellationToken::new(),
                state.verdict.clone(),
            )
            .await?;
        match speculation {
            Speculation::Ready(computed) => Ok(computed),
            Speculation::Cancelled => Err(DomainError::InvariantViolation(
                "inline computation observed a cancellation".to_string(),
            )
            .into()),
        }
    }

    /// Fan-out, strategy selection and generation. Writes nothing to the
    /// response cache; only the caller does, once the verdict is known.
    async fn compute(
        self: Arc<Self>,
        inquiry: Inquiry,
        correlation_id: String,
        cancel: CancellationToken,
        verdict: GuardrailVerdict,
    ) -> Result<Speculation, ApplicationError> {
        let tools = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Speculation::Cancelled),
            tools = self.fanout.gather(&inquiry, &correlation_id) => tools,
        };
        if let Some(violation) = tools.contract_violation() {
            return Err(ApplicationError::Cache(violation.to_string()));
        }

        let context = StructuredContext::build(tools.property(), tools.reservation());
        let best = best_candidate(tools.templates());
        let plan = select(&verdict, best, &context, &self.settings.thresholds)?;
        tracing::info!(
            event_name = "pipeline.strategy.selected",
            correlation_id = %correlation_id,
            tier = plan.tier().as_str(),
            best_score = best.map(|template| template.score),
            context_fields = context.len(),
            "response strategy selected"
        );

        let tier = plan.tier();
        let prompt = match &plan {
            ResponsePlan::DirectSubstitution { score, substitution, .. } => {
                return Ok(Speculation::Ready(ComputedResponse {
                    response_text: substitution.text.clone(),
                    tier,
                    confidence: *score,
                    tools: Some(tools),
                    usage: UsageTotals::default(),
                    generation_elapsed: Duration::ZERO,
                    error: None,
                }));
            }
            ResponsePlan::NoResponse { .. } => {
                return Ok(Speculation::Ready(ComputedResponse {
                    response_text: NO_RESPONSE_MESSAGE.to_string(),
                    tier,
                    confidence: NO_RESPONSE_CONFIDENCE,
                    tools: Some(tools),
                    usage: UsageTotals::default(),
                    generation_elapsed: Duration::ZERO,
                    error: None,
                }));
            }
            ResponsePlan::TemplateAssisted { downgraded, .. } => {
                if *downgraded {
                    tracing::info!(
                        event_name = "pipeline.strategy.downgraded",
                        correlation_id = %correlation_id,
                        "direct template had unfilled placeholders"
                    );
                }
                template_assisted_prompt(
                    &inquiry.message,
                    tools.templates(),
                    tools.property(),
                    tools.reservation(),
                )
            }
            ResponsePlan::CustomGeneration => {
                custom_prompt(&inquiry.message, tools.property(), tools.reservation())
            }
        };

        let generation_started = Instant::now();
        let mut usage = UsageTotals::default();
        let outcome = self.generate_with_retry(&prompt, &cancel, &correlation_id, &mut usage).await;
        let generation_elapsed = generation_started.elapsed();

        let computed = match outcome {
            GenerationOutcome::Cancelled => return Ok(Speculation::Cancelled),
            GenerationOutcome::Generated(generation) => {
                let parsed = parse_generation(&generation.text);
                let confidence = match tier {
                    ResponseTier::TemplateAssisted if parsed.structured => {
                        parsed.confidence.unwrap_or(TEMPLATE_ASSISTED_CONFIDENCE)
                    }
                    ResponseTier::TemplateAssisted => UNPARSED_TEMPLATE_CONFIDENCE,
                    _ => CUSTOM_GENERATION_CONFIDENCE,
                };
                ComputedResponse {
                    response_text: parsed.response_text,
                    tier,
                    confidence,
                    tools: Some(tools),
                    usage,
                    generation_elapsed,
                    error: None,
                }
            }
            GenerationOutcome::Exhausted(error) => ComputedResponse {
                response_text: NO_RESPONSE_MESSAGE.to_string(),
                tier: ResponseTier::NoResponse,
                confidence: NO_RESPONSE_CONFIDENCE,
                tools: Some(tools),
                generation_elapsed,
                error: Some(format!(
                    "generation failed after {} attempts: {error}",
                    usage.generation_calls
                )),
                usage,
            },
        };
        Ok(Speculation::Ready(computed))
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        correlation_id: &str,
        usage: &mut UsageTotals,
    ) -> GenerationOutcome {
        let request = GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let model = self.generator.model().to_string();
        let attempts = self.settings.max_retries.saturating_add(1);
        let mut backoff = self.settings.retry_backoff;
        let mut last_error = CapabilityError::unavailable("generator", "no attempt was made");

        for attempt in 1..=attempts {
            let call = tokio::time::timeout(
                self.settings.generation_timeout,
                self.generator.generate(&request),
            );
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return GenerationOutcome::Cancelled,
                result = call => result,
            };

            match result {
                Ok(Ok(generation)) if !generation.text.trim().is_empty() => {
                    usage.record(
                        &self.settings.prices,
                        &model,
                        generation.input_tokens,
                        generation.output_tokens,
                    );
                    return GenerationOutcome::Generated(generation);
                }
                Ok(Ok(generation)) => {
                    usage.record(
                        &self.settings.prices,
                        &model,
                        generation.input_tokens,
                        generation.output_tokens,
                    );
                    last_error = CapabilityError::invalid("generator", "empty completion");
                }
                Ok(Err(error)) => {
                    usage.generation_calls += 1;
                    last_error = error;
                }
                Err(_) => {
                    usage.generation_calls += 1;
                    last_error = CapabilityError::Timeout {
                        capability: "generator",
                        after_ms: self.settings.generation_timeout.as_millis() as u64,
                    };
                }
            }

            tracing::warn!(
                event_name = "pipeline.generation.failed",
                correlation_id,
                attempt,
                attempts,
                error = %last_error,
                "generation attempt failed"
            );

            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return GenerationOutcome::Cancelled,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = backoff.saturating_mul(2);
            }
        }

        GenerationOutcome::Exhausted(last_error)
    }

    /// A corrupt entry is a contract violation; any other cache failure is
    /// logged and treated as a miss.
    async fn cached_response(
        &self,
        key: &str,
        correlation_id: &str,
    ) -> Result<Option<CachedResponse>, ApplicationError> {
        match self.caches.responses.get(key).await {
            Ok(cached) => Ok(cached),
            Err(error @ CacheError::Corrupt { .. }) => Err(ApplicationError::Cache(error.to_string())),
            Err(error) => {
                tracing::warn!(
                    event_name = "pipeline.cache.unavailable",
                    correlation_id,
                    error = %error,
                    "response cache read failed"
                );
                Ok(None)
            }
        }
    }

    async fn store_response(&self, state: &RequestState, key: &str, correlation_id: &str) {
        let cacheable = state.verdict.is_approved()
            && state.metadata.error.is_none()
            && state.tier.is_some_and(|tier| tier != ResponseTier::NoResponse);
        if !cacheable {
            return;
        }
        let (Some(tier), Some(text)) = (state.tier, state.response_text.clone()) else {
            return;
        };

        let entry = CachedResponse {
            response_text: text,
            response_tier: tier,
            confidence_score: state.confidence,
        };
        if let Err(error) = self.caches.responses.set(key, &entry).await {
            tracing::warn!(
                event_name = "pipeline.cache.write_failed",
                correlation_id,
                error = %error,
                "response cache write failed"
            );
        }
    }
}

fn decline(state: &mut RequestState) {
    state.advance(PipelineEvent::ResponseStarted);
    state.finish(ResponseTier::NoResponse, NO_RESPONSE_MESSAGE.to_string(), NO_RESPONSE_CONFIDENCE);
    state.advance(PipelineEvent::ResponseFinalized);
}

fn log_denial(correlation_id: &str, decision: &GateDecision) {
    tracing::info!(
        event_name = "pipeline.guardrail.denied",
        correlation_id,
        reason = decision.reason.as_deref().unwrap_or_default(),
        path = ?decision.path,
        "inquiry declined by guardrails"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
