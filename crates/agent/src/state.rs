use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concierge_core::cost::UsageTotals;
use concierge_core::domain::Inquiry;
use concierge_core::flows::{PipelineEvent, PipelineTracker};
use concierge_core::response::{GuardrailVerdict, ResponseTier};

use crate::guardrails::{GateDecision, GuardrailPath};
use crate::tools::ToolResults;

/// The value stored in the response cache.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response_text: String,
    pub response_tier: ResponseTier,
    pub confidence_score: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardrailSummary {
    pub approved: bool,
    pub reason: Option<String>,
    pub path: Option<GuardrailPath>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageLatency {
    pub guardrail: u64,
    pub tools: u64,
    pub generation: u64,
    pub total: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHits {
    pub embedding: bool,
    pub templates: bool,
    pub property: bool,
    pub reservation: bool,
    pub response: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub guardrail: GuardrailSummary,
    pub stage_latency_ms: StageLatency,
    pub cache_hits: CacheHits,
    pub generation_calls: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Decimal,
    pub templates_found: usize,
    pub best_template_score: Option<f64>,
    pub tool_status: BTreeMap<String, String>,
    pub error: Option<String>,
}

/// What `AgentRuntime::handle` returns to the transport layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InquiryResponse {
    pub response_text: String,
    pub response_tier: ResponseTier,
    pub confidence_score: f64,
    pub metadata: ResponseMetadata,
}

/// Outcome of the response computation for one inquiry.
#[derive(Clone, Debug, PartialEq)]
pub struct ComputedResponse {
    pub response_text: String,
    pub tier: ResponseTier,
    pub confidence: f64,
    pub tools: Option<ToolResults>,
    pub usage: UsageTotals,
    pub generation_elapsed: Duration,
    pub error: Option<String>,
}

/// Request-scoped aggregate, owned by one `handle` call and dropped with it.
#[derive(Debug)]
pub struct RequestState {
    pub request_id: Uuid,
    pub inquiry: Inquiry,
    pub verdict: GuardrailVerdict,
    pub guardrail_path: Option<GuardrailPath>,
    pub tier: Option<ResponseTier>,
    pub response_text: Option<String>,
    pub confidence: f64,
    pub metadata: ResponseMetadata,
    pub tracker: PipelineTracker,
    started: Instant,
}

impl RequestState {
    pub fn new(inquiry: Inquiry) -> Self {
        let request_id = Uuid::new_v4();
        Self {
            request_id,
            inquiry,
            verdict: GuardrailVerdict::Pending,
            guardrail_path: None,
            tier: None,
            response_text: None,
            confidence: 0.0,
            metadata: ResponseMetadata { request_id: request_id.to_string(), ..Default::default() },
            tracker: PipelineTracker::default(),
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> String {
        self.request_id.to_string()
    }

    /// Out-of-order events are logged rather than failing the request.
    pub fn advance(&mut self, event: PipelineEvent) {
        if let Err(error) = self.tracker.apply(event) {
            tracing::error!(
                event_name = "pipeline.state.invalid_transition",
                correlation_id = %self.request_id,
                error = %error,
                "pipeline state machine rejected an event"
            );
        }
    }

    pub fn record_decision(&mut self, decision: &GateDecision, elapsed: Duration) {
        self.verdict = decision.verdict();
        self.guardrail_path = Some(decision.path);
        self.metadata.guardrail = GuardrailSummary {
            approved: decision.approved,
            reason: decision.reason.clone(),
            path: Some(decision.path),
        };
        self.metadata.stage_latency_ms.guardrail = millis(elapsed);
        self.advance(if decision.approved {
            PipelineEvent::GuardrailApproved
        } else {
            PipelineEvent::GuardrailDenied
        });
    }

    pub fn record_computed(&mut self, computed: ComputedResponse) {
        if let Some(tools) = &computed.tools {
            self.metadata.stage_latency_ms.tools = millis(tools.elapsed);
            self.metadata.cache_hits.embedding = tools.embedding_cache_hit;
            self.metadata.cache_hits.templates = tools.templates.cache_hit;
            self.metadata.cache_hits.property = tools.property.cache_hit;
            self.metadata.cache_hits.reservation = tools.reservation.cache_hit;
            self.metadata.templates_found = tools.templates().len();
            self.metadata.best_template_score =
                concierge_core::response::best_candidate(tools.templates()).map(|best| best.score);
            self.metadata.tool_status = tools.summary();
        }
        self.metadata.stage_latency_ms.generation = millis(computed.generation_elapsed);
        self.metadata.generation_calls = computed.usage.generation_calls;
        self.metadata.input_tokens = computed.usage.input_tokens;
        self.metadata.output_tokens = computed.usage.output_tokens;
        self.metadata.cost_usd = computed.usage.cost_usd;
        if computed.error.is_some() {
            self.metadata.error = computed.error;
        }
        self.finish(computed.tier, computed.response_text, computed.confidence);
    }

    pub fn finish(&mut self, tier: ResponseTier, text: String, confidence: f64) {
        self.tier = Some(tier);
        self.response_text = Some(text);
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    pub fn into_response(mut self) -> InquiryResponse {
        self.metadata.stage_latency_ms.total = millis(self.started.elapsed());
        InquiryResponse {
            response_text: self.response_text.unwrap_or_default(),
            response_tier: self.tier.unwrap_or(ResponseTier::NoResponse),
            confidence_score: self.confidence,
            metadata: self.metadata,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use concierge_core::domain::Inquiry;
    use concierge_core::flows::PipelineState;
    use concierge_core::response::{GuardrailVerdict, ResponseTier};

    use super::RequestState;
    use crate::guardrails::{GateDecision, GuardrailPath};

    #[test]
    fn denial_is_recorded_in_state_and_metadata() {
        let mut state = RequestState::new(Inquiry::new("Can I sue?"));
        state.advance(concierge_core::flows::PipelineEvent::GuardrailStarted);
        state.record_decision(
            &GateDecision::deny(GuardrailPath::Slow, "topic_restricted"),
            Duration::from_millis(12),
        );

        assert_eq!(state.verdict, GuardrailVerdict::denied("topic_restricted"));
        assert_eq!(state.tracker.current(), PipelineState::Denied);
        assert_eq!(state.metadata.stage_latency_ms.guardrail, 12);
        assert_eq!(state.metadata.guardrail.reason.as_deref(), Some("topic_restricted"));
    }

    #[test]
    fn response_defaults_to_no_response_and_clamps_confidence() {
        let mut state = RequestState::new(Inquiry::new("hello"));
        let request_id = state.correlation_id();
        state.finish(ResponseTier::CustomGeneration, "Hi there.".to_string(), 1.7);

        let response = state.into_response();
        assert_eq!(response.response_tier, ResponseTier::CustomGeneration);
        assert_eq!(response.confidence_score, 1.0);
        assert_eq!(response.metadata.request_id, request_id);

        let empty = RequestState::new(Inquiry::new("hello")).into_response();
        assert_eq!(empty.response_tier, ResponseTier::NoResponse);
    }
}
