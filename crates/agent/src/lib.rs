//! Inquiry orchestration for the concierge service.
//!
//! `AgentRuntime::handle` drives one guest inquiry through the pipeline:
//! 1. **Guardrails** (`guardrails`) - PII screen, then a fast pattern match or
//!    a model-backed topic classifier
//! 2. **Fan-out** (`tools`) - template retrieval, property and reservation
//!    lookups, concurrently and cache-first
//! 3. **Strategy** - the cheapest adequate tier from `concierge_core::response`
//! 4. **Generation** (`llm`, `prompts`) - only for template-assisted and
//!    custom tiers, retried with backoff
//!
//! When the topic check needs the classifier, steps 2-4 run speculatively
//! alongside it and are cancelled if the inquiry is denied.
//!
//! External capabilities (generation, embedding, similarity search, span
//! detection, record stores) are traits so they can be swapped for fakes.

pub mod guardrails;
pub mod llm;
pub mod prompts;
pub mod retrieval;
pub mod runtime;
pub mod state;
pub mod tools;

pub use guardrails::{
    DetectedSpan, FastPathMatcher, GateDecision, GuardrailGate, GuardrailPath, RegexSpanDetector,
    SpanCategory, SpanDetector,
};
pub use llm::{
    CapabilityError, Embedder, Generation, GenerationRequest, Generator, LlmTopicClassifier,
    TopicClassifier, TopicVerdict,
};
pub use retrieval::{SearchHit, SimilaritySearch};
pub use runtime::{AgentRuntime, PipelineSettings};
pub use state::{InquiryResponse, ResponseMetadata};
pub use tools::{
    CacheLayer, FanOutCoordinator, Lookup, LookupFailure, LookupOutcome, PropertyLookupTool,
    ReservationLookupTool, TemplateRetrievalTool, ToolResults,
};
