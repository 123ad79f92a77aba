use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

use concierge_core::config::GuardrailConfig;
use concierge_core::response::GuardrailVerdict;

use crate::llm::{CapabilityError, TopicClassifier};

pub const REASON_PII_DETECTED: &str = "pii_detected";
pub const REASON_PII_CHECK_UNAVAILABLE: &str = "pii_check_unavailable";
pub const REASON_TOPIC_RESTRICTED: &str = "topic_restricted";
pub const REASON_CLASSIFIER_UNAVAILABLE: &str = "classifier_unavailable";

/// Messages longer than this always go to the classifier.
pub const FAST_PATH_MAX_CHARS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanCategory {
    Email,
    Phone,
    GovernmentId,
    PaymentCard,
    NetworkAddress,
    BankAccount,
    Person,
}

impl SpanCategory {
    pub fn is_restricted(self) -> bool {
        !matches!(self, Self::Person)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedSpan {
    pub category: SpanCategory,
    pub start: usize,
    pub end: usize,
}

#[async_trait]
pub trait SpanDetector: Send + Sync {
    async fn detect(&self, text: &str) -> Result<Vec<DetectedSpan>, CapabilityError>;
}

/// Pattern-based detector for the restricted categories.
pub struct RegexSpanDetector {
    patterns: Vec<(SpanCategory, Regex)>,
}

impl RegexSpanDetector {
    pub fn new() -> Result<Self, regex::Error> {
        let table = [
            (SpanCategory::Email, r"(?i)\b[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}\b"),
            (SpanCategory::GovernmentId, r"\b\d{3}-\d{2}-\d{4}\b"),
            (SpanCategory::PaymentCard, r"\b\d(?:[ -]?\d){12,18}\b"),
            (
                SpanCategory::BankAccount,
                r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,4})?\b",
            ),
            (
                SpanCategory::NetworkAddress,
                r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
            ),
            (
                SpanCategory::Phone,
                concat!(
                    r"\+\d{1,3}[ .-]?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b",
                    r"|\(\d{3}\)[ .-]?\d{3}[ .-]?\d{4}\b",
                    r"|\b\d{3}[ .-]\d{3}[ .-]\d{4}\b",
                ),
            ),
        ];

        let patterns = table
            .into_iter()
            .map(|(category, pattern)| Ok((category, Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { patterns })
    }

    pub fn scan(&self, text: &str) -> Vec<DetectedSpan> {
        let mut spans = Vec::new();
        for (category, pattern) in &self.patterns {
            for found in pattern.find_iter(text) {
                if *category == SpanCategory::PaymentCard && !passes_luhn(found.as_str()) {
                    continue;
                }
                spans.push(DetectedSpan { category: *category, start: found.start(), end: found.end() });
            }
        }
        spans.sort_by_key(|span| (span.start, span.end));
        spans
    }
}

#[async_trait]
impl SpanDetector for RegexSpanDetector {
    async fn detect(&self, text: &str) -> Result<Vec<DetectedSpan>, CapabilityError> {
        Ok(self.scan(text))
    }
}

fn passes_luhn(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|ch| ch.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(index, &digit)| {
            if index % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

/// Curated safe-topic patterns. Escalation terms (legal, medical, pricing,
/// injection) disqualify a message from the fast path even when a safe
/// pattern also matches.
pub struct FastPathMatcher {
    safe: RegexSet,
    escalation: Regex,
}

impl FastPathMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        let safe = RegexSet::new([
            r"(?i)\bcheck[- ]?(in|out)\b",
            r"(?i)\bpark(ing)?\b",
            r"(?i)\bwi-?fi\b|\binternet\b",
            r"(?i)\b(pool|gym|fitness|breakfast)\b",
            r"(?i)\bpets?\b|\bdogs?\b|\bcats?\b",
            r"(?i)\bcancel(lation|ling)?\b",
            r"(?i)\b(address|directions|located|location)\b",
            r"(?i)\b(towels?|linens?|sheets)\b",
        ])?;
        let escalation = Regex::new(
            r"(?i)\b(sue|lawsuit|lawyer|attorney|legal|doctor|medical|symptoms?|discount|negotiate|invest(ment)?|politic(s|al)|ignore|instructions|prompt)\b",
        )?;
        Ok(Self { safe, escalation })
    }

    pub fn matches(&self, text: &str) -> bool {
        if text.chars().count() > FAST_PATH_MAX_CHARS {
            return false;
        }
        self.safe.is_match(text) && !self.escalation.is_match(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailPath {
    Fast,
    Slow,
    Pii,
    Cached,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub approved: bool,
    pub reason: Option<String>,
    pub path: GuardrailPath,
}

impl GateDecision {
    pub fn approve(path: GuardrailPath) -> Self {
        Self { approved: true, reason: None, path }
    }

    pub fn deny(path: GuardrailPath, reason: impl Into<String>) -> Self {
        Self { approved: false, reason: Some(reason.into()), path }
    }

    pub fn verdict(&self) -> GuardrailVerdict {
        if self.approved {
            GuardrailVerdict::Approved
        } else {
            GuardrailVerdict::denied(self.reason.clone().unwrap_or_default())
        }
    }
}

/// PII check followed by the fast/slow topic check.
pub struct GuardrailGate {
    detector: Arc<dyn SpanDetector>,
    classifier: Arc<dyn TopicClassifier>,
    fast_path: FastPathMatcher,
    check_timeout: Duration,
    fail_open: bool,
}

impl GuardrailGate {
    pub fn new(
        detector: Arc<dyn SpanDetector>,
        classifier: Arc<dyn TopicClassifier>,
        config: &GuardrailConfig,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            detector,
            classifier,
            fast_path: FastPathMatcher::new()?,
            check_timeout: Duration::from_millis(config.classifier_timeout_ms),
            fail_open: config.fail_open,
        })
    }

    /// Returns a denial when a restricted span is present. Detector failure
    /// denies as well; it is never treated as a clear result.
    pub async fn check_pii(&self, text: &str) -> Option<GateDecision> {
        let detected = tokio::time::timeout(self.check_timeout, self.detector.detect(text)).await;
        match detected {
            Ok(Ok(spans)) => spans
                .iter()
                .find(|span| span.category.is_restricted())
                .map(|_| GateDecision::deny(GuardrailPath::Pii, REASON_PII_DETECTED)),
            Ok(Err(error)) => {
                tracing::warn!(event_name = "guardrail.pii.unavailable", error = %error, "span detection failed");
                Some(GateDecision::deny(GuardrailPath::Pii, REASON_PII_CHECK_UNAVAILABLE))
            }
            Err(_) => {
                tracing::warn!(
                    event_name = "guardrail.pii.unavailable",
                    timeout_ms = self.check_timeout.as_millis() as u64,
                    "span detection timed out"
                );
                Some(GateDecision::deny(GuardrailPath::Pii, REASON_PII_CHECK_UNAVAILABLE))
            }
        }
    }

    pub fn fast_path(&self, text: &str) -> bool {
        self.fast_path.matches(text)
    }

    /// Slow-path decision with the configured failure policy applied.
    pub async fn classify(&self, text: &str) -> GateDecision {
        let outcome = tokio::time::timeout(self.check_timeout, self.classifier.classify(text)).await;
        let error = match outcome {
            Ok(Ok(verdict)) if verdict.restricted => {
                tracing::info!(
                    event_name = "guardrail.topic.restricted",
                    topic = %verdict.topic,
                    "topic classifier restricted the inquiry"
                );
                return GateDecision::deny(GuardrailPath::Slow, REASON_TOPIC_RESTRICTED);
            }
            Ok(Ok(_)) => return GateDecision::approve(GuardrailPath::Slow),
            Ok(Err(error)) => error,
            Err(_) => CapabilityError::Timeout {
                capability: "topic_classifier",
                after_ms: self.check_timeout.as_millis() as u64,
            },
        };

        tracing::warn!(
            event_name = "guardrail.classifier.unavailable",
            error = %error,
            fail_open = self.fail_open,
            "topic classifier failed"
        );
        if self.fail_open {
            GateDecision::approve(GuardrailPath::Slow)
        } else {
            GateDecision::deny(GuardrailPath::Slow, REASON_CLASSIFIER_UNAVAILABLE)
        }
    }

    pub async fn evaluate(&self, text: &str) -> GateDecision {
        if let Some(denied) = self.check_pii(text).await {
            return denied;
        }
        if self.fast_path(text) {
            return GateDecision::approve(GuardrailPath::Fast);
        }
        self.classify(text).await
    }
}
