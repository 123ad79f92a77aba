use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompts::{parse_json_object, topic_classifier_prompt};

/// Failure of an external capability call.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("{capability} timed out after {after_ms}ms")]
    Timeout { capability: &'static str, after_ms: u64 },
    #[error("{capability} unavailable: {message}")]
    Unavailable { capability: &'static str, message: String },
    #[error("{capability} returned an invalid response: {message}")]
    InvalidResponse { capability: &'static str, message: String },
}

impl CapabilityError {
    pub fn unavailable(capability: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable { capability, message: message.into() }
    }

    pub fn invalid(capability: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidResponse { capability, message: message.into() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier used for cost accounting.
    fn model(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, CapabilityError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicVerdict {
    pub restricted: bool,
    #[serde(default = "general_topic")]
    pub topic: String,
    #[serde(default)]
    pub reason: String,
}

fn general_topic() -> String {
    "general".to_string()
}

impl TopicVerdict {
    pub fn allowed() -> Self {
        Self { restricted: false, topic: general_topic(), reason: String::new() }
    }

    pub fn restricted(topic: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { restricted: true, topic: topic.into(), reason: reason.into() }
    }
}

/// Slow-path topic decision backed by a model.
#[async_trait]
pub trait TopicClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<TopicVerdict, CapabilityError>;
}

/// Classifier that asks a [`Generator`] for a JSON verdict. Output that does
/// not parse is an error, so the gate's failure policy decides the outcome.
pub struct LlmTopicClassifier {
    generator: Arc<dyn Generator>,
    max_tokens: u32,
}

impl LlmTopicClassifier {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator, max_tokens: 150 }
    }
}

#[async_trait]
impl TopicClassifier for LlmTopicClassifier {
    async fn classify(&self, text: &str) -> Result<TopicVerdict, CapabilityError> {
        let request = GenerationRequest {
            prompt: topic_classifier_prompt(text),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };
        let generation = self.generator.generate(&request).await?;

        let value = parse_json_object(&generation.text).ok_or_else(|| {
            CapabilityError::invalid("topic_classifier", "classifier output is not a JSON object")
        })?;
        serde_json::from_value(value)
            .map_err(|error| CapabilityError::invalid("topic_classifier", error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        CapabilityError, Generation, GenerationRequest, Generator, LlmTopicClassifier,
        TopicClassifier,
    };

    struct Scripted(&'static str);

    #[async_trait]
    impl Generator for Scripted {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<Generation, CapabilityError> {
            assert!(request.prompt.contains("RESTRICTED"));
            Ok(Generation { text: self.0.to_string(), input_tokens: 10, output_tokens: 5 })
        }
    }

    #[tokio::test]
    async fn classifier_parses_fenced_json() {
        let classifier = LlmTopicClassifier::new(Arc::new(Scripted(
            "```json\n{\"restricted\": true, \"topic\": \"legal advice\", \"reason\": \"asks to sue\"}\n```",
        )));

        let verdict = classifier.classify("Can I sue the hotel?").await.expect("classify");
        assert!(verdict.restricted);
        assert_eq!(verdict.topic, "legal advice");
    }

    #[tokio::test]
    async fn classifier_defaults_missing_fields() {
        let classifier = LlmTopicClassifier::new(Arc::new(Scripted("{\"restricted\": false}")));
        let verdict = classifier.classify("Is there a pool?").await.expect("classify");
        assert!(!verdict.restricted);
        assert_eq!(verdict.topic, "general");
    }

    #[tokio::test]
    async fn unparseable_classifier_output_is_an_error() {
        let classifier = LlmTopicClassifier::new(Arc::new(Scripted("sure, that's fine")));
        let error = classifier.classify("hello").await.expect_err("not json");
        assert!(matches!(error, CapabilityError::InvalidResponse { .. }));
    }
}
