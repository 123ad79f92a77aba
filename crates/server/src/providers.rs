use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, error};

use concierge_agent::{
    CapabilityError, Embedder, Generation, GenerationRequest, Generator, SearchHit,
    SimilaritySearch,
};
use concierge_core::config::{AppConfig, RetrievalConfig};

/// Shared connection settings for an OpenAI-compatible endpoint
/// (OpenAI, DeepSeek, or Ollama's `/v1` API).
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_secs(config.llm.timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.llm_base_url().trim_end_matches('/').to_string(),
            api_key: config.llm.api_key.clone(),
            timeout,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.client.post(format!("{}/{path}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

async fn send_json(
    capability: &'static str,
    request: RequestBuilder,
    body: &Value,
    timeout: Duration,
) -> Result<Value, CapabilityError> {
    let response = request.json(body).send().await.map_err(|error| {
        if error.is_timeout() {
            CapabilityError::Timeout { capability, after_ms: timeout.as_millis() as u64 }
        } else {
            error!(capability, error = %error, "capability request failed");
            CapabilityError::unavailable(capability, error.to_string())
        }
    })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|error| CapabilityError::unavailable(capability, error.to_string()))?;
    if !status.is_success() {
        error!(capability, status = %status, "capability endpoint returned an error");
        return Err(CapabilityError::unavailable(capability, format!("status {status}")));
    }

    debug!(capability, bytes = text.len(), "capability response received");
    serde_json::from_str(&text)
        .map_err(|error| CapabilityError::invalid(capability, error.to_string()))
}

pub struct HttpGenerator {
    client: OpenAiCompatibleClient,
    model: String,
}

impl HttpGenerator {
    pub fn new(client: OpenAiCompatibleClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, CapabilityError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        let request_builder = self.client.post("chat/completions");
        let data = send_json("generator", request_builder, &body, self.client.timeout).await?;

        let text = data["choices"]
            .get(0)
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| CapabilityError::invalid("generator", "no choices in response"))?
            .to_string();
        let usage = &data["usage"];
        Ok(Generation {
            text,
            input_tokens: usage["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: usage["completion_tokens"].as_u64().unwrap_or(0),
        })
    }
}

pub struct HttpEmbedder {
    client: OpenAiCompatibleClient,
    model: String,
}

impl HttpEmbedder {
    pub fn new(client: OpenAiCompatibleClient, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CapabilityError> {
        let body = json!({ "model": self.model, "input": text });
        let request = self.client.post("embeddings");
        let data = send_json("embedder", request, &body, self.client.timeout).await?;
        parse_embedding(&data)
    }
}

fn parse_embedding(data: &Value) -> Result<Vec<f32>, CapabilityError> {
    let values = data["data"]
        .get(0)
        .and_then(|entry| entry["embedding"].as_array())
        .ok_or_else(|| CapabilityError::invalid("embedder", "missing embedding"))?;
    values
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| CapabilityError::invalid("embedder", "non-numeric embedding value"))
        })
        .collect()
}

/// Template index served by a Qdrant collection. Each point's payload holds
/// `template_id`, `text`, `category` and `placeholders`.
pub struct QdrantSearch {
    client: Client,
    base_url: String,
    collection: String,
    timeout: Duration,
}

impl QdrantSearch {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: config.search_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl SimilaritySearch for QdrantSearch {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<SearchHit>, CapabilityError> {
        let body = json!({
            "vector": vector,
            "limit": top_k,
            "score_threshold": score_threshold,
            "with_payload": true,
        });
        let url = format!("{}/collections/{}/points/search", self.base_url, self.collection);
        let request = self.client.post(url);
        let data = send_json("similarity_search", request, &body, self.timeout).await?;
        parse_search_hits(&data)
    }
}

fn parse_search_hits(data: &Value) -> Result<Vec<SearchHit>, CapabilityError> {
    let points = data["result"]
        .as_array()
        .ok_or_else(|| CapabilityError::invalid("similarity_search", "missing result array"))?;

    Ok(points
        .iter()
        .filter_map(|point| {
            let payload = &point["payload"];
            let text = payload["text"].as_str()?.to_string();
            let id = payload["template_id"]
                .as_str()
                .map(str::to_string)
                .or_else(|| match &point["id"] {
                    Value::String(id) => Some(id.clone()),
                    Value::Number(id) => Some(id.to_string()),
                    _ => None,
                })?;
            Some(SearchHit {
                id,
                text,
                score: point["score"].as_f64().unwrap_or(0.0),
                category: payload["category"].as_str().map(str::to_string),
                placeholders: payload["placeholders"]
                    .as_array()
                    .map(|names| {
                        names.iter().filter_map(Value::as_str).map(str::to_string).collect()
                    })
                    .unwrap_or_default(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_embedding, parse_search_hits};

    #[test]
    fn search_hits_prefer_payload_template_id() {
        let data = json!({
            "result": [
                {
                    "id": 7,
                    "score": 0.91,
                    "payload": {
                        "template_id": "T-CHECKIN",
                        "text": "Check-in is at {check_in_time}.",
                        "category": "check-in",
                        "placeholders": ["check_in_time"]
                    }
                },
                { "id": "b1c2", "score": 0.72, "payload": { "text": "Towels are in the closet." } },
                { "id": 9, "score": 0.5, "payload": {} }
            ]
        });

        let hits = parse_search_hits(&data).expect("parse");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "T-CHECKIN");
        assert_eq!(hits[0].placeholders, vec!["check_in_time".to_string()]);
        assert_eq!(hits[1].id, "b1c2");
        assert!(hits[1].category.is_none());
    }

    #[test]
    fn embedding_must_be_numeric() {
        let ok = json!({ "data": [{ "embedding": [0.5, -0.25] }] });
        assert_eq!(parse_embedding(&ok).expect("parse"), vec![0.5_f32, -0.25]);

        let bad = json!({ "data": [{ "embedding": ["x"] }] });
        assert!(parse_embedding(&bad).is_err());
        assert!(parse_embedding(&json!({})).is_err());
    }
}
