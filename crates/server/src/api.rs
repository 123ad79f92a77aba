use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concierge_agent::{AgentRuntime, InquiryResponse};
use concierge_core::domain::Inquiry;
use concierge_core::errors::{ApplicationError, DomainError, InterfaceError};
use concierge_db::DbPool;

use crate::health::health;

/// Longest accepted inquiry, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2_000;

#[derive(Clone)]
pub struct AppState {
    pub runtime: AgentRuntime,
    pub db_pool: DbPool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GenerateRequest {
    pub message: String,
    #[serde(default)]
    pub property_id: Option<String>,
    #[serde(default)]
    pub reservation_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/generate-response", post(generate_response))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn generate_response(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<InquiryResponse>, (StatusCode, Json<ErrorBody>)> {
    let correlation_id = Uuid::new_v4().to_string();
    let inquiry = to_inquiry(request)
        .map_err(|error| interface_error(error.into_interface(correlation_id)))?;

    Ok(Json(state.runtime.handle(inquiry).await))
}

fn to_inquiry(request: GenerateRequest) -> Result<Inquiry, ApplicationError> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(DomainError::InvariantViolation("message must not be empty".to_string()).into());
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(DomainError::InvariantViolation(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        ))
        .into());
    }

    let mut inquiry = Inquiry::new(message);
    if let Some(property_id) = non_blank(request.property_id) {
        inquiry = inquiry.for_property(property_id);
    }
    if let Some(reservation_id) = non_blank(request.reservation_id) {
        inquiry = inquiry.for_reservation(reservation_id);
    }
    Ok(inquiry)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn interface_error(error: InterfaceError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::info!(
        event_name = "api.request.rejected",
        correlation_id = error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "request rejected at the api boundary"
    );
    let body = ErrorBody {
        error: error.user_message(),
        detail: error.to_string(),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(body))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;

    use concierge_agent::{
        CapabilityError, Embedder, Generation, GenerationRequest, Generator, RegexSpanDetector,
        SearchHit, SimilaritySearch, TopicClassifier, TopicVerdict,
    };
    use concierge_core::config::AppConfig;
    use concierge_core::domain::{ParkingType, Property, PropertyId};
    use concierge_db::{connect, migrations, PropertyRepository, SqlPropertyRepository};

    use super::AppState;
    use crate::bootstrap::{assemble_runtime, Capabilities};

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn model(&self) -> &str {
            "gpt-4o-mini"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, CapabilityError> {
            Ok(Generation {
                text: r#"{"response_text": "Happy to help with that."}"#.to_string(),
                input_tokens: 100,
                output_tokens: 20,
            })
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, CapabilityError> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct CheckInIndex;

    #[async_trait]
    impl SimilaritySearch for CheckInIndex {
        async fn search(
            &self,
            _vector: &[f32],
            _top_k: usize,
            _score_threshold: f64,
        ) -> Result<Vec<SearchHit>, CapabilityError> {
            Ok(vec![SearchHit {
                id: "T-CHECKIN".to_string(),
                text: "Check-in is at {check_in_time}.".to_string(),
                score: 0.95,
                category: Some("check-in".to_string()),
                placeholders: vec!["check_in_time".to_string()],
            }])
        }
    }

    struct AllowAll;

    #[async_trait]
    impl TopicClassifier for AllowAll {
        async fn classify(&self, _text: &str) -> Result<TopicVerdict, CapabilityError> {
            Ok(TopicVerdict::allowed())
        }
    }

    pub(crate) async fn app_state() -> AppState {
        let config = AppConfig::default();
        let db_pool = connect("sqlite::memory:").await.expect("in-memory database");
        migrations::run_pending(&db_pool).await.expect("migrations");
        SqlPropertyRepository::new(db_pool.clone())
            .save(Property {
                id: PropertyId("PROP-001".to_string()),
                name: "Sunset Beach Resort".to_string(),
                check_in_time: "3:00 PM".to_string(),
                check_out_time: "11:00 AM".to_string(),
                parking: ParkingType::Free,
                parking_details: None,
                amenities: vec![],
                policies: Default::default(),
                contact: Default::default(),
            })
            .await
            .expect("seed property");

        let capabilities = Capabilities {
            generator: Arc::new(EchoGenerator),
            embedder: Arc::new(UnitEmbedder),
            search: Arc::new(CheckInIndex),
            detector: Arc::new(RegexSpanDetector::new().expect("span patterns")),
            classifier: Arc::new(AllowAll),
        };
        let runtime = assemble_runtime(&config, &db_pool, capabilities).expect("runtime");
        AppState { runtime, db_pool }
    }
}
