use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use concierge_core::domain::template::extract_placeholders;
use concierge_core::domain::{CandidateTemplate, TemplateCategory, TemplateId};

use crate::llm::CapabilityError;

/// One scored match from the template index. A template indexed under several
/// phrasings may appear more than once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub score: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

impl SearchHit {
    /// Hits without declared placeholders fall back to those found in the text.
    pub fn into_candidate(self) -> CandidateTemplate {
        let category = self
            .category
            .as_deref()
            .and_then(TemplateCategory::parse)
            .unwrap_or(TemplateCategory::General);
        let placeholders = if self.placeholders.is_empty() {
            extract_placeholders(&self.text).into_iter().collect()
        } else {
            self.placeholders.into_iter().collect()
        };

        CandidateTemplate {
            id: TemplateId(self.id),
            category,
            text: self.text,
            score: self.score.clamp(0.0, 1.0),
            placeholders,
        }
    }
}

#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f64,
    ) -> Result<Vec<SearchHit>, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use concierge_core::domain::TemplateCategory;

    use super::SearchHit;

    #[test]
    fn declared_placeholders_are_kept_verbatim() {
        let hit = SearchHit {
            id: "T1".to_string(),
            text: "Check-in is at {check_in_time}.".to_string(),
            score: 1.2,
            category: Some("check-in".to_string()),
            placeholders: vec!["check_in_time".to_string(), "property_name".to_string()],
        };

        let candidate = hit.into_candidate();
        assert_eq!(candidate.category, TemplateCategory::CheckIn);
        assert_eq!(candidate.score, 1.0);
        assert_eq!(candidate.placeholders.len(), 2);
        assert!(candidate.validate().is_err());
    }

    #[test]
    fn missing_metadata_defaults_from_text() {
        let hit = SearchHit {
            id: "T2".to_string(),
            text: "Parking: {parking_details}".to_string(),
            score: 0.8,
            category: Some("unknown".to_string()),
            placeholders: vec![],
        };

        let candidate = hit.into_candidate();
        assert_eq!(candidate.category, TemplateCategory::General);
        assert!(candidate.placeholders.contains("parking_details"));
        assert!(candidate.validate().is_ok());
    }
}
