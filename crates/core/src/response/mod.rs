pub mod strategy;
pub mod substitution;

use serde::{Deserialize, Serialize};

pub use strategy::{best_candidate, select, NoResponseReason, ResponsePlan, SelectionThresholds};
pub use substitution::{fill, Substitution};

/// Fixed refusal text returned for every tier-4 response.
pub const NO_RESPONSE_MESSAGE: &str = "I apologize, but I'm unable to assist with this type of request. Please contact the property directly for further assistance.";

pub const TEMPLATE_ASSISTED_CONFIDENCE: f64 = 0.9;
/// Used when the model answer for a template-assisted request cannot be parsed.
pub const UNPARSED_TEMPLATE_CONFIDENCE: f64 = 0.7;
pub const CUSTOM_GENERATION_CONFIDENCE: f64 = 0.7;
pub const NO_RESPONSE_CONFIDENCE: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTier {
    DirectTemplate,
    TemplateAssisted,
    CustomGeneration,
    NoResponse,
}

impl ResponseTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectTemplate => "direct_template",
            Self::TemplateAssisted => "template_assisted",
            Self::CustomGeneration => "custom_generation",
            Self::NoResponse => "no_response",
        }
    }

    /// Tier number as used in logs, 1 being the cheapest.
    pub fn rank(&self) -> u8 {
        match self {
            Self::DirectTemplate => 1,
            Self::TemplateAssisted => 2,
            Self::CustomGeneration => 3,
            Self::NoResponse => 4,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GuardrailVerdict {
    #[default]
    Pending,
    Approved,
    Denied {
        reason: String,
    },
}

impl GuardrailVerdict {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied { reason: reason.into() }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Denied { reason } => Some(reason),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardrailVerdict, ResponseTier};

    #[test]
    fn tiers_serialize_in_snake_case() {
        let encoded = serde_json::to_string(&ResponseTier::TemplateAssisted).expect("encode");
        assert_eq!(encoded, "\"template_assisted\"");
        assert_eq!(ResponseTier::NoResponse.as_str(), "no_response");
        assert_eq!(ResponseTier::DirectTemplate.rank(), 1);
    }

    #[test]
    fn verdict_helpers() {
        assert!(!GuardrailVerdict::Pending.is_final());
        assert!(GuardrailVerdict::Approved.is_approved());

        let denied = GuardrailVerdict::denied("topic_restricted");
        assert!(denied.is_denied());
        assert!(denied.is_final());
        assert_eq!(denied.reason(), Some("topic_restricted"));
    }
}
