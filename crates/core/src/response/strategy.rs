use serde::{Deserialize, Serialize};

use crate::domain::context::StructuredContext;
use crate::domain::template::{CandidateTemplate, TemplateId};
use crate::errors::DomainError;
use crate::response::substitution::{fill, Substitution};
use crate::response::{GuardrailVerdict, ResponseTier};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionThresholds {
    pub match_threshold: f64,
    pub direct_threshold: f64,
    pub direct_substitution_enabled: bool,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self { match_threshold: 0.70, direct_threshold: 0.85, direct_substitution_enabled: true }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoResponseReason {
    GuardrailDenied,
    NoUsableContext,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResponsePlan {
    DirectSubstitution { template_id: TemplateId, score: f64, substitution: Substitution },
    /// `downgraded` is set when the template cleared the direct threshold but
    /// could not be filled completely.
    TemplateAssisted { template: CandidateTemplate, downgraded: bool },
    CustomGeneration,
    NoResponse { reason: NoResponseReason },
}

impl ResponsePlan {
    pub fn tier(&self) -> ResponseTier {
        match self {
            Self::DirectSubstitution { .. } => ResponseTier::DirectTemplate,
            Self::TemplateAssisted { .. } => ResponseTier::TemplateAssisted,
            Self::CustomGeneration => ResponseTier::CustomGeneration,
            Self::NoResponse { .. } => ResponseTier::NoResponse,
        }
    }

    pub fn needs_generation(&self) -> bool {
        matches!(self, Self::TemplateAssisted { .. } | Self::CustomGeneration)
    }
}

/// Highest score wins; among equal scores the earliest candidate wins.
pub fn best_candidate(candidates: &[CandidateTemplate]) -> Option<&CandidateTemplate> {
    candidates.iter().fold(None, |best: Option<&CandidateTemplate>, candidate| match best {
        Some(current) if candidate.score <= current.score => Some(current),
        _ => Some(candidate),
    })
}

/// Picks the cheapest adequate response strategy.
///
/// A pending verdict is treated as provisionally approved: the plan may be
/// computed speculatively, but the caller must not emit it until the verdict
/// is known. Only an explicit denial forces `NoResponse` here.
pub fn select(
    verdict: &GuardrailVerdict,
    best: Option<&CandidateTemplate>,
    context: &StructuredContext,
    thresholds: &SelectionThresholds,
) -> Result<ResponsePlan, DomainError> {
    if verdict.is_denied() {
        return Ok(ResponsePlan::NoResponse { reason: NoResponseReason::GuardrailDenied });
    }

    if let Some(template) = best.filter(|t| t.score >= thresholds.match_threshold) {
        template.validate()?;

        if thresholds.direct_substitution_enabled && template.score >= thresholds.direct_threshold
        {
            let substitution = fill(template, context);
            if substitution.all_filled {
                return Ok(ResponsePlan::DirectSubstitution {
                    template_id: template.id.clone(),
                    score: template.score,
                    substitution,
                });
            }
            return Ok(ResponsePlan::TemplateAssisted {
                template: template.clone(),
                downgraded: true,
            });
        }

        return Ok(ResponsePlan::TemplateAssisted { template: template.clone(), downgraded: false });
    }

    if !context.is_empty() {
        return Ok(ResponsePlan::CustomGeneration);
    }

    Ok(ResponsePlan::NoResponse { reason: NoResponseReason::NoUsableContext })
}
