use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateCategory {
    CheckIn,
    CheckOut,
    Parking,
    Amenities,
    Policies,
    SpecialRequests,
    General,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckIn => "check-in",
            Self::CheckOut => "check-out",
            Self::Parking => "parking",
            Self::Amenities => "amenities",
            Self::Policies => "policies",
            Self::SpecialRequests => "special-requests",
            Self::General => "general",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "check-in" => Some(Self::CheckIn),
            "check-out" => Some(Self::CheckOut),
            "parking" => Some(Self::Parking),
            "amenities" => Some(Self::Amenities),
            "policies" => Some(Self::Policies),
            "special-requests" => Some(Self::SpecialRequests),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// A pre-authored response scored against one inquiry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateTemplate {
    pub id: TemplateId,
    pub category: TemplateCategory,
    pub text: String,
    pub score: f64,
    pub placeholders: BTreeSet<String>,
}

impl CandidateTemplate {
    /// Builds a candidate whose declared placeholders are read from the text itself.
    pub fn from_text(
        id: impl Into<String>,
        category: TemplateCategory,
        text: impl Into<String>,
        score: f64,
    ) -> Self {
        let text = text.into();
        let placeholders = extract_placeholders(&text).into_iter().collect();
        Self { id: TemplateId(id.into()), category, text, score, placeholders }
    }

    /// Every declared placeholder must appear in the text.
    pub fn validate(&self) -> Result<(), DomainError> {
        let present: BTreeSet<String> = extract_placeholders(&self.text).into_iter().collect();
        let missing: Vec<&str> = self
            .placeholders
            .iter()
            .filter(|name| !present.contains(*name))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(DomainError::MalformedTemplate {
                template_id: self.id.0.clone(),
                missing: missing.join(", "),
            })
        }
    }
}

/// `{name}` where `name` is non-empty ASCII alphanumerics or underscores.
pub(crate) static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"));

/// Returns placeholder names in order of first appearance, without duplicates.
pub fn extract_placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in PLACEHOLDER_RE.captures_iter(text) {
        let name = &captures[1];
        if !names.iter().any(|seen| seen == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Collapses hits that share a template id, keeping the highest score per id,
/// then ranks by score descending and truncates to `top_k`.
///
/// Equal scores keep the order in which each id was first seen, so the
/// result is deterministic for a given input order.
pub fn deduplicate(hits: Vec<CandidateTemplate>, top_k: usize) -> Vec<CandidateTemplate> {
    let mut positions: HashMap<TemplateId, usize> = HashMap::new();
    let mut unique: Vec<CandidateTemplate> = Vec::with_capacity(hits.len());

    for hit in hits {
        match positions.get(&hit.id) {
            Some(&index) => {
                if hit.score > unique[index].score {
                    unique[index] = hit;
                }
            }
            None => {
                positions.insert(hit.id.clone(), unique.len());
                unique.push(hit);
            }
        }
    }

    unique.sort_by(|left, right| right.score.total_cmp(&left.score));
    unique.truncate(top_k);
    unique
}
