use regex::Captures;
use serde::{Deserialize, Serialize};

use crate::domain::context::StructuredContext;
use crate::domain::template::{CandidateTemplate, PLACEHOLDER_RE};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub text: String,
    pub all_filled: bool,
    /// Declared or textual placeholders with no value, in first-seen order.
    pub unfilled: Vec<String>,
}

/// Replaces every `{name}` in the template with the context value of the same
/// name. Values are inserted literally and never re-scanned, so a value that
/// itself contains braces is left untouched. Unresolved placeholders stay in
/// the text verbatim.
pub fn fill(template: &CandidateTemplate, context: &StructuredContext) -> Substitution {
    let mut unfilled: Vec<String> = Vec::new();
    let text = PLACEHOLDER_RE
        .replace_all(&template.text, |captures: &Captures| {
            let name = &captures[1];
            match context.get(name) {
                Some(value) => value.to_string(),
                None => {
                    if !unfilled.iter().any(|missing| missing == name) {
                        unfilled.push(name.to_string());
                    }
                    captures[0].to_string()
                }
            }
        })
        .into_owned();

    for declared in &template.placeholders {
        if context.get(declared).is_none() && !unfilled.contains(declared) {
            unfilled.push(declared.clone());
        }
    }

    Substitution { text, all_filled: unfilled.is_empty(), unfilled }
}

#[cfg(test)]
mod tests {
    use super::fill;
    use crate::domain::context::StructuredContext;
    use crate::domain::template::{extract_placeholders, CandidateTemplate, TemplateCategory};

    fn template(text: &str) -> CandidateTemplate {
        CandidateTemplate::from_text("T001", TemplateCategory::CheckIn, text, 0.95)
    }

    #[test]
    fn fills_every_placeholder_verbatim() {
        let context: StructuredContext =
            [("check_in_time", "3:00 PM"), ("property_name", "Sunset Beach Resort")]
                .into_iter()
                .collect();

        let result = fill(
            &template("Welcome to {property_name}! Check-in starts at {check_in_time}."),
            &context,
        );

        assert!(result.all_filled);
        assert!(result.unfilled.is_empty());
        assert_eq!(result.text, "Welcome to Sunset Beach Resort! Check-in starts at 3:00 PM.");
    }

    #[test]
    fn repeated_placeholders_are_all_replaced() {
        let context: StructuredContext = [("check_in_time", "3:00 PM")].into_iter().collect();
        let result = fill(&template("{check_in_time}, yes {check_in_time}"), &context);
        assert_eq!(result.text, "3:00 PM, yes 3:00 PM");
    }

    #[test]
    fn missing_value_reports_partial_fill() {
        let context: StructuredContext = [("check_in_time", "3:00 PM")].into_iter().collect();
        let result = fill(&template("From {check_in_time} until {check_out_time}."), &context);

        assert!(!result.all_filled);
        assert_eq!(result.unfilled, vec!["check_out_time".to_string()]);
        assert_eq!(result.text, "From 3:00 PM until {check_out_time}.");
    }

    #[test]
    fn declared_placeholder_counts_even_when_not_in_text() {
        let mut candidate = template("Check-in starts at {check_in_time}.");
        candidate.placeholders.insert("guest_name".to_string());
        let context: StructuredContext = [("check_in_time", "3:00 PM")].into_iter().collect();

        let result = fill(&candidate, &context);
        assert!(!result.all_filled);
        assert_eq!(result.unfilled, vec!["guest_name".to_string()]);
    }

    #[test]
    fn values_with_braces_are_not_rescanned() {
        let context: StructuredContext =
            [("a", "{b}"), ("b", "should not appear")].into_iter().collect();
        let result = fill(&template("value: {a}"), &context);
        assert_eq!(result.text, "value: {b}");
    }

    #[test]
    fn substitution_and_extraction_agree_on_placeholder_names() {
        let text = "{{guest_name}} in {room-type} or {room_type}, {Check_In2} {} {guest_name}";
        let mut candidate = template(text);
        candidate.placeholders.clear();

        let unresolved = fill(&candidate, &StructuredContext::default());
        assert_eq!(unresolved.unfilled, extract_placeholders(text));
        assert_eq!(unresolved.text, text);

        let context: StructuredContext =
            [("guest_name", "Ana"), ("room_type", "Suite"), ("Check_In2", "3 PM")]
                .into_iter()
                .collect();
        let resolved = fill(&candidate, &context);
        assert!(resolved.all_filled);
        assert_eq!(resolved.text, "{Ana} in {room-type} or Suite, 3 PM {} Ana");
    }

    #[test]
    fn stray_braces_are_preserved() {
        let context = StructuredContext::default();
        let result = fill(&template("Use {} or { this } or {open"), &context);
        assert!(result.all_filled);
        assert_eq!(result.text, "Use {} or { this } or {open");
    }
}
