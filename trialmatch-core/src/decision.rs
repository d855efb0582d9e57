//! Decision label normalization and consent coercion.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed eligibility categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "Eligible")]
    Eligible,
    #[serde(rename = "Likely Eligible")]
    LikelyEligible,
    #[serde(rename = "Likely Ineligible")]
    LikelyIneligible,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eligible => "Eligible",
            Self::LikelyEligible => "Likely Eligible",
            Self::LikelyIneligible => "Likely Ineligible",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a free-text decision label onto a [`Decision`].
///
/// First match wins. "ineligible" is tested before the bare "eligible"
/// substring because it contains it.
pub fn normalize_decision(label: &str) -> Decision {
    let s = label.trim().to_lowercase();

    if s.contains("likely ineligible") || s.contains("ineligible") {
        return Decision::LikelyIneligible;
    }
    if s.contains("likely eligible") {
        return Decision::LikelyEligible;
    }
    if s == "eligible" || (s.contains("eligible") && !s.contains("likely")) {
        return Decision::Eligible;
    }
    Decision::Unknown
}

const AFFIRMATIVE: &[&str] = &["yes", "y", "true", "t", "1", "consent", "agree", "agreed"];

/// Coerce a loosely typed consent value into a boolean.
pub fn coerce_consent(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => AFFIRMATIVE.contains(&s.trim().to_lowercase().as_str()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_documented_labels() {
        assert_eq!(
            normalize_decision("Likely Ineligible due to X"),
            Decision::LikelyIneligible
        );
        assert_eq!(normalize_decision("ELIGIBLE"), Decision::Eligible);
        assert_eq!(
            normalize_decision("likely eligible, pending labs"),
            Decision::LikelyEligible
        );
        assert_eq!(normalize_decision(""), Decision::Unknown);
    }

    #[test]
    fn test_ineligible_checked_before_eligible() {
        assert_eq!(normalize_decision("Ineligible"), Decision::LikelyIneligible);
        assert_eq!(
            normalize_decision("not eligible, ineligible per exclusion 1"),
            Decision::LikelyIneligible
        );
    }

    #[test]
    fn test_unrecognized_labels_are_unknown() {
        assert_eq!(normalize_decision("unknown"), Decision::Unknown);
        assert_eq!(normalize_decision("need more info"), Decision::Unknown);
        // "likely" without the exact "likely eligible" phrase is not Eligible.
        assert_eq!(normalize_decision("eligible, likely"), Decision::Unknown);
    }

    #[test]
    fn test_decision_serializes_as_label() {
        let json = serde_json::to_string(&Decision::LikelyEligible).unwrap();
        assert_eq!(json, "\"Likely Eligible\"");
        assert_eq!(Decision::LikelyIneligible.to_string(), "Likely Ineligible");
    }

    #[test]
    fn test_coerce_consent() {
        assert!(coerce_consent(Some(&json!(true))));
        assert!(!coerce_consent(Some(&json!(false))));
        assert!(coerce_consent(Some(&json!(1))));
        assert!(coerce_consent(Some(&json!(0.5))));
        assert!(!coerce_consent(Some(&json!(0))));
        assert!(coerce_consent(Some(&json!(" Agreed "))));
        assert!(coerce_consent(Some(&json!("Y"))));
        assert!(!coerce_consent(Some(&json!("no"))));
        assert!(!coerce_consent(Some(&json!(["yes"]))));
        assert!(!coerce_consent(None));
    }
}
