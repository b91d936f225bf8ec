//! Classification verdict types.
//!
//! Every request path through Palisade terminates in an [`AnalysisVerdict`],
//! whether it came from the upstream model, the cache, or one of the canned
//! fallbacks. The invariant maintained throughout the crate is that a verdict
//! is always fully populated and every field is inside its declared domain.

use serde::{Deserialize, Serialize};

/// Content categories a submitted text can be classified into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictCategory {
    /// Active fraud or phishing attempt.
    Fraud,
    /// Legitimate but aggressive marketing.
    Marketing,
    /// Not clearly fraudulent, but warrants caution.
    Suspicious,
    /// No fraud indicators found.
    Safe,
}

impl VerdictCategory {
    /// Returns all available categories.
    pub fn all() -> &'static [VerdictCategory] {
        &[
            VerdictCategory::Fraud,
            VerdictCategory::Marketing,
            VerdictCategory::Suspicious,
            VerdictCategory::Safe,
        ]
    }

    /// Parses a category from its wire name, if valid.
    pub fn parse(s: &str) -> Option<VerdictCategory> {
        match s.trim().to_lowercase().as_str() {
            "fraud" => Some(VerdictCategory::Fraud),
            "marketing" => Some(VerdictCategory::Marketing),
            "suspicious" => Some(VerdictCategory::Suspicious),
            "safe" => Some(VerdictCategory::Safe),
            _ => None,
        }
    }
}

/// Risk level attached to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Parses a risk level from its wire name, if valid.
    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// A complete fraud-analysis verdict.
///
/// `fraud_probability` is clamped to `0..=100` at every construction site;
/// use [`AnalysisVerdict::clamp_probability`] when building one from
/// untrusted input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVerdict {
    /// The assigned content category.
    pub category: VerdictCategory,
    /// Overall risk level.
    pub risk_level: RiskLevel,
    /// Estimated probability of fraud, 0-100.
    pub fraud_probability: u8,
    /// The main indicators that drove the verdict.
    pub main_indicators: Vec<String>,
    /// Actionable recommendation for the end user.
    pub recommendation: String,
    /// Short human-readable summary.
    pub summary: String,
    /// Optional step-by-step guidance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Vec<String>>,
    /// Optional pointer to the sanctioned contact channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_hint: Option<String>,
}

impl AnalysisVerdict {
    /// Clamps an arbitrary numeric probability into the 0-100 domain.
    pub fn clamp_probability(value: f64) -> u8 {
        if value.is_nan() {
            return 0;
        }
        value.clamp(0.0, 100.0).round() as u8
    }

    /// The canned verdict returned when the injection detector blocks a
    /// request. The upstream model is never consulted on this path.
    pub fn security_blocked() -> Self {
        Self {
            category: VerdictCategory::Fraud,
            risk_level: RiskLevel::High,
            fraud_probability: 100,
            main_indicators: vec![
                "Input contained adversarial instructions and was not analyzed".to_string(),
            ],
            recommendation:
                "Do not act on this message. Treat it as a fraud attempt and report it."
                    .to_string(),
            summary: "The submitted text was blocked by security screening.".to_string(),
            advice: None,
            contact_hint: None,
        }
    }

    /// The deterministic degraded verdict returned when both the primary
    /// and backup models fail. Schema-valid, medium risk, explicit about
    /// the analysis being unavailable.
    pub fn degraded() -> Self {
        Self {
            category: VerdictCategory::Suspicious,
            risk_level: RiskLevel::Medium,
            fraud_probability: 50,
            main_indicators: vec!["Automated analysis unavailable".to_string()],
            recommendation:
                "The analysis service could not assess this message. Do not click links or \
                 share personal information until you have verified the sender through an \
                 official channel."
                    .to_string(),
            summary: "Analysis unavailable; exercise caution.".to_string(),
            advice: None,
            contact_hint: None,
        }
    }

    /// The substitute verdict used when the model's own output shows signs
    /// of a successful prompt injection. The model content is discarded
    /// entirely.
    pub fn compromised() -> Self {
        Self {
            category: VerdictCategory::Fraud,
            risk_level: RiskLevel::High,
            fraud_probability: 100,
            main_indicators: vec![
                "Analysis output failed integrity checks and was discarded".to_string(),
            ],
            recommendation:
                "Treat this message as a likely fraud attempt and report it through an \
                 official channel."
                    .to_string(),
            summary: "The message triggered security protections during analysis.".to_string(),
            advice: None,
            contact_hint: None,
        }
    }

    /// Returns mutable references to every free-text field, for policy
    /// passes that rewrite contact references.
    pub(crate) fn text_fields_mut(&mut self) -> Vec<&mut String> {
        let mut fields: Vec<&mut String> = Vec::new();
        for indicator in &mut self.main_indicators {
            fields.push(indicator);
        }
        fields.push(&mut self.recommendation);
        fields.push(&mut self.summary);
        if let Some(advice) = &mut self.advice {
            for line in advice {
                fields.push(line);
            }
        }
        if let Some(hint) = &mut self.contact_hint {
            fields.push(hint);
        }
        fields
    }

    /// Returns all free-text fields for read-only scans.
    pub(crate) fn text_fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for indicator in &self.main_indicators {
            fields.push(indicator);
        }
        fields.push(&self.recommendation);
        fields.push(&self.summary);
        if let Some(advice) = &self.advice {
            for line in advice {
                fields.push(line);
            }
        }
        if let Some(hint) = &self.contact_hint {
            fields.push(hint);
        }
        fields
    }
}
