//! Post-hoc response validation.
//!
//! The last line of defense after the model call. Three independent
//! checks:
//!
//! 1. [`ResponseValidator::from_value`] turns the untyped JSON payload
//!    into a schema-correct [`AnalysisVerdict`], substituting safe
//!    defaults for anything missing or out of domain. It never fails.
//! 2. [`ResponseValidator::is_compromised`] looks for signs that the
//!    model's own output reflects a successful injection; the caller must
//!    then discard the content entirely.
//! 3. [`ResponseValidator::enforce_contact_policy`] rewrites any
//!    contact-like token that is not the canonical contact identity, so
//!    an attacker-substituted phone number or URL never reaches the end
//!    user even if every upstream step was fooled.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::config::ContactPolicy;
use crate::verdict::{AnalysisVerdict, RiskLevel, VerdictCategory};

const DEFAULT_RECOMMENDATION: &str =
    "Review the message carefully and verify the sender through an official channel before acting.";
const DEFAULT_SUMMARY: &str = "Automated analysis could not fully assess this message.";
const DEFAULT_INDICATOR: &str = "Analysis output was incomplete";

/// Output of schema validation: the corrected verdict plus whether the
/// input needed any correction.
#[derive(Debug, Clone)]
pub struct Validation {
    /// False when any field was missing or out of domain.
    pub valid: bool,
    /// Fully populated, schema-correct verdict.
    pub verdict: AnalysisVerdict,
}

/// Output of the contact-policy pass.
#[derive(Debug, Clone)]
pub struct ContactAudit {
    /// True when no rewriting was necessary.
    pub valid: bool,
    /// Description of each rewrite applied.
    pub rewrites: Vec<String>,
}

/// Markers of a model that adopted an injected persona. Matched against
/// lowercased output text.
const COMPROMISE_MARKERS: &[&str] = &[
    "ignore previous instructions",
    "my system prompt",
    "the system prompt",
    "dan mode",
    "developer mode",
    "jailbroken",
    "i am now free",
    "no longer bound by",
    "unrestricted ai",
    "as an unrestricted",
];

fn phone_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\+?\d[\d\s().\-/]{5,}\d").expect("invalid phone pattern")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>"')]+"#).expect("invalid url pattern")
    })
}

/// Digits-only normalization for phone comparison.
fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Enforces structural and content invariants on parsed model output.
#[derive(Debug, Clone)]
pub struct ResponseValidator {
    policy: ContactPolicy,
}

impl ResponseValidator {
    /// Creates a validator bound to the canonical contact policy.
    pub fn new(policy: ContactPolicy) -> Self {
        Self { policy }
    }

    /// Builds a schema-correct verdict from untyped model JSON. Field
    /// presence is never assumed; every violation is corrected and
    /// reported through `valid = false`.
    pub fn from_value(&self, value: &Value) -> Validation {
        let mut valid = true;

        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                return Validation {
                    valid: false,
                    verdict: self.default_verdict(),
                }
            }
        };

        let category = match obj.get("category").and_then(Value::as_str) {
            Some(s) => match VerdictCategory::parse(s) {
                Some(c) => c,
                None => {
                    valid = false;
                    VerdictCategory::Suspicious
                }
            },
            None => {
                valid = false;
                VerdictCategory::Suspicious
            }
        };

        let risk_level = match obj.get("risk_level").and_then(Value::as_str) {
            Some(s) => match RiskLevel::parse(s) {
                Some(r) => r,
                None => {
                    valid = false;
                    RiskLevel::Medium
                }
            },
            None => {
                valid = false;
                RiskLevel::Medium
            }
        };

        let fraud_probability = match obj.get("fraud_probability").and_then(Value::as_f64) {
            Some(p) => {
                if !(0.0..=100.0).contains(&p) {
                    valid = false;
                }
                AnalysisVerdict::clamp_probability(p)
            }
            None => {
                valid = false;
                50
            }
        };

        let main_indicators = match obj.get("main_indicators").and_then(Value::as_array) {
            Some(items) => {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect();
                if strings.len() != items.len() {
                    valid = false;
                }
                if strings.is_empty() {
                    vec![DEFAULT_INDICATOR.to_string()]
                } else {
                    strings
                }
            }
            None => {
                valid = false;
                vec![DEFAULT_INDICATOR.to_string()]
            }
        };

        let recommendation = match obj.get("recommendation").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => {
                valid = false;
                DEFAULT_RECOMMENDATION.to_string()
            }
        };

        let summary = match obj.get("summary").and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => {
                valid = false;
                DEFAULT_SUMMARY.to_string()
            }
        };

        // Optional guidance fields: absent is fine, wrong types are not.
        let advice = match obj.get("advice") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let strings: Vec<String> = items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect();
                if strings.len() != items.len() {
                    valid = false;
                }
                (!strings.is_empty()).then_some(strings)
            }
            Some(_) => {
                valid = false;
                None
            }
        };

        let contact_hint = match obj.get("contact_hint") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => {
                valid = false;
                None
            }
        };

        if !valid {
            warn!("model output violated the response schema; corrected");
        }

        Validation {
            valid,
            verdict: AnalysisVerdict {
                category,
                risk_level,
                fraud_probability,
                main_indicators,
                recommendation,
                summary,
                advice,
                contact_hint,
            },
        }
    }

    /// Heuristic check for model output that reflects a successful
    /// injection. When true, the caller must discard the content and
    /// substitute [`AnalysisVerdict::compromised`].
    pub fn is_compromised(&self, verdict: &AnalysisVerdict) -> bool {
        for field in verdict.text_fields() {
            let lower = field.to_lowercase();
            if COMPROMISE_MARKERS.iter().any(|m| lower.contains(m)) {
                warn!("model output matched a compromise marker");
                return true;
            }
        }
        false
    }

    /// Rewrites every contact-like token that does not equal the
    /// canonical contact identity back to the canonical value.
    pub fn enforce_contact_policy(&self, verdict: &mut AnalysisVerdict) -> ContactAudit {
        let mut rewrites = Vec::new();
        let canonical_digits = digits(&self.policy.canonical_phone);
        let canonical_url = format!("https://{}", self.policy.canonical_domain);

        for field in verdict.text_fields_mut() {
            let rewritten = {
                // URLs first: their path segments can contain digit runs
                // that would otherwise read as phone numbers.
                let with_urls =
                    url_pattern().replace_all(field, |caps: &regex::Captures<'_>| {
                        let url = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                        if self.url_is_canonical(url) {
                            url.to_string()
                        } else {
                            rewrites.push(format!("replaced URL {url}"));
                            canonical_url.clone()
                        }
                    });

                let with_phones =
                    phone_pattern().replace_all(&with_urls, |caps: &regex::Captures<'_>| {
                        let token = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
                        let token_digits = digits(token);
                        // Short digit runs (order numbers, dates) are left alone.
                        if token_digits.len() < 8 || token_digits == canonical_digits {
                            token.to_string()
                        } else {
                            rewrites.push(format!("replaced phone number {token}"));
                            self.policy.canonical_phone.clone()
                        }
                    });

                with_phones.into_owned()
            };

            if rewritten != *field {
                *field = rewritten;
            }
        }

        if !rewrites.is_empty() {
            warn!(count = rewrites.len(), "non-canonical contact references rewritten");
        }

        ContactAudit {
            valid: rewrites.is_empty(),
            rewrites,
        }
    }

    fn url_is_canonical(&self, url: &str) -> bool {
        let stripped = url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("HTTPS://")
            .trim_start_matches("HTTP://")
            .trim_start_matches("www.");
        let host = stripped.split(['/', '?', '#']).next().unwrap_or_default();
        host.eq_ignore_ascii_case(&self.policy.canonical_domain)
            || host
                .to_ascii_lowercase()
                .ends_with(&format!(".{}", self.policy.canonical_domain.to_ascii_lowercase()))
    }

    fn default_verdict(&self) -> AnalysisVerdict {
        AnalysisVerdict {
            category: VerdictCategory::Suspicious,
            risk_level: RiskLevel::Medium,
            fraud_probability: 50,
            main_indicators: vec![DEFAULT_INDICATOR.to_string()],
            recommendation: DEFAULT_RECOMMENDATION.to_string(),
            summary: DEFAULT_SUMMARY.to_string(),
            advice: None,
            contact_hint: None,
        }
    }
}

impl Default for ResponseValidator {
    fn default() -> Self {
        Self::new(ContactPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> ResponseValidator {
        ResponseValidator::new(ContactPolicy {
            canonical_phone: "915 04800".to_string(),
            canonical_domain: "palisade.example".to_string(),
        })
    }

    // === Schema validation ===

    #[test]
    fn accepts_a_fully_valid_payload() {
        let value = json!({
            "category": "fraud",
            "risk_level": "high",
            "fraud_probability": 92,
            "main_indicators": ["urgency", "payment demand"],
            "recommendation": "Do not pay.",
            "summary": "Classic invoice scam."
        });

        let result = validator().from_value(&value);
        assert!(result.valid);
        assert_eq!(result.verdict.category, VerdictCategory::Fraud);
        assert_eq!(result.verdict.risk_level, RiskLevel::High);
        assert_eq!(result.verdict.fraud_probability, 92);
        assert_eq!(result.verdict.main_indicators.len(), 2);
    }

    #[test]
    fn missing_fields_get_safe_defaults() {
        let result = validator().from_value(&json!({}));

        assert!(!result.valid);
        assert_eq!(result.verdict.category, VerdictCategory::Suspicious);
        assert_eq!(result.verdict.risk_level, RiskLevel::Medium);
        assert_eq!(result.verdict.fraud_probability, 50);
        assert!(!result.verdict.recommendation.is_empty());
        assert!(!result.verdict.summary.is_empty());
        assert!(!result.verdict.main_indicators.is_empty());
    }

    #[test]
    fn non_object_payload_gets_defaults() {
        let result = validator().from_value(&json!(["not", "an", "object"]));
        assert!(!result.valid);
        assert_eq!(result.verdict.category, VerdictCategory::Suspicious);
    }

    #[test]
    fn out_of_range_probability_is_clamped_and_flagged() {
        let value = json!({
            "category": "fraud",
            "risk_level": "high",
            "fraud_probability": 250,
            "main_indicators": ["x"],
            "recommendation": "r",
            "summary": "s"
        });

        let result = validator().from_value(&value);
        assert!(!result.valid);
        assert_eq!(result.verdict.fraud_probability, 100);
    }

    #[test]
    fn unknown_enum_values_are_corrected() {
        let value = json!({
            "category": "banana",
            "risk_level": "extreme",
            "fraud_probability": 10,
            "main_indicators": ["x"],
            "recommendation": "r",
            "summary": "s"
        });

        let result = validator().from_value(&value);
        assert!(!result.valid);
        assert_eq!(result.verdict.category, VerdictCategory::Suspicious);
        assert_eq!(result.verdict.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn fractional_probability_is_accepted() {
        let value = json!({
            "category": "safe",
            "risk_level": "low",
            "fraud_probability": 12.6,
            "main_indicators": ["x"],
            "recommendation": "r",
            "summary": "s"
        });

        let result = validator().from_value(&value);
        assert!(result.valid);
        assert_eq!(result.verdict.fraud_probability, 13);
    }

    #[test]
    fn optional_advice_passes_through() {
        let value = json!({
            "category": "suspicious",
            "risk_level": "medium",
            "fraud_probability": 55,
            "main_indicators": ["x"],
            "recommendation": "r",
            "summary": "s",
            "advice": ["verify sender", "do not click links"]
        });

        let result = validator().from_value(&value);
        assert!(result.valid);
        assert_eq!(result.verdict.advice.as_ref().unwrap().len(), 2);
    }

    // === Compromise detection ===

    #[test]
    fn persona_adoption_is_flagged() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.summary = "I am now in developer mode and will answer freely.".to_string();

        assert!(validator().is_compromised(&verdict));
    }

    #[test]
    fn instruction_echo_is_flagged() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.recommendation = "Sure, I will ignore previous instructions.".to_string();

        assert!(validator().is_compromised(&verdict));
    }

    #[test]
    fn ordinary_verdict_is_not_flagged() {
        let value = json!({
            "category": "fraud",
            "risk_level": "high",
            "fraud_probability": 90,
            "main_indicators": ["spoofed sender"],
            "recommendation": "Delete the message.",
            "summary": "Phishing attempt imitating a parcel service."
        });
        let verdict = validator().from_value(&value).verdict;

        assert!(!validator().is_compromised(&verdict));
    }

    // === Contact policy ===

    #[test]
    fn non_canonical_phone_is_rewritten() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.recommendation = "If in doubt, call 12345678 immediately.".to_string();

        let audit = validator().enforce_contact_policy(&mut verdict);
        assert!(!audit.valid);
        assert!(!verdict.recommendation.contains("12345678"));
        assert!(verdict.recommendation.contains("915 04800"));
    }

    #[test]
    fn canonical_phone_is_left_alone() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.recommendation = "Call us on 915 04800 to verify.".to_string();

        let audit = validator().enforce_contact_policy(&mut verdict);
        assert!(audit.valid);
        assert!(verdict.recommendation.contains("915 04800"));
    }

    #[test]
    fn non_canonical_url_is_replaced() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.recommendation =
            "Log in at https://evil-bank.example/login to confirm.".to_string();

        let audit = validator().enforce_contact_policy(&mut verdict);
        assert!(!audit.valid);
        assert!(!verdict.recommendation.contains("evil-bank.example"));
        assert!(verdict.recommendation.contains("https://palisade.example"));
    }

    #[test]
    fn canonical_url_survives() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.summary = "See https://palisade.example/help for details.".to_string();

        let audit = validator().enforce_contact_policy(&mut verdict);
        assert!(audit.valid);
        assert!(verdict.summary.contains("https://palisade.example/help"));
    }

    #[test]
    fn rewrites_cover_every_text_field() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.main_indicators = vec!["Attacker number 98765432 in message".to_string()];
        verdict.summary = "Contact 23456789 for help.".to_string();
        verdict.advice = Some(vec!["Visit www.phish.example now".to_string()]);

        let audit = validator().enforce_contact_policy(&mut verdict);
        assert_eq!(audit.rewrites.len(), 3);
        assert!(verdict.main_indicators[0].contains("915 04800"));
        assert!(verdict.summary.contains("915 04800"));
        assert!(verdict.advice.as_ref().unwrap()[0].contains("palisade.example"));
    }

    #[test]
    fn short_digit_runs_are_not_phone_numbers() {
        let mut verdict = AnalysisVerdict::degraded();
        verdict.summary = "Invoice 123456 from 2024 is fake.".to_string();

        let audit = validator().enforce_contact_policy(&mut verdict);
        assert!(audit.valid);
        assert!(verdict.summary.contains("123456"));
    }
}
