//! Injection finding and assessment types.

use serde::Serialize;

use crate::config::DetectionConfig;

/// Adversarial pattern categories recognized by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    /// Attempts to reassign the model's persona.
    RoleSwitch,
    /// Attempts to override or cancel standing instructions.
    InstructionOverride,
    /// Attempts to extract the governing prompt.
    PromptExtraction,
    /// Delimiter or role-marker content trying to escape the user region.
    ContextEscape,
    /// Known jailbreak phrasing.
    Jailbreak,
    /// Text claiming to originate from the protected organization.
    Impersonation,
    /// Embedded executable or script payloads.
    ScriptPayload,
}

impl InjectionCategory {
    /// Human-readable name of the category.
    pub fn name(&self) -> &'static str {
        match self {
            InjectionCategory::RoleSwitch => "role switch",
            InjectionCategory::InstructionOverride => "instruction override",
            InjectionCategory::PromptExtraction => "prompt extraction",
            InjectionCategory::ContextEscape => "context escape",
            InjectionCategory::Jailbreak => "jailbreak",
            InjectionCategory::Impersonation => "impersonation",
            InjectionCategory::ScriptPayload => "script payload",
        }
    }

    /// High-confidence categories that block regardless of the aggregate
    /// score.
    pub fn forces_block(&self) -> bool {
        matches!(
            self,
            InjectionCategory::ScriptPayload | InjectionCategory::Impersonation
        )
    }
}

/// A single matched adversarial pattern.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InjectionFinding {
    /// The matched category.
    pub category: InjectionCategory,
    /// The text span that matched.
    pub matched_span: String,
    /// Category weight contributing to the aggregate score.
    pub weight: u8,
}

/// Severity tier derived from the aggregate score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Maps an aggregate score onto a severity tier using the configured
    /// thresholds.
    pub fn from_score(score: u8, config: &DetectionConfig) -> Severity {
        if score >= config.critical_threshold {
            Severity::Critical
        } else if score >= config.high_threshold {
            Severity::High
        } else if score >= config.medium_threshold {
            Severity::Medium
        } else if score >= config.low_threshold {
            Severity::Low
        } else {
            Severity::None
        }
    }
}

/// The full result of an injection scan, consumed immediately by the
/// pipeline and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct InjectionAssessment {
    /// All matched patterns, at most one per category.
    pub findings: Vec<InjectionFinding>,
    /// Sum of matched weights, capped at 100.
    pub aggregate_score: u8,
    /// Severity tier derived from the score.
    pub severity: Severity,
    /// Whether the request must be blocked before reaching the model.
    pub should_block: bool,
}

impl InjectionAssessment {
    /// Applies the scoring and blocking policy to a set of findings.
    ///
    /// The policy is deliberately separate from pattern matching so that
    /// thresholds can be tuned and tested on synthetic findings.
    pub fn assess(findings: Vec<InjectionFinding>, config: &DetectionConfig) -> Self {
        let sum: u32 = findings.iter().map(|f| u32::from(f.weight)).sum();
        let aggregate_score = sum.min(100) as u8;
        let severity = Severity::from_score(aggregate_score, config);
        let forced = findings.iter().any(|f| f.category.forces_block());
        let should_block = forced || aggregate_score >= config.block_threshold;

        Self {
            findings,
            aggregate_score,
            severity,
            should_block,
        }
    }

    /// Returns true when any pattern matched.
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }

    /// Returns true when a specific category matched.
    pub fn has_category(&self, category: InjectionCategory) -> bool {
        self.findings.iter().any(|f| f.category == category)
    }

    /// Comma-separated category names, for audit detail strings.
    pub fn category_names(&self) -> String {
        self.findings
            .iter()
            .map(|f| f.category.name())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
