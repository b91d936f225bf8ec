//! Prompt-injection detection.
//!
//! Scores raw submitted text against a fixed catalog of adversarial
//! patterns and decides block vs. allow-with-log. Detection is a pure
//! function of the text; the scoring/blocking policy is applied separately
//! so thresholds stay independently tunable (see
//! [`InjectionAssessment::assess`]).

mod assessment;
mod catalog;

pub use assessment::{
    InjectionAssessment, InjectionCategory, InjectionFinding, Severity,
};

use catalog::Catalog;
use tracing::warn;

use crate::config::DetectionConfig;

/// Detector combining the static pattern catalog with a threshold policy.
#[derive(Debug, Clone)]
pub struct InjectionDetector {
    config: DetectionConfig,
}

impl InjectionDetector {
    /// Creates a detector with the given thresholds.
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    /// Scans `text` and returns the full assessment.
    pub fn detect(&self, text: &str) -> InjectionAssessment {
        let findings = Catalog::shared().match_text(text);
        let assessment = InjectionAssessment::assess(findings, &self.config);

        if assessment.has_findings() {
            warn!(
                score = assessment.aggregate_score,
                severity = ?assessment.severity,
                blocked = assessment.should_block,
                categories = %assessment.category_names(),
                "injection patterns matched"
            );
        }

        assessment
    }
}

impl Default for InjectionDetector {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}
