//! API request and response models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use palisade_core::audit::{SecurityEvent, SecurityEventKind};
use palisade_core::cache::CacheStats;
use palisade_core::pipeline::{AnalyzeOutcome, SecurityChecks};
use palisade_core::verdict::AnalysisVerdict;
use serde::{Deserialize, Serialize};

/// Request body for POST /api/analyze.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// The text to analyze.
    pub text: String,
    /// Optional model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Caller hint that the text lacks surrounding context.
    #[serde(default)]
    pub has_minimal_context: Option<bool>,
}

/// Response body for POST /api/analyze: the verdict plus request metadata.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    #[serde(flatten)]
    pub verdict: AnalysisVerdict,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_model: Option<String>,
    pub security_block: bool,
    pub fallback: bool,
    pub backup_model_used: bool,
    pub cached: bool,
    pub security_checks: SecurityChecks,
}

impl From<AnalyzeOutcome> for AnalyzeResponse {
    fn from(outcome: AnalyzeOutcome) -> Self {
        Self {
            verdict: outcome.verdict,
            request_id: outcome.request_id,
            used_model: outcome.used_model,
            security_block: outcome.security_block,
            fallback: outcome.fallback,
            backup_model_used: outcome.backup_model_used,
            cached: outcome.cached,
            security_checks: outcome.checks,
        }
    }
}

/// Response body for GET /api/stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Identities with activity inside the 24h window.
    pub identities_tracked: usize,
    /// Admissions recorded in the trailing 24 hours.
    pub admissions_today: usize,
    /// Cache counters.
    pub cache: CacheStats,
    /// Security event counts per kind.
    pub events: HashMap<SecurityEventKind, u64>,
}

/// Query parameters for GET /api/events.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Maximum number of events to return (default: 50).
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

fn default_event_limit() -> usize {
    50
}

/// Response body for GET /api/events.
#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<SecurityEvent>,
    pub generated_at: DateTime<Utc>,
}

/// Response body for GET /api/health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub primary_model: String,
    pub backup_model: String,
}
