//! Configuration for the analysis pipeline.
//!
//! All knobs recognized by Palisade live here: rate-limit tiers, cache
//! bounds, detection thresholds, model identifiers, and the canonical
//! contact policy. Every struct has sensible defaults so tests and the
//! application binary can start from `PipelineConfig::default()` and
//! override only what they need.

use std::time::Duration;

/// Per-tier request limits for one rate-limiting scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Maximum requests per trailing minute.
    pub minute: usize,
    /// Maximum requests per trailing hour.
    pub hour: usize,
    /// Maximum requests per trailing day.
    pub day: usize,
}

/// Rate-gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Limits applied to each individual identity.
    pub identity: TierLimits,
    /// Limits applied across all identities combined.
    pub global: TierLimits,
    /// Interval between background sweeps of stale timestamps.
    pub sweep_interval: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            identity: TierLimits {
                minute: 10,
                hour: 60,
                day: 200,
            },
            global: TierLimits {
                minute: 100,
                hour: 2_000,
                day: 10_000,
            },
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Response-cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry stays valid after being stored.
    pub ttl: Duration,
    /// Maximum number of entries kept; oldest entries are evicted beyond
    /// this bound.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 100,
        }
    }
}

/// Injection-detection thresholds.
///
/// The aggregate score is a weight sum capped at 100; the thresholds below
/// map score ranges onto severity tiers. They are tunables, not contract.
#[derive(Debug, Clone, Copy)]
pub struct DetectionConfig {
    /// Minimum score for `Severity::Low`.
    pub low_threshold: u8,
    /// Minimum score for `Severity::Medium`.
    pub medium_threshold: u8,
    /// Minimum score for `Severity::High`.
    pub high_threshold: u8,
    /// Minimum score for `Severity::Critical`.
    pub critical_threshold: u8,
    /// Score at or above which the request is blocked outright.
    pub block_threshold: u8,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            low_threshold: 10,
            medium_threshold: 30,
            high_threshold: 60,
            critical_threshold: 85,
            block_threshold: 60,
        }
    }
}

/// Input-sanitizer configuration.
#[derive(Debug, Clone, Copy)]
pub struct SanitizerConfig {
    /// Maximum accepted input length in characters; longer inputs are
    /// truncated with a warning.
    pub max_input_chars: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 6_000,
        }
    }
}

/// Model-orchestration configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Identifier of the primary classification model.
    pub primary_model: String,
    /// Identifier of the backup model tried when the primary fails.
    pub backup_model: String,
    /// Per-attempt timeout for the upstream call.
    pub request_timeout: Duration,
    /// Sampling temperature sent upstream.
    pub temperature: f32,
    /// Token budget sent upstream.
    pub max_tokens: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o-mini".to_string(),
            backup_model: "gpt-3.5-turbo".to_string(),
            request_timeout: Duration::from_secs(12),
            temperature: 0.1,
            max_tokens: 1_024,
        }
    }
}

/// The single sanctioned contact identity Palisade is permitted to surface
/// to end users. Any other phone number or URL appearing in a verdict is
/// rewritten to these values.
#[derive(Debug, Clone)]
pub struct ContactPolicy {
    /// Canonical support phone number.
    pub canonical_phone: String,
    /// Canonical web domain.
    pub canonical_domain: String,
}

impl Default for ContactPolicy {
    fn default() -> Self {
        Self {
            canonical_phone: "915 04800".to_string(),
            canonical_domain: "palisade.example".to_string(),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub gate: GateConfig,
    pub cache: CacheConfig,
    pub detection: DetectionConfig,
    pub sanitizer: SanitizerConfig,
    pub orchestrator: OrchestratorConfig,
    pub contact: ContactPolicy,
}
