//! Multi-tier sliding-window rate limiting.
//!
//! The [`RateGate`] keeps two admission logs: one global, one per identity.
//! Each log is a list of admission timestamps pruned to the 24-hour window.
//! A check counts timestamps inside the trailing minute, hour, and day
//! windows, evaluates global limits before per-identity limits, and within
//! each scope evaluates minute, then hour, then day. The first exhausted
//! tier denies the request; otherwise the timestamp is recorded in both
//! logs in the same critical section, so concurrent checks cannot admit
//! past a limit.
//!
//! ## Usage
//!
//! ```
//! use palisade_core::config::GateConfig;
//! use palisade_core::gate::RateGate;
//!
//! let gate = RateGate::new(GateConfig::default());
//! let decision = gate.check("session-abc");
//! assert!(decision.allowed);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::debug;

use crate::config::{GateConfig, TierLimits};

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Every Nth admission triggers an opportunistic sweep of stale timestamps.
const SWEEP_WRITE_STRIDE: u64 = 10;

/// The rate-limit tiers, in evaluation priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitTier {
    Minute,
    Hour,
    Day,
}

impl LimitTier {
    /// Wire name of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitTier::Minute => "minute",
            LimitTier::Hour => "hour",
            LimitTier::Day => "day",
        }
    }
}

/// Which scope a violation was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitScope {
    Global,
    Identity,
}

/// Remaining capacity per tier for the checked identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub minute: usize,
    pub hour: usize,
    pub day: usize,
}

/// Seconds until each window next frees capacity for the checked identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierResets {
    pub minute: u64,
    pub hour: u64,
    pub day: u64,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Serialize)]
pub struct LimitDecision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Remaining per-identity capacity after this check.
    pub remaining: TierCounts,
    /// Seconds until each per-identity window frees a slot.
    pub reset_after: TierResets,
    /// The tier that denied the request, if any.
    pub violated: Option<LimitTier>,
    /// The scope the violated tier belongs to, if any.
    pub scope: Option<LimitScope>,
}

impl LimitDecision {
    /// Seconds the caller should wait before retrying, derived from the
    /// violated tier's window. Zero for admitted requests.
    pub fn retry_after_secs(&self) -> u64 {
        match self.violated {
            Some(LimitTier::Minute) => self.reset_after.minute.max(1),
            Some(LimitTier::Hour) => self.reset_after.hour.max(1),
            Some(LimitTier::Day) => self.reset_after.day.max(1),
            None => 0,
        }
    }
}

/// Per-window admission counts plus the oldest timestamp inside each
/// window (used to compute when capacity frees up).
#[derive(Debug, Clone, Copy, Default)]
struct WindowStats {
    minute: usize,
    hour: usize,
    day: usize,
    oldest_minute: Option<Instant>,
    oldest_hour: Option<Instant>,
    oldest_day: Option<Instant>,
}

impl WindowStats {
    fn from_log(log: &[Instant], now: Instant) -> Self {
        let mut stats = WindowStats::default();
        for &ts in log {
            let age = now.saturating_duration_since(ts);
            if age < DAY {
                stats.day += 1;
                stats.oldest_day = Some(stats.oldest_day.map_or(ts, |o| o.min(ts)));
                if age < HOUR {
                    stats.hour += 1;
                    stats.oldest_hour = Some(stats.oldest_hour.map_or(ts, |o| o.min(ts)));
                    if age < MINUTE {
                        stats.minute += 1;
                        stats.oldest_minute = Some(stats.oldest_minute.map_or(ts, |o| o.min(ts)));
                    }
                }
            }
        }
        stats
    }

    /// Returns the first tier whose count has reached its limit, in
    /// minute/hour/day priority order.
    fn first_violation(&self, limits: &TierLimits) -> Option<LimitTier> {
        if self.minute >= limits.minute {
            Some(LimitTier::Minute)
        } else if self.hour >= limits.hour {
            Some(LimitTier::Hour)
        } else if self.day >= limits.day {
            Some(LimitTier::Day)
        } else {
            None
        }
    }

    fn remaining(&self, limits: &TierLimits) -> TierCounts {
        TierCounts {
            minute: limits.minute.saturating_sub(self.minute),
            hour: limits.hour.saturating_sub(self.hour),
            day: limits.day.saturating_sub(self.day),
        }
    }

    fn resets(&self, now: Instant) -> TierResets {
        let until = |oldest: Option<Instant>, window: Duration| -> u64 {
            oldest
                .map(|ts| (ts + window).saturating_duration_since(now).as_secs())
                .unwrap_or(0)
        };
        TierResets {
            minute: until(self.oldest_minute, MINUTE),
            hour: until(self.oldest_hour, HOUR),
            day: until(self.oldest_day, DAY),
        }
    }
}

#[derive(Debug)]
struct GateInner {
    global: Vec<Instant>,
    identities: HashMap<String, Vec<Instant>>,
    writes: u64,
    last_sweep: Instant,
}

/// Sliding-window rate limiter over a global log and per-identity logs.
///
/// The gate never fails: any string, including the empty string, is a legal
/// identity key. Check-then-record runs under a single lock acquisition.
#[derive(Debug)]
pub struct RateGate {
    config: GateConfig,
    inner: Mutex<GateInner>,
}

impl RateGate {
    /// Creates a gate with the given configuration.
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(GateInner {
                global: Vec::new(),
                identities: HashMap::new(),
                writes: 0,
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Checks whether a request from `identity` may be admitted, recording
    /// the admission on success.
    pub fn check(&self, identity: &str) -> LimitDecision {
        let now = Instant::now();
        let mut inner = self.inner.lock().unwrap();

        if now.saturating_duration_since(inner.last_sweep) >= self.config.sweep_interval {
            Self::sweep_locked(&mut inner, now);
        }

        let identity_stats = inner
            .identities
            .get(identity)
            .map(|log| WindowStats::from_log(log, now))
            .unwrap_or_default();

        // Global limits are evaluated before per-identity limits.
        let global_stats = WindowStats::from_log(&inner.global, now);
        if let Some(tier) = global_stats.first_violation(&self.config.global) {
            debug!(tier = tier.as_str(), "global rate limit reached");
            return LimitDecision {
                allowed: false,
                remaining: identity_stats.remaining(&self.config.identity),
                reset_after: global_stats.resets(now),
                violated: Some(tier),
                scope: Some(LimitScope::Global),
            };
        }

        if let Some(tier) = identity_stats.first_violation(&self.config.identity) {
            debug!(tier = tier.as_str(), "identity rate limit reached");
            return LimitDecision {
                allowed: false,
                remaining: identity_stats.remaining(&self.config.identity),
                reset_after: identity_stats.resets(now),
                violated: Some(tier),
                scope: Some(LimitScope::Identity),
            };
        }

        // Admitted: record in both logs before releasing the lock.
        inner.global.push(now);
        inner
            .identities
            .entry(identity.to_string())
            .or_default()
            .push(now);
        inner.writes += 1;

        if inner.writes % SWEEP_WRITE_STRIDE == 0 {
            Self::sweep_locked(&mut inner, now);
        }

        // Post-admission remaining counts (the new timestamp included).
        let limits = &self.config.identity;
        LimitDecision {
            allowed: true,
            remaining: TierCounts {
                minute: limits.minute.saturating_sub(identity_stats.minute + 1),
                hour: limits.hour.saturating_sub(identity_stats.hour + 1),
                day: limits.day.saturating_sub(identity_stats.day + 1),
            },
            reset_after: identity_stats.resets(now),
            violated: None,
            scope: None,
        }
    }

    /// Removes timestamps older than 24 hours and drops identities whose
    /// logs become empty.
    pub fn sweep(&self) {
        let mut inner = self.inner.lock().unwrap();
        Self::sweep_locked(&mut inner, Instant::now());
    }

    fn sweep_locked(inner: &mut GateInner, now: Instant) {
        inner
            .global
            .retain(|&ts| now.saturating_duration_since(ts) < DAY);
        inner.identities.retain(|_, log| {
            log.retain(|&ts| now.saturating_duration_since(ts) < DAY);
            !log.is_empty()
        });
        inner.last_sweep = now;
    }

    /// Number of identities currently tracked.
    pub fn tracked_identities(&self) -> usize {
        self.inner.lock().unwrap().identities.len()
    }

    /// Total admissions recorded in the trailing 24 hours.
    pub fn admissions_today(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner
            .global
            .iter()
            .filter(|&&ts| now.saturating_duration_since(ts) < DAY)
            .count()
    }

    /// Returns a future that sweeps stale timestamps at the configured
    /// interval; spawn it as a background task.
    pub fn start_sweeping(self: Arc<Self>) -> impl std::future::Future<Output = ()> + Send {
        let gate = self;
        async move {
            let interval = gate.config.sweep_interval;
            loop {
                tokio::time::sleep(interval).await;
                gate.sweep();
            }
        }
    }
}
