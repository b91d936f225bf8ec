//! Structured security event logging.
//!
//! Every noteworthy security decision (injection detected, request
//! blocked, validation failure, ...) is recorded as a [`SecurityEvent`].
//! The sink keeps a bounded in-memory ring for the events endpoint, holds
//! per-kind counters for stats, and mirrors each event through `tracing`
//! so operators see them in the logs regardless of the ring bound.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Default number of events retained in memory.
pub const DEFAULT_EVENT_CAPACITY: usize = 1_000;

/// Kinds of security events Palisade emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Injection patterns matched (request may still proceed).
    InjectionDetected,
    /// A request was blocked before reaching the model.
    RequestBlocked,
    /// A request was denied by the rate gate.
    RateLimited,
    /// Sanitization altered the input.
    SanitizationApplied,
    /// Model output violated the response schema or contact policy.
    ValidationFailure,
    /// Model output was discarded as compromised.
    CompromisedResponse,
    /// The upstream service failed and a degraded verdict was served.
    UpstreamFailure,
    /// The backup model produced the served verdict.
    BackupModelUsed,
}

impl SecurityEventKind {
    /// Whether this kind indicates a blocked or discarded request (logged
    /// at warn level).
    fn is_blocking(&self) -> bool {
        matches!(
            self,
            SecurityEventKind::RequestBlocked
                | SecurityEventKind::RateLimited
                | SecurityEventKind::CompromisedResponse
        )
    }
}

/// One recorded security event.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    /// Identity the event is attributed to.
    pub identity: String,
    /// Free-form detail (matched categories, violated tier, ...).
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SinkInner {
    ring: VecDeque<SecurityEvent>,
    counts: HashMap<SecurityEventKind, u64>,
}

/// Bounded in-memory security event sink.
#[derive(Debug)]
pub struct SecurityEventSink {
    capacity: usize,
    inner: Mutex<SinkInner>,
}

impl SecurityEventSink {
    /// Creates a sink with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a sink retaining at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(SinkInner::default()),
        }
    }

    /// Records an event and mirrors it through tracing.
    pub fn record(&self, kind: SecurityEventKind, identity: &str, detail: impl Into<String>) {
        let detail = detail.into();

        if kind.is_blocking() {
            warn!(kind = ?kind, identity, %detail, "security event");
        } else {
            info!(kind = ?kind, identity, %detail, "security event");
        }

        let mut inner = self.inner.lock().unwrap();
        *inner.counts.entry(kind).or_insert(0) += 1;
        inner.ring.push_back(SecurityEvent {
            kind,
            identity: identity.to_string(),
            detail,
            created_at: Utc::now(),
        });
        while inner.ring.len() > self.capacity {
            inner.ring.pop_front();
        }
    }

    /// The most recent events, newest last, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let inner = self.inner.lock().unwrap();
        let skip = inner.ring.len().saturating_sub(limit);
        inner.ring.iter().skip(skip).cloned().collect()
    }

    /// Per-kind event counts since startup.
    pub fn counts(&self) -> HashMap<SecurityEventKind, u64> {
        self.inner.lock().unwrap().counts.clone()
    }

    /// Count for a single kind.
    pub fn count(&self, kind: SecurityEventKind) -> u64 {
        self.inner
            .lock()
            .unwrap()
            .counts
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Drops all retained events and counters.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.ring.clear();
        inner.counts.clear();
    }
}

impl Default for SecurityEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_returns_events() {
        let sink = SecurityEventSink::new();
        sink.record(SecurityEventKind::InjectionDetected, "u1", "jailbreak");
        sink.record(SecurityEventKind::RequestBlocked, "u1", "score 85");

        let events = sink.recent(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, SecurityEventKind::InjectionDetected);
        assert_eq!(events[1].kind, SecurityEventKind::RequestBlocked);
        assert_eq!(events[1].identity, "u1");
    }

    #[test]
    fn ring_is_bounded() {
        let sink = SecurityEventSink::with_capacity(3);
        for i in 0..5 {
            sink.record(SecurityEventKind::RateLimited, "u", format!("event {i}"));
        }

        let events = sink.recent(10);
        assert_eq!(events.len(), 3);
        // Oldest events were dropped.
        assert_eq!(events[0].detail, "event 2");
    }

    #[test]
    fn counts_survive_ring_eviction() {
        let sink = SecurityEventSink::with_capacity(2);
        for _ in 0..10 {
            sink.record(SecurityEventKind::ValidationFailure, "u", "bad schema");
        }

        assert_eq!(sink.count(SecurityEventKind::ValidationFailure), 10);
        assert_eq!(sink.recent(100).len(), 2);
    }

    #[test]
    fn recent_respects_the_limit() {
        let sink = SecurityEventSink::new();
        for i in 0..5 {
            sink.record(SecurityEventKind::BackupModelUsed, "u", format!("{i}"));
        }

        let events = sink.recent(2);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].detail, "3");
        assert_eq!(events[1].detail, "4");
    }

    #[test]
    fn clear_resets_everything() {
        let sink = SecurityEventSink::new();
        sink.record(SecurityEventKind::UpstreamFailure, "u", "timeout");
        sink.clear();

        assert!(sink.recent(10).is_empty());
        assert_eq!(sink.count(SecurityEventKind::UpstreamFailure), 0);
    }
}
