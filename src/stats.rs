//! Process-wide recovery counters.
//!
//! Counters are monotonic and only ever read for diagnostics; nothing in the
//! coordinator branches on them. They are atomics so collaborators can read
//! them without going through the coordinator.
//!
//! `consecutive_failures` is tracked for diagnostics only and does not drive
//! any further escalation.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel for "no success recorded yet".
const NO_TIMESTAMP: i64 = i64::MIN;

/// Live counters shared between the coordinator and its handles.
#[derive(Debug)]
pub struct RecoveryStats {
    triggers: AtomicU64,
    merged: AtomicU64,
    skipped: AtomicU64,
    soft: AtomicU64,
    hard: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success_at_ms: AtomicI64,
}

impl Default for RecoveryStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryStats {
    pub fn new() -> Self {
        RecoveryStats {
            triggers: AtomicU64::new(0),
            merged: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            soft: AtomicU64::new(0),
            hard: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success_at_ms: AtomicI64::new(NO_TIMESTAMP),
        }
    }

    pub fn record_trigger(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_merged(&self) {
        self.merged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_soft(&self) {
        self.soft.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hard(&self) {
        self.hard.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a success and resets the consecutive-failure streak.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Counts a failure and extends the consecutive-failure streak.
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn triggers(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    pub fn merged(&self) -> u64 {
        self.merged.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn soft(&self) -> u64 {
        self.soft.load(Ordering::Relaxed)
    }

    pub fn hard(&self) -> u64 {
        self.hard.load(Ordering::Relaxed)
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        match self.last_success_at_ms.load(Ordering::Relaxed) {
            NO_TIMESTAMP => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    /// Success rate as `"87.5%"`, or `"n/a"` before any attempt.
    pub fn success_rate(&self) -> String {
        format_success_rate(self.successes(), self.failures())
    }

    /// Copies every counter into a serialisable snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        let successes = self.successes();
        let failures = self.failures();
        StatsSnapshot {
            triggers: self.triggers(),
            merged: self.merged(),
            skipped: self.skipped(),
            soft: self.soft(),
            hard: self.hard(),
            successes,
            failures,
            consecutive_failures: self.consecutive_failures(),
            success_rate: format_success_rate(successes, failures),
            last_success_at: self.last_success_at(),
        }
    }
}

/// Point-in-time copy of [`RecoveryStats`], for diagnostics output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub triggers: u64,
    pub merged: u64,
    pub skipped: u64,
    pub soft: u64,
    pub hard: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
    pub success_rate: String,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl StatsSnapshot {
    /// Renders the snapshot as JSON for host diagnostics screens.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

pub(crate) fn format_success_rate(successes: u64, failures: u64) -> String {
    let attempts = successes + failures;
    if attempts == 0 {
        return "n/a".to_string();
    }
    format!("{:.1}%", successes as f64 * 100.0 / attempts as f64)
}
