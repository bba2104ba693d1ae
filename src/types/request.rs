//! Recovery requests and the tie-break rule used to merge them.
//!
//! A burst of conflicting triggers never queues up: every merge keeps exactly
//! one surviving request, chosen by [`choose_higher_priority`]. Because the
//! rule is a total order on `(force, priority, requested_at)`, any chain of
//! merges converges on the single most urgent, most recent intent.

use tokio::time::Instant;

use super::reason::{RecoveryReason, classify};

/// A single request to recover connectivity.
///
/// Created at ingestion and never mutated; merging produces a copy with
/// `merged` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryRequest {
    pub reason: RecoveryReason,
    /// The trigger string exactly as the host reported it.
    pub raw_reason: String,
    /// Forced requests bypass debounce and skip the engine's probe.
    pub force: bool,
    pub requested_at: Instant,
    /// True once this request has absorbed (or survived) a merge.
    pub merged: bool,
}

impl RecoveryRequest {
    /// Creates a request from a raw trigger, classifying it.
    pub fn new(raw_reason: impl Into<String>, force: bool, requested_at: Instant) -> Self {
        let raw_reason = raw_reason.into();
        RecoveryRequest {
            reason: classify(&raw_reason),
            raw_reason,
            force,
            requested_at,
            merged: false,
        }
    }

    /// Creates a request with an already-known reason.
    pub fn with_reason(
        reason: RecoveryReason,
        raw_reason: impl Into<String>,
        force: bool,
        requested_at: Instant,
    ) -> Self {
        RecoveryRequest {
            reason,
            raw_reason: raw_reason.into(),
            force,
            requested_at,
            merged: false,
        }
    }

    /// Returns a copy flagged as merged.
    pub fn into_merged(self) -> Self {
        RecoveryRequest {
            merged: true,
            ..self
        }
    }

    /// Whether this is the one combination that takes the foreground fast path.
    pub fn is_foreground_force(&self) -> bool {
        self.reason == RecoveryReason::AppForeground && self.force
    }

    /// Ordering key for the tie-break rule: force, then priority, then recency.
    pub fn urgency(&self) -> (bool, u32, Instant) {
        (self.force, self.reason.priority(), self.requested_at)
    }
}

/// Picks the request that should survive a merge.
///
/// Prefers `force`, then higher reason priority, then the more recent
/// `requested_at`. When both keys are identical the incumbent `a` is kept.
pub fn choose_higher_priority(a: RecoveryRequest, b: RecoveryRequest) -> RecoveryRequest {
    if b.urgency() > a.urgency() { b } else { a }
}

/// Merges `incoming` into an optional slot, returning the new slot content.
///
/// An empty slot takes the incoming request as-is. An occupied slot keeps the
/// tie-break winner, flagged as merged.
pub fn merge_into(slot: Option<RecoveryRequest>, incoming: RecoveryRequest) -> RecoveryRequest {
    match slot {
        None => incoming,
        Some(existing) => choose_higher_priority(existing, incoming).into_merged(),
    }
}
