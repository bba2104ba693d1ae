//! Dual-lane debounce gate.
//!
//! Two clocks decide whether a request may reach the engine: one global
//! "last accepted" stamp and one stamp per reason. Each check skips unless the
//! request is forced or enough time has elapsed since the matching stamp.
//! Fast-lane reasons use a much tighter global threshold and a capped
//! per-reason threshold.
//!
//! The gate never touches the coalescer's pending slots: a skipped request is
//! simply dropped, counted and logged.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::policy::RecoveryPolicy;
use crate::types::{Lane, RecoveryRequest};

/// Debounce parameters derived for one request. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceContext {
    pub now: Instant,
    pub lane: Lane,
    pub effective_global_debounce: Duration,
    pub effective_source_debounce: Duration,
    pub reason_key: &'static str,
}

/// Which check rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipScope {
    Global,
    Reason,
}

impl SkipScope {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipScope::Global => "global",
            SkipScope::Reason => "reason",
        }
    }
}

/// Outcome of evaluating a request against the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebounceDecision {
    /// The request may execute. Call [`DebounceGate::record`] once it does.
    Proceed(DebounceContext),
    /// The request was rate-limited away.
    Skip {
        context: DebounceContext,
        scope: SkipScope,
        /// Time elapsed since the stamp that blocked the request.
        elapsed: Duration,
    },
}

/// Last-accepted timestamps, global and per reason.
#[derive(Debug, Default)]
pub struct DebounceGate {
    last_global_trigger_at: Option<Instant>,
    last_trigger_at_by_reason: HashMap<&'static str, Instant>,
}

impl DebounceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes the debounce parameters for a request at `now`.
    pub fn context(
        &self,
        request: &RecoveryRequest,
        now: Instant,
        policy: &RecoveryPolicy,
    ) -> DebounceContext {
        let lane = request.reason.lane();
        DebounceContext {
            now,
            lane,
            effective_global_debounce: policy.global_debounce_for(lane),
            effective_source_debounce: policy.source_debounce_for(request.reason),
            reason_key: request.reason.key(),
        }
    }

    /// Evaluates the global check, then the per-reason check.
    ///
    /// Forced requests always proceed.
    pub fn evaluate(
        &self,
        request: &RecoveryRequest,
        now: Instant,
        policy: &RecoveryPolicy,
    ) -> DebounceDecision {
        let context = self.context(request, now, policy);
        if request.force {
            return DebounceDecision::Proceed(context);
        }

        if let Some(elapsed) =
            too_recent(self.last_global_trigger_at, now, context.effective_global_debounce)
        {
            return DebounceDecision::Skip {
                context,
                scope: SkipScope::Global,
                elapsed,
            };
        }

        let last_for_reason = self
            .last_trigger_at_by_reason
            .get(context.reason_key)
            .copied();
        if let Some(elapsed) = too_recent(last_for_reason, now, context.effective_source_debounce) {
            return DebounceDecision::Skip {
                context,
                scope: SkipScope::Reason,
                elapsed,
            };
        }

        DebounceDecision::Proceed(context)
    }

    /// Stamps both clocks for an admitted request.
    pub fn record(&mut self, context: &DebounceContext) {
        self.last_global_trigger_at = Some(context.now);
        self.last_trigger_at_by_reason
            .insert(context.reason_key, context.now);
    }

    pub fn last_global_trigger_at(&self) -> Option<Instant> {
        self.last_global_trigger_at
    }
}

/// Returns the elapsed time when `last` is less than `threshold` before `now`.
fn too_recent(last: Option<Instant>, now: Instant, threshold: Duration) -> Option<Duration> {
    let last = last?;
    let elapsed = now.saturating_duration_since(last);
    (elapsed < threshold).then_some(elapsed)
}
