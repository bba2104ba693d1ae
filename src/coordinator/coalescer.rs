//! Synchronous coordination logic.
//!
//! [`CoordinatorCore`] holds every piece of mutable coordination state and
//! makes all decisions: fast path or merge, window or in-flight slot, skip or
//! execute, drain or stop. It never awaits. The actor feeds it messages and
//! carries out the [`Dispatch`]es it returns.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::trace;

use super::state::CoalescerState;
use crate::debounce::{DebounceDecision, DebounceGate, SkipScope};
use crate::escalator::{ExecutionKind, ExecutionReport, record_report};
use crate::events::{EventSink, MergeTarget, RecoveryEvent, millis};
use crate::fallback::should_schedule;
use crate::policy::RecoveryPolicy;
use crate::stats::RecoveryStats;
use crate::types::{RecoveryReason, RecoveryRequest, merge_into};

/// A request admitted for execution. The caller must run it on the engine and
/// hand the report back through [`CoordinatorCore::finish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub request: RecoveryRequest,
    pub kind: ExecutionKind,
}

/// What to do after an execution finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    /// Whether the hard fallback should be (re-)armed.
    pub arm_fallback: bool,
    /// The drained request that is now in flight, if any.
    pub next: Option<Dispatch>,
}

pub struct CoordinatorCore {
    state: CoalescerState,
    gate: DebounceGate,
    stats: Arc<RecoveryStats>,
    policy: RecoveryPolicy,
    sink: Arc<dyn EventSink>,
}

impl CoordinatorCore {
    pub fn new(policy: RecoveryPolicy, stats: Arc<RecoveryStats>, sink: Arc<dyn EventSink>) -> Self {
        CoordinatorCore {
            state: CoalescerState::default(),
            gate: DebounceGate::new(),
            stats,
            policy,
            sink,
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    pub fn state(&self) -> &CoalescerState {
        &self.state
    }

    pub fn merge_window_deadline(&self) -> Option<Instant> {
        self.state.merge_window_deadline
    }

    pub fn emit(&self, event: RecoveryEvent) {
        self.sink.record(&event);
    }

    /// Admits a new request.
    ///
    /// A forced foreground request arriving while idle takes the fast path and
    /// is returned for immediate dispatch. Anything else is merged: into the
    /// pending slot behind a running execution, or into the merge window.
    pub fn submit(&mut self, request: RecoveryRequest, now: Instant) -> Option<Dispatch> {
        self.emit(RecoveryEvent::Classified {
            raw_reason: request.raw_reason.clone(),
            reason: request.reason,
            force: request.force,
            lane: request.reason.lane(),
        });

        if request.is_foreground_force() && self.state.is_idle() {
            self.stats.record_trigger();
            self.state.in_flight = Some(ExecutionKind::ForegroundFast);
            return Some(Dispatch {
                request,
                kind: ExecutionKind::ForegroundFast,
            });
        }

        if !self.state.is_idle() {
            let incoming = request.reason;
            let survivor = merge_into(self.state.pending_request.take(), request);
            self.stats.record_merged();
            self.emit_merged(MergeTarget::InFlight, incoming, &survivor);
            self.state.pending_request = Some(survivor);
            return None;
        }

        let incoming = request.reason;
        match self.state.pending_merge_request.take() {
            Some(existing) => {
                let survivor = merge_into(Some(existing), request);
                self.stats.record_merged();
                self.emit_merged(MergeTarget::Window, incoming, &survivor);
                self.state.pending_merge_request = Some(survivor);
            }
            None => {
                let window = self.policy.merge_window;
                self.state.pending_merge_request = Some(request);
                self.state.merge_window_deadline = Some(now + window);
                self.emit(RecoveryEvent::WindowOpened {
                    reason: incoming,
                    window_ms: millis(window),
                });
            }
        }
        None
    }

    /// Closes the merge window and releases its surviving request.
    ///
    /// If an execution started while the window was open, the survivor joins
    /// the pending slot instead so only one execution is ever in flight.
    pub fn on_merge_window_elapsed(&mut self, now: Instant) -> Option<Dispatch> {
        self.state.merge_window_deadline = None;
        let request = self.state.pending_merge_request.take()?;

        if !self.state.is_idle() {
            let incoming = request.reason;
            let occupied = self.state.pending_request.is_some();
            let survivor = merge_into(self.state.pending_request.take(), request);
            if occupied {
                self.stats.record_merged();
            }
            self.emit_merged(MergeTarget::InFlight, incoming, &survivor);
            self.state.pending_request = Some(survivor);
            return None;
        }

        self.begin_execution(request, now)
    }

    /// Runs a request through the debounce gate.
    ///
    /// A skipped request is counted and dropped. An admitted one stamps both
    /// debounce clocks, counts a trigger and becomes the in-flight execution.
    pub fn begin_execution(&mut self, request: RecoveryRequest, now: Instant) -> Option<Dispatch> {
        match self.gate.evaluate(&request, now, &self.policy) {
            DebounceDecision::Skip {
                context,
                scope,
                elapsed,
            } => {
                self.stats.record_skipped();
                let threshold = match scope {
                    SkipScope::Global => context.effective_global_debounce,
                    SkipScope::Reason => context.effective_source_debounce,
                };
                self.emit(RecoveryEvent::Skipped {
                    reason: request.reason,
                    scope: scope.as_str(),
                    elapsed_ms: millis(elapsed),
                    threshold_ms: millis(threshold),
                    skipped_total: self.stats.skipped(),
                });
                None
            }
            DebounceDecision::Proceed(context) => {
                self.gate.record(&context);
                self.stats.record_trigger();
                self.state.in_flight = Some(ExecutionKind::Adaptive);
                trace!(reason = %request.reason, lane = %context.lane, "Admitted recovery");
                Some(Dispatch {
                    request,
                    kind: ExecutionKind::Adaptive,
                })
            }
        }
    }

    /// Applies a finished execution and drains the pending slot.
    pub fn finish(&mut self, report: ExecutionReport, now: Instant) -> Finished {
        self.state.in_flight = None;
        record_report(&self.stats, &report);

        let stats = self.stats.snapshot();
        let event = match report.kind {
            ExecutionKind::ForegroundFast => RecoveryEvent::FastPath {
                elapsed_ms: millis(report.elapsed),
                failed_actions: report.failed_actions.clone(),
                stats,
            },
            ExecutionKind::Adaptive => RecoveryEvent::Executed {
                reason: report.request.reason,
                force: report.request.force,
                merged: report.request.merged,
                level: report.level,
                severity: report.severity(),
                success: report.success,
                probe_latency_ms: report.probe_latency.map(millis),
                closed_connections: report.closed_connections,
                elapsed_ms: millis(report.elapsed),
                stats,
            },
        };
        self.emit(event);

        Finished {
            arm_fallback: should_schedule(&report),
            next: self.drain(now),
        }
    }

    /// Executes the pending request, if any, until one is admitted or the
    /// slot is empty.
    fn drain(&mut self, now: Instant) -> Option<Dispatch> {
        while self.state.is_idle() {
            let request = self.state.pending_request.take()?;
            if let Some(dispatch) = self.begin_execution(request, now) {
                return Some(dispatch);
            }
        }
        None
    }

    fn emit_merged(
        &self,
        target: MergeTarget,
        incoming: RecoveryReason,
        survivor: &RecoveryRequest,
    ) {
        self.emit(RecoveryEvent::Merged {
            target,
            incoming,
            survivor: survivor.reason,
            survivor_force: survivor.force,
            merged_total: self.stats.merged(),
        });
    }
}
