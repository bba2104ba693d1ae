//! Structured decision events.
//!
//! The coordinator emits exactly one [`RecoveryEvent`] per decision point
//! (classification, skip, merge, window, execution, fast path, fallback).
//! Events go to an [`EventSink`]; the default [`TracingSink`] turns each one
//! into a single `tracing` record with structured fields.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{RecoveryLevel, SeverityClass};
use crate::stats::StatsSnapshot;
use crate::types::{Lane, RecoveryReason};

/// Where a merged request landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeTarget {
    /// The pending slot behind an in-flight execution.
    InFlight,
    /// The open merge window.
    Window,
}

/// One decision made by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryEvent {
    Classified {
        raw_reason: String,
        reason: RecoveryReason,
        force: bool,
        lane: Lane,
    },
    Skipped {
        reason: RecoveryReason,
        scope: &'static str,
        elapsed_ms: u64,
        threshold_ms: u64,
        skipped_total: u64,
    },
    Merged {
        target: MergeTarget,
        incoming: RecoveryReason,
        survivor: RecoveryReason,
        survivor_force: bool,
        merged_total: u64,
    },
    WindowOpened {
        reason: RecoveryReason,
        window_ms: u64,
    },
    Executed {
        reason: RecoveryReason,
        force: bool,
        merged: bool,
        level: RecoveryLevel,
        severity: SeverityClass,
        success: bool,
        probe_latency_ms: Option<u64>,
        closed_connections: u64,
        elapsed_ms: u64,
        stats: StatsSnapshot,
    },
    FastPath {
        elapsed_ms: u64,
        failed_actions: Vec<&'static str>,
        stats: StatsSnapshot,
    },
    FallbackArmed {
        delay_ms: u64,
        replaced_previous: bool,
    },
    Fallback {
        should_skip: bool,
        event: &'static str,
        outcome: String,
    },
}

/// Whole milliseconds for `*_ms` event fields, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Receives coordinator decision events.
pub trait EventSink: Send + Sync + 'static {
    fn record(&self, event: &RecoveryEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &RecoveryEvent) {
        match event {
            RecoveryEvent::Classified {
                raw_reason,
                reason,
                force,
                lane,
            } => {
                debug!(
                    raw_reason = %raw_reason,
                    reason = %reason,
                    force,
                    lane = %lane,
                    "Classified recovery trigger"
                );
            }
            RecoveryEvent::Skipped {
                reason,
                scope,
                elapsed_ms,
                threshold_ms,
                skipped_total,
            } => {
                debug!(
                    reason = %reason,
                    scope,
                    elapsed_ms,
                    threshold_ms,
                    skipped_total,
                    "Recovery skipped by debounce"
                );
            }
            RecoveryEvent::Merged {
                target,
                incoming,
                survivor,
                survivor_force,
                merged_total,
            } => {
                debug!(
                    merge_target = ?target,
                    incoming = %incoming,
                    survivor = %survivor,
                    survivor_force,
                    merged_total,
                    "Merged recovery request"
                );
            }
            RecoveryEvent::WindowOpened { reason, window_ms } => {
                debug!(reason = %reason, window_ms, "Opened merge window");
            }
            RecoveryEvent::Executed {
                reason,
                force,
                merged,
                level,
                severity,
                success,
                probe_latency_ms,
                closed_connections,
                elapsed_ms,
                stats,
            } => {
                if *success {
                    info!(
                        reason = %reason,
                        force,
                        merged,
                        level = %level,
                        severity = ?severity,
                        success,
                        probe_latency_ms = ?probe_latency_ms,
                        closed_connections,
                        elapsed_ms,
                        triggers = stats.triggers,
                        merged_total = stats.merged,
                        skipped = stats.skipped,
                        soft = stats.soft,
                        hard = stats.hard,
                        success_rate = %stats.success_rate,
                        "Recovery executed"
                    );
                } else {
                    warn!(
                        reason = %reason,
                        force,
                        merged,
                        level = %level,
                        severity = ?severity,
                        success,
                        closed_connections,
                        elapsed_ms,
                        consecutive_failures = stats.consecutive_failures,
                        triggers = stats.triggers,
                        merged_total = stats.merged,
                        skipped = stats.skipped,
                        soft = stats.soft,
                        hard = stats.hard,
                        success_rate = %stats.success_rate,
                        "Recovery executed"
                    );
                }
            }
            RecoveryEvent::FastPath {
                elapsed_ms,
                failed_actions,
                stats,
            } => {
                info!(
                    elapsed_ms,
                    failed_actions = ?failed_actions,
                    triggers = stats.triggers,
                    soft = stats.soft,
                    success_rate = %stats.success_rate,
                    "Foreground fast path completed"
                );
            }
            RecoveryEvent::FallbackArmed {
                delay_ms,
                replaced_previous,
            } => {
                debug!(delay_ms, replaced_previous, "Armed hard fallback");
            }
            RecoveryEvent::Fallback {
                should_skip,
                event,
                outcome,
            } => {
                info!(should_skip, event, outcome = %outcome, "Hard fallback evaluated");
            }
        }
    }
}
