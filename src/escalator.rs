//! Recovery action execution.
//!
//! Two routes reach the engine:
//!
//! - **Adaptive**: `smart_recover`, where the engine probes (unless forced) and
//!   picks a level itself. The level is folded into a SOFT/HARD class for
//!   statistics.
//! - **Foreground fast path**: a fixed sequence of best-effort actions with no
//!   probe, used when the app resumes and a multi-second probe cycle would be
//!   visible lag.
//!
//! Both run outside the coordinator's exclusion domain and return an
//! [`ExecutionReport`]; the coordinator applies the bookkeeping when the
//! report comes back. Neither route can fail: engine errors become a failed
//! report or a logged, skipped action.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::engine::{RecoveryCall, RecoveryEngine, RecoveryLevel, RecoveryOutcome, SeverityClass};
use crate::events::millis;
use crate::stats::RecoveryStats;
use crate::types::RecoveryRequest;

/// Which route an execution took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Adaptive,
    ForegroundFast,
}

impl ExecutionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionKind::Adaptive => "adaptive",
            ExecutionKind::ForegroundFast => "foreground_fast",
        }
    }
}

/// Result of one execution, handed back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    pub request: RecoveryRequest,
    pub kind: ExecutionKind,
    pub level: RecoveryLevel,
    pub success: bool,
    pub probe_latency: Option<Duration>,
    pub closed_connections: u64,
    pub elapsed: Duration,
    /// Fast-path actions that reported an error. Always empty for adaptive runs.
    pub failed_actions: Vec<&'static str>,
}

impl ExecutionReport {
    pub fn severity(&self) -> SeverityClass {
        self.level.severity()
    }
}

/// Runs the engine's adaptive recovery for a request.
///
/// `skip_probe` mirrors `request.force`. An engine that cannot be invoked is
/// reported as a failed `None`-level recovery.
#[instrument(skip(engine, request), fields(reason = %request.reason, force = request.force))]
pub async fn run_adaptive<E: RecoveryEngine>(engine: &E, request: RecoveryRequest) -> ExecutionReport {
    let started = Instant::now();
    let call = RecoveryCall {
        reason: request.reason,
        source_reason: request.raw_reason.clone(),
        skip_probe: request.force,
    };

    let outcome = match engine.smart_recover(call).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Engine unavailable for recovery");
            RecoveryOutcome::unavailable()
        }
    };

    ExecutionReport {
        request,
        kind: ExecutionKind::Adaptive,
        level: outcome.level,
        success: outcome.success,
        probe_latency: outcome.probe_latency,
        closed_connections: outcome.closed_connections,
        elapsed: started.elapsed(),
        failed_actions: Vec::new(),
    }
}

/// Runs the foreground fast path: wake, close tracked connections, reset all
/// connections, rebind the network. Each step is best-effort.
///
/// The fast path always counts as a successful soft (selective) recovery;
/// individual action failures are logged and listed in the report.
#[instrument(skip(engine, request), fields(reason = %request.reason))]
pub async fn run_foreground_fast<E: RecoveryEngine>(
    engine: &E,
    request: RecoveryRequest,
) -> ExecutionReport {
    let started = Instant::now();
    let mut failed_actions = Vec::new();

    if let Err(e) = engine.wake().await {
        warn!(error = %e, "Fast path: wake failed");
        failed_actions.push("wake");
    }

    let closed_connections = match engine.close_tracked_connections().await {
        Ok(count) => count,
        Err(e) => {
            warn!(error = %e, "Fast path: closing tracked connections failed");
            failed_actions.push("close_tracked_connections");
            0
        }
    };

    if let Err(e) = engine.reset_all_connections(true).await {
        warn!(error = %e, "Fast path: resetting connections failed");
        failed_actions.push("reset_all_connections");
    }

    if let Err(e) = engine.reset_network_binding().await {
        warn!(error = %e, "Fast path: resetting network binding failed");
        failed_actions.push("reset_network_binding");
    }

    let elapsed = started.elapsed();
    debug!(
        elapsed_ms = millis(elapsed),
        closed_connections, "Fast path actions finished"
    );

    ExecutionReport {
        request,
        kind: ExecutionKind::ForegroundFast,
        level: RecoveryLevel::Selective,
        success: true,
        probe_latency: None,
        closed_connections,
        elapsed,
        failed_actions,
    }
}

/// Applies a finished execution to the counters.
///
/// `None` and `Probe` are soft but do not bump the soft counter; `Selective`
/// does; `Nuclear` bumps the hard counter. The trigger counter is bumped when
/// the execution is admitted, not here.
pub fn record_report(stats: &RecoveryStats, report: &ExecutionReport) {
    match report.level {
        RecoveryLevel::None | RecoveryLevel::Probe => {}
        RecoveryLevel::Selective => stats.record_soft(),
        RecoveryLevel::Nuclear => stats.record_hard(),
    }

    if report.success {
        stats.record_success();
    } else {
        stats.record_failure();
    }
}
