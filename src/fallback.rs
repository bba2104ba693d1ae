//! Delayed, probe-gated hard fallback.
//!
//! A soft foreground recovery is optimistic: it skips expensive verification.
//! After a successful soft foreground recovery the scheduler arms a timer; when
//! it fires, a lightweight probe checks whether the tunnel actually works. Only
//! if the probe fails, the service is in a steady state, the link was not
//! validated externally, and no fallback ran recently, a forced foreground
//! request is resubmitted, which takes the fast path as a hard escalation.
//!
//! At most one fallback is ever armed: arming again cancels the previous timer.
//! Each armed timer carries a generation number so a report that raced with
//! its own cancellation is recognised as stale and ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::coordinator::CoordinatorMessage;
use crate::engine::{ProbeResult, RecoveryEngine, RecoveryLevel, TunnelRuntime};
use crate::escalator::ExecutionReport;
use crate::types::RecoveryReason;

/// Raw trigger used for requests the fallback resubmits.
pub const FALLBACK_RAW_REASON: &str = "app_foreground:hard_fallback";

/// Event name attached to every gate decision.
const GATE_EVENT: &str = "foreground_hard_fallback";

/// Whether a finished execution should arm a fallback.
///
/// Only a successful, non-forced foreground recovery at `Probe` level
/// qualifies: the engine judged the link healthy and took no corrective
/// action. A recovery that already closed or reset connections does not arm
/// one, and a forced request never does: it already is the escalation.
pub fn should_schedule(report: &ExecutionReport) -> bool {
    report.request.reason == RecoveryReason::AppForeground
        && !report.request.force
        && report.level == RecoveryLevel::Probe
        && report.success
}

/// Decision record produced when an armed fallback fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundFallbackState {
    pub should_skip: bool,
    pub event: &'static str,
    pub outcome: String,
}

impl ForegroundFallbackState {
    fn skip(reason: &str) -> Self {
        ForegroundFallbackState {
            should_skip: true,
            event: GATE_EVENT,
            outcome: format!("skipped: {reason}"),
        }
    }

    fn probe_ok(probe: &ProbeResult) -> Self {
        ForegroundFallbackState {
            should_skip: true,
            event: GATE_EVENT,
            outcome: format!(
                "skipped: probe-ok ({} in {}ms)",
                probe.target,
                probe.latency.as_millis()
            ),
        }
    }

    fn proceed() -> Self {
        ForegroundFallbackState {
            should_skip: false,
            event: GATE_EVENT,
            outcome: "escalating: forced foreground recovery".to_string(),
        }
    }
}

/// Evaluates the gate after a failed probe, in priority order:
/// runtime state, external validation, fallback cooldown.
pub fn evaluate_gate<R: TunnelRuntime + ?Sized>(
    runtime: &R,
    last_fallback_at: Option<Instant>,
    now: Instant,
    cooldown: Duration,
) -> ForegroundFallbackState {
    if !runtime.is_steady() {
        return ForegroundFallbackState::skip("state");
    }
    if runtime.is_link_validated() {
        return ForegroundFallbackState::skip("validated");
    }
    if let Some(last) = last_fallback_at
        && now.saturating_duration_since(last) < cooldown
    {
        return ForegroundFallbackState::skip("debounce");
    }
    ForegroundFallbackState::proceed()
}

#[derive(Debug)]
struct ArmedFallback {
    generation: u64,
    cancel: CancellationToken,
}

/// Owns the single armed fallback timer and the fallback cooldown clock.
#[derive(Debug, Default)]
pub struct FallbackScheduler {
    armed: Option<ArmedFallback>,
    generation: u64,
    last_fallback_at: Option<Instant>,
}

impl FallbackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a fallback check `delay` from now, cancelling any armed one.
    ///
    /// When the delay elapses the spawned task probes the engine and reports
    /// back with [`CoordinatorMessage::FallbackDue`]. Returns whether a
    /// previously armed fallback was replaced.
    pub fn arm<E: RecoveryEngine>(
        &mut self,
        engine: Arc<E>,
        delay: Duration,
        probe_timeout: Duration,
        tx: mpsc::UnboundedSender<CoordinatorMessage>,
        parent: &CancellationToken,
    ) -> bool {
        let replaced = self.cancel();

        self.generation += 1;
        let generation = self.generation;
        let cancel = parent.child_token();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    trace!(generation, "Fallback cancelled before grace delay elapsed");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let probe = tokio::select! {
                _ = token.cancelled() => {
                    trace!(generation, "Fallback cancelled during probe");
                    return;
                }
                probe = engine.probe_first_success(probe_timeout) => probe,
            };

            if tx
                .send(CoordinatorMessage::FallbackDue { generation, probe })
                .is_err()
            {
                debug!(generation, "Coordinator gone before fallback report");
            }
        });

        self.armed = Some(ArmedFallback { generation, cancel });
        replaced
    }

    /// Cancels the armed fallback, if any. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(armed) => {
                armed.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn last_fallback_at(&self) -> Option<Instant> {
        self.last_fallback_at
    }

    /// Handles a report from an armed fallback.
    ///
    /// Returns `None` for stale reports (superseded or cancelled generations).
    /// Otherwise disarms and returns the decision; a proceeding decision stamps
    /// the cooldown clock.
    pub fn on_due<R: TunnelRuntime + ?Sized>(
        &mut self,
        generation: u64,
        probe: Option<ProbeResult>,
        runtime: &R,
        now: Instant,
        cooldown: Duration,
    ) -> Option<ForegroundFallbackState> {
        match &self.armed {
            Some(armed) if armed.generation == generation => {}
            _ => {
                trace!(generation, "Ignoring stale fallback report");
                return None;
            }
        }
        self.armed = None;

        if let Some(probe) = probe {
            return Some(ForegroundFallbackState::probe_ok(&probe));
        }

        let state = evaluate_gate(runtime, self.last_fallback_at, now, cooldown);
        if !state.should_skip {
            self.last_fallback_at = Some(now);
        }
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalator::ExecutionKind;
    use crate::test_utils::{MockEngine, MockRuntime};
    use crate::types::RecoveryRequest;

    const COOLDOWN: Duration = Duration::from_secs(15);

    fn report(raw: &str, force: bool, level: RecoveryLevel, success: bool) -> ExecutionReport {
        ExecutionReport {
            request: RecoveryRequest::new(raw, force, Instant::now()),
            kind: ExecutionKind::Adaptive,
            level,
            success,
            probe_latency: None,
            closed_connections: 0,
            elapsed: Duration::ZERO,
            failed_actions: Vec::new(),
        }
    }

    #[test]
    fn schedules_only_for_probe_level_unforced_foreground_success() {
        assert!(should_schedule(&report(
            "app_foreground",
            false,
            RecoveryLevel::Probe,
            true
        )));

        assert!(!should_schedule(&report(
            "app_foreground",
            false,
            RecoveryLevel::Selective,
            true
        )));
        assert!(!should_schedule(&report(
            "app_foreground",
            false,
            RecoveryLevel::None,
            true
        )));

        assert!(!should_schedule(&report(
            "app_foreground",
            true,
            RecoveryLevel::Probe,
            true
        )));
        assert!(!should_schedule(&report(
            "app_foreground",
            false,
            RecoveryLevel::Nuclear,
            true
        )));
        assert!(!should_schedule(&report(
            "app_foreground",
            false,
            RecoveryLevel::Probe,
            false
        )));
        assert!(!should_schedule(&report(
            "screen_on",
            false,
            RecoveryLevel::Probe,
            true
        )));
    }

    #[test]
    fn gate_skips_unsteady_runtime_first() {
        let runtime = MockRuntime::new();
        runtime.set_starting(true);
        runtime.set_link_validated(true);

        let state = evaluate_gate(&runtime, None, Instant::now(), COOLDOWN);
        assert!(state.should_skip);
        assert_eq!(state.outcome, "skipped: state");

        let stopped = MockRuntime::new();
        stopped.set_manually_stopped(true);
        assert_eq!(
            evaluate_gate(&stopped, None, Instant::now(), COOLDOWN).outcome,
            "skipped: state"
        );

        let stopping = MockRuntime::new();
        stopping.set_stopping(true);
        assert_eq!(
            evaluate_gate(&stopping, None, Instant::now(), COOLDOWN).outcome,
            "skipped: state"
        );

        let not_running = MockRuntime::new();
        not_running.set_running(false);
        assert_eq!(
            evaluate_gate(&not_running, None, Instant::now(), COOLDOWN).outcome,
            "skipped: state"
        );
    }

    #[test]
    fn gate_skips_validated_link_before_cooldown() {
        let runtime = MockRuntime::new();
        runtime.set_link_validated(true);
        let now = Instant::now();

        let state = evaluate_gate(&runtime, Some(now), now, COOLDOWN);
        assert_eq!(state.outcome, "skipped: validated");
    }

    #[test]
    fn gate_applies_cooldown() {
        let runtime = MockRuntime::new();
        let last = Instant::now();

        let early = evaluate_gate(&runtime, Some(last), last + Duration::from_secs(10), COOLDOWN);
        assert_eq!(early.outcome, "skipped: debounce");

        let later = evaluate_gate(&runtime, Some(last), last + COOLDOWN, COOLDOWN);
        assert!(!later.should_skip);
        assert_eq!(later.event, GATE_EVENT);
    }

    #[tokio::test(start_paused = true)]
    async fn armed_fallback_reports_after_delay() {
        let engine = Arc::new(MockEngine::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let mut scheduler = FallbackScheduler::new();

        let started = Instant::now();
        let replaced = scheduler.arm(
            engine.clone(),
            Duration::from_secs(3),
            Duration::from_secs(2),
            tx,
            &parent,
        );
        assert!(!replaced);
        assert!(scheduler.is_armed());

        let msg = rx.recv().await.expect("fallback report");
        assert!(started.elapsed() >= Duration::from_secs(3));
        match msg {
            CoordinatorMessage::FallbackDue { generation, probe } => {
                assert_eq!(generation, 1);
                assert_eq!(probe, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert_eq!(engine.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_previous_fallback() {
        let engine = Arc::new(MockEngine::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let mut scheduler = FallbackScheduler::new();

        scheduler.arm(
            engine.clone(),
            Duration::from_secs(3),
            Duration::from_secs(2),
            tx.clone(),
            &parent,
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        let replaced = scheduler.arm(
            engine.clone(),
            Duration::from_secs(3),
            Duration::from_secs(2),
            tx,
            &parent,
        );
        assert!(replaced);

        let msg = rx.recv().await.expect("fallback report");
        assert!(matches!(
            msg,
            CoordinatorMessage::FallbackDue { generation: 2, .. }
        ));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.probe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_cancellation_stops_armed_fallback() {
        let engine = Arc::new(MockEngine::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let mut scheduler = FallbackScheduler::new();

        scheduler.arm(
            engine.clone(),
            Duration::from_secs(3),
            Duration::from_secs(2),
            tx,
            &parent,
        );
        parent.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.probe_count(), 0);
    }

    #[test]
    fn on_due_ignores_stale_generations() {
        let runtime = MockRuntime::new();
        let mut scheduler = FallbackScheduler::new();

        let decision = scheduler.on_due(7, None, &runtime, Instant::now(), COOLDOWN);
        assert_eq!(decision, None);
    }

    #[tokio::test(start_paused = true)]
    async fn on_due_stamps_cooldown_when_escalating() {
        let engine = Arc::new(MockEngine::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let runtime = MockRuntime::new();
        let mut scheduler = FallbackScheduler::new();

        scheduler.arm(
            engine,
            Duration::from_secs(3),
            Duration::from_secs(2),
            tx,
            &parent,
        );
        let now = Instant::now();
        let decision = scheduler
            .on_due(1, None, &runtime, now, COOLDOWN)
            .expect("current generation");

        assert!(!decision.should_skip);
        assert_eq!(scheduler.last_fallback_at(), Some(now));
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn on_due_skips_when_probe_succeeds() {
        let engine = Arc::new(MockEngine::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let parent = CancellationToken::new();
        let runtime = MockRuntime::new();
        let mut scheduler = FallbackScheduler::new();

        scheduler.arm(
            engine,
            Duration::from_secs(3),
            Duration::from_secs(2),
            tx,
            &parent,
        );
        let probe = ProbeResult {
            target: "gstatic".to_string(),
            latency: Duration::from_millis(80),
        };
        let decision = scheduler
            .on_due(1, Some(probe), &runtime, Instant::now(), COOLDOWN)
            .expect("current generation");

        assert!(decision.should_skip);
        assert!(decision.outcome.starts_with("skipped: probe-ok"));
        assert_eq!(scheduler.last_fallback_at(), None);
    }
}
