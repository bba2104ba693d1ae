//! Shared test utilities: arbitrary generators for property-based testing and
//! scripted collaborators for the coordinator.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use crate::engine::{
    EngineError, ProbeResult, RecoveryCall, RecoveryEngine, RecoveryLevel, RecoveryOutcome,
    Result, TunnelRuntime,
};
use crate::events::{EventSink, RecoveryEvent};
use crate::types::{RecoveryReason, RecoveryRequest};

/// Common origin for generated timestamps so they are mutually comparable.
static BASE: LazyLock<Instant> = LazyLock::new(Instant::now);

pub fn arb_reason() -> impl Strategy<Value = RecoveryReason> {
    prop::sample::select(RecoveryReason::ALL.to_vec())
}

pub fn arb_request() -> impl Strategy<Value = RecoveryRequest> {
    (arb_reason(), "[a-z_]{1,24}", any::<bool>(), 0u64..5_000, any::<bool>()).prop_map(
        |(reason, raw, force, offset_ms, merged)| RecoveryRequest {
            reason,
            raw_reason: raw,
            force,
            requested_at: *BASE + Duration::from_millis(offset_ms),
            merged,
        },
    )
}

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ─── Engine ───

/// One call observed by [`MockEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SmartRecover {
        reason: RecoveryReason,
        source_reason: String,
        skip_probe: bool,
    },
    Probe,
    Wake,
    CloseTrackedConnections,
    ResetAllConnections {
        system_triggered: bool,
    },
    ResetNetworkBinding,
}

/// Scripted engine that records calls and tracks how many recovery calls
/// overlap.
pub struct MockEngine {
    calls: Mutex<Vec<EngineCall>>,
    outcome: RecoveryOutcome,
    recover_error: Option<EngineError>,
    recover_delay: Duration,
    fast_action_delay: Duration,
    tracked_connections: u64,
    fail_fast_actions: bool,
    probe_results: Mutex<VecDeque<Option<ProbeResult>>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine {
            calls: Mutex::new(Vec::new()),
            outcome: RecoveryOutcome {
                level: RecoveryLevel::Selective,
                success: true,
                probe_latency: None,
                closed_connections: 0,
            },
            recover_error: None,
            recover_delay: Duration::ZERO,
            fast_action_delay: Duration::ZERO,
            tracked_connections: 0,
            fail_fast_actions: false,
            probe_results: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Outcome returned by every `smart_recover`.
    pub fn with_outcome(mut self, outcome: RecoveryOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_recover_error(mut self, error: EngineError) -> Self {
        self.recover_error = Some(error);
        self
    }

    /// How long each `smart_recover` call takes.
    pub fn with_recover_delay(mut self, delay: Duration) -> Self {
        self.recover_delay = delay;
        self
    }

    /// How long each fast-path action takes.
    pub fn with_fast_action_delay(mut self, delay: Duration) -> Self {
        self.fast_action_delay = delay;
        self
    }

    pub fn with_tracked_connections(mut self, count: u64) -> Self {
        self.tracked_connections = count;
        self
    }

    pub fn with_failing_fast_actions(mut self) -> Self {
        self.fail_fast_actions = true;
        self
    }

    /// Results returned by successive probes. Probes fail once exhausted.
    pub fn with_probe_results(self, results: impl IntoIterator<Item = Option<ProbeResult>>) -> Self {
        self.probe_results.lock().unwrap().extend(results);
        self
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Recovery calls only, without probes.
    pub fn recover_calls(&self) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::SmartRecover { .. }))
            .collect()
    }

    pub fn probe_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, EngineCall::Probe))
            .count()
    }

    /// Highest number of recovery calls ever in progress at once.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn log(&self, call: EngineCall) {
        self.calls.lock().unwrap().push(call);
    }

    async fn busy(&self, delay: Duration) {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn fast_action_result(&self, action: &'static str) -> Result<()> {
        if self.fail_fast_actions {
            Err(EngineError::Action {
                action,
                message: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

impl RecoveryEngine for MockEngine {
    async fn smart_recover(&self, call: RecoveryCall) -> Result<RecoveryOutcome> {
        self.log(EngineCall::SmartRecover {
            reason: call.reason,
            source_reason: call.source_reason,
            skip_probe: call.skip_probe,
        });
        self.busy(self.recover_delay).await;

        if let Some(error) = &self.recover_error {
            return Err(error.clone());
        }
        Ok(self.outcome.clone())
    }

    async fn probe_first_success(&self, _timeout: Duration) -> Option<ProbeResult> {
        self.log(EngineCall::Probe);
        self.probe_results.lock().unwrap().pop_front().flatten()
    }

    async fn wake(&self) -> Result<()> {
        self.log(EngineCall::Wake);
        self.busy(self.fast_action_delay).await;
        self.fast_action_result("wake")
    }

    async fn close_tracked_connections(&self) -> Result<u64> {
        self.log(EngineCall::CloseTrackedConnections);
        self.busy(self.fast_action_delay).await;
        self.fast_action_result("close_tracked_connections")
            .map(|()| self.tracked_connections)
    }

    async fn reset_all_connections(&self, system_triggered: bool) -> Result<()> {
        self.log(EngineCall::ResetAllConnections { system_triggered });
        self.busy(self.fast_action_delay).await;
        self.fast_action_result("reset_all_connections")
    }

    async fn reset_network_binding(&self) -> Result<()> {
        self.log(EngineCall::ResetNetworkBinding);
        self.busy(self.fast_action_delay).await;
        self.fast_action_result("reset_network_binding")
    }
}

// ─── Runtime ───

/// Runtime whose lifecycle flags tests flip directly. Starts running and
/// steady, with an unvalidated link.
pub struct MockRuntime {
    running: AtomicBool,
    starting: AtomicBool,
    stopping: AtomicBool,
    manually_stopped: AtomicBool,
    link_validated: AtomicBool,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        MockRuntime {
            running: AtomicBool::new(true),
            starting: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            manually_stopped: AtomicBool::new(false),
            link_validated: AtomicBool::new(false),
        }
    }

    pub fn set_running(&self, value: bool) {
        self.running.store(value, Ordering::SeqCst);
    }

    pub fn set_starting(&self, value: bool) {
        self.starting.store(value, Ordering::SeqCst);
    }

    pub fn set_stopping(&self, value: bool) {
        self.stopping.store(value, Ordering::SeqCst);
    }

    pub fn set_manually_stopped(&self, value: bool) {
        self.manually_stopped.store(value, Ordering::SeqCst);
    }

    pub fn set_link_validated(&self, value: bool) {
        self.link_validated.store(value, Ordering::SeqCst);
    }
}

impl TunnelRuntime for MockRuntime {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_starting(&self) -> bool {
        self.starting.load(Ordering::SeqCst)
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn is_manually_stopped(&self) -> bool {
        self.manually_stopped.load(Ordering::SeqCst)
    }

    fn is_link_validated(&self) -> bool {
        self.link_validated.load(Ordering::SeqCst)
    }
}

// ─── Events ───

/// Sink that keeps every event for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecoveryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecoveryEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&RecoveryEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: &RecoveryEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
