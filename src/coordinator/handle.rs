//! Public entry point: spawning the coordinator and talking to it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::coalescer::CoordinatorCore;
use super::message::CoordinatorMessage;
use super::worker::RecoveryWorker;
use crate::engine::{RecoveryEngine, TunnelRuntime};
use crate::events::{EventSink, TracingSink};
use crate::policy::RecoveryPolicy;
use crate::stats::{RecoveryStats, StatsSnapshot};

/// Configuration for [`spawn_coordinator`].
#[derive(Clone)]
pub struct CoordinatorConfig {
    pub policy: RecoveryPolicy,
    pub sink: Arc<dyn EventSink>,
    /// Parent token; cancelling it stops the coordinator.
    pub shutdown: CancellationToken,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            policy: RecoveryPolicy::default(),
            sink: Arc::new(TracingSink),
            shutdown: CancellationToken::new(),
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Cheap, cloneable handle to a running coordinator.
///
/// Submitting never blocks and never fails; counters are read directly from
/// shared atomics.
#[derive(Clone)]
pub struct RecoveryHandle {
    tx: mpsc::UnboundedSender<CoordinatorMessage>,
    stats: Arc<RecoveryStats>,
    cancel: CancellationToken,
}

impl RecoveryHandle {
    /// Reports a recovery trigger. Callable from any thread.
    pub fn submit_recovery_request(&self, raw_reason: impl Into<String>, force: bool) {
        let raw_reason = raw_reason.into();
        debug!(raw_reason = %raw_reason, force, "Recovery request submitted");

        let msg = CoordinatorMessage::Submit {
            raw_reason,
            force,
            requested_at: Instant::now(),
        };
        if self.tx.send(msg).is_err() {
            warn!("Recovery coordinator is not running, dropping request");
        }
    }

    pub fn triggers(&self) -> u64 {
        self.stats.triggers()
    }

    pub fn merged(&self) -> u64 {
        self.stats.merged()
    }

    pub fn skipped(&self) -> u64 {
        self.stats.skipped()
    }

    pub fn soft(&self) -> u64 {
        self.stats.soft()
    }

    pub fn hard(&self) -> u64 {
        self.stats.hard()
    }

    pub fn successes(&self) -> u64 {
        self.stats.successes()
    }

    pub fn failures(&self) -> u64 {
        self.stats.failures()
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.stats.consecutive_failures()
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.stats.last_success_at()
    }

    /// Success rate as `"87.5%"`, or `"n/a"` before any attempt.
    pub fn success_rate(&self) -> String {
        self.stats.success_rate()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops the coordinator. Pending requests are dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let _ = self.tx.send(CoordinatorMessage::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawns the coordinator actor on the current tokio runtime.
///
/// Returns the handle producers use and the actor's join handle. The actor
/// stops when the handle's [`RecoveryHandle::shutdown`] is called, when the
/// configured shutdown token is cancelled, or when every handle is dropped.
pub fn spawn_coordinator<E, R>(
    engine: Arc<E>,
    runtime: Arc<R>,
    config: CoordinatorConfig,
) -> (RecoveryHandle, JoinHandle<()>)
where
    E: RecoveryEngine,
    R: TunnelRuntime,
{
    let stats = Arc::new(RecoveryStats::new());
    let core = CoordinatorCore::new(config.policy, Arc::clone(&stats), config.sink);

    let (tx, rx) = mpsc::unbounded_channel();
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();
    let cancel = config.shutdown.child_token();

    let worker = RecoveryWorker::new(core, engine, runtime, internal_tx, cancel.clone());
    let task = tokio::spawn(worker.run(rx, internal_rx));

    let handle = RecoveryHandle { tx, stats, cancel };
    (handle, task)
}
