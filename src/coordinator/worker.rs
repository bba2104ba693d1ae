//! The coordinator actor's event loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use super::coalescer::{CoordinatorCore, Dispatch};
use super::message::CoordinatorMessage;
use crate::engine::{RecoveryEngine, TunnelRuntime};
use crate::escalator::{ExecutionKind, ExecutionReport, run_adaptive, run_foreground_fast};
use crate::events::{RecoveryEvent, millis};
use crate::fallback::{FALLBACK_RAW_REASON, FallbackScheduler};
use crate::types::RecoveryRequest;

/// Owns the coordination state and serialises every decision.
///
/// Engine work and fallback timers run in spawned tasks that report back on
/// the internal channel; the loop itself never awaits anything but messages
/// and the merge window deadline.
pub struct RecoveryWorker<E, R> {
    core: CoordinatorCore,
    engine: Arc<E>,
    runtime: Arc<R>,
    fallback: FallbackScheduler,
    internal_tx: mpsc::UnboundedSender<CoordinatorMessage>,
    shutdown: CancellationToken,
}

impl<E: RecoveryEngine, R: TunnelRuntime> RecoveryWorker<E, R> {
    pub fn new(
        core: CoordinatorCore,
        engine: Arc<E>,
        runtime: Arc<R>,
        internal_tx: mpsc::UnboundedSender<CoordinatorMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        RecoveryWorker {
            core,
            engine,
            runtime,
            fallback: FallbackScheduler::new(),
            internal_tx,
            shutdown,
        }
    }

    /// Runs until shutdown is requested or every public sender is dropped.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<CoordinatorMessage>,
        mut internal_rx: mpsc::UnboundedReceiver<CoordinatorMessage>,
    ) {
        info!("Recovery coordinator started");
        let shutdown = self.shutdown.clone();

        loop {
            let merge_deadline = self.core.merge_window_deadline();

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping coordinator");
                    break;
                }

                msg = rx.recv() => {
                    match msg {
                        Some(CoordinatorMessage::Shutdown) => {
                            info!("Shutdown message received");
                            break;
                        }
                        Some(msg) => self.handle_message(msg),
                        None => {
                            info!("All recovery handles dropped");
                            break;
                        }
                    }
                }

                Some(msg) = internal_rx.recv() => self.handle_message(msg),

                _ = async {
                    match merge_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Some(dispatch) = self.core.on_merge_window_elapsed(Instant::now()) {
                        self.dispatch(dispatch);
                    }
                }
            }
        }

        if self.fallback.cancel() {
            debug!("Cancelled armed fallback on shutdown");
        }
        let state = self.core.state();
        if state.pending_request.is_some() || state.pending_merge_request.is_some() {
            debug!("Dropping pending recovery requests on shutdown");
        }
        info!("Recovery coordinator stopped");
    }

    fn handle_message(&mut self, msg: CoordinatorMessage) {
        match msg {
            CoordinatorMessage::Submit {
                raw_reason,
                force,
                requested_at,
            } => {
                let request = RecoveryRequest::new(raw_reason, force, requested_at);
                self.submit(request);
            }
            CoordinatorMessage::ExecutionFinished(report) => {
                self.handle_execution_finished(report);
            }
            CoordinatorMessage::FallbackDue { generation, probe } => {
                let decision = self.fallback.on_due(
                    generation,
                    probe,
                    self.runtime.as_ref(),
                    Instant::now(),
                    self.core.policy().fallback_cooldown,
                );
                if let Some(state) = decision {
                    let escalate = !state.should_skip;
                    self.core.emit(RecoveryEvent::Fallback {
                        should_skip: state.should_skip,
                        event: state.event,
                        outcome: state.outcome,
                    });
                    if escalate {
                        let now = Instant::now();
                        self.submit(RecoveryRequest::new(FALLBACK_RAW_REASON, true, now));
                    }
                }
            }
            CoordinatorMessage::Shutdown => {
                trace!("Shutdown handled by event loop");
            }
        }
    }

    fn submit(&mut self, request: RecoveryRequest) {
        if let Some(dispatch) = self.core.submit(request, Instant::now()) {
            self.dispatch(dispatch);
        }
    }

    fn handle_execution_finished(&mut self, report: ExecutionReport) {
        let finished = self.core.finish(report, Instant::now());

        if finished.arm_fallback {
            let policy = self.core.policy();
            let delay = policy.fallback_grace_delay;
            let probe_timeout = policy.fallback_probe_timeout;
            let replaced_previous = self.fallback.arm(
                Arc::clone(&self.engine),
                delay,
                probe_timeout,
                self.internal_tx.clone(),
                &self.shutdown,
            );
            self.core.emit(RecoveryEvent::FallbackArmed {
                delay_ms: millis(delay),
                replaced_previous,
            });
        }

        if let Some(dispatch) = finished.next {
            self.dispatch(dispatch);
        }
    }

    /// Spawns the engine work for an admitted request.
    fn dispatch(&self, dispatch: Dispatch) {
        let engine = Arc::clone(&self.engine);
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let report = match dispatch.kind {
                ExecutionKind::Adaptive => run_adaptive(engine.as_ref(), dispatch.request).await,
                ExecutionKind::ForegroundFast => {
                    run_foreground_fast(engine.as_ref(), dispatch.request).await
                }
            };
            if tx.send(CoordinatorMessage::ExecutionFinished(report)).is_err() {
                debug!("Coordinator stopped before execution report");
            }
        });
    }
}
