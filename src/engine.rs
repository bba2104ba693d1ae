//! Collaborator interfaces: the tunnel engine and the runtime state it exposes.
//!
//! The coordinator never decides what a recovery does internally; it only
//! calls these capabilities. The trait-based design enables:
//! - Mock engines for testing
//! - Adapters over an FFI engine handle
//! - Logging or dry-run engines
//!
//! The engine is treated as a single, non-reentrant resource. The coordinator
//! guarantees it never has two recovery calls outstanding at once, so
//! implementations need not defend against that themselves.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::RecoveryReason;

/// How aggressively the engine chose to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLevel {
    /// Nothing was attempted.
    None,
    /// The engine probed, found the link healthy and took no action.
    Probe,
    /// Stale connections were closed selectively.
    Selective,
    /// Everything was torn down and rebuilt.
    Nuclear,
}

/// Coarse severity used for statistics and fallback arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityClass {
    Soft,
    Hard,
}

impl RecoveryLevel {
    pub fn severity(self) -> SeverityClass {
        match self {
            RecoveryLevel::None | RecoveryLevel::Probe | RecoveryLevel::Selective => {
                SeverityClass::Soft
            }
            RecoveryLevel::Nuclear => SeverityClass::Hard,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryLevel::None => "none",
            RecoveryLevel::Probe => "probe",
            RecoveryLevel::Selective => "selective",
            RecoveryLevel::Nuclear => "nuclear",
        }
    }
}

impl fmt::Display for RecoveryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments to the engine's adaptive recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryCall {
    pub reason: RecoveryReason,
    /// The trigger string the host reported, passed through for engine logs.
    pub source_reason: String,
    /// Forced requests ask the engine to act without probing first.
    pub skip_probe: bool,
}

/// What the engine reports back from an adaptive recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub level: RecoveryLevel,
    pub success: bool,
    pub probe_latency: Option<Duration>,
    pub closed_connections: u64,
}

impl RecoveryOutcome {
    /// Outcome used when the engine could not be invoked at all.
    pub fn unavailable() -> Self {
        RecoveryOutcome {
            level: RecoveryLevel::None,
            success: false,
            probe_latency: None,
            closed_connections: 0,
        }
    }
}

/// A successful connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Which probe target answered first.
    pub target: String,
    pub latency: Duration,
}

/// Failures invoking the engine.
///
/// These never escape the coordinator: they are folded into a failed
/// [`RecoveryOutcome`] or logged.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine instance has not been started yet.
    #[error("engine not initialized")]
    NotInitialized,

    /// The engine is shutting down and refuses new work.
    #[error("engine is closed")]
    Closed,

    /// A specific capability failed.
    #[error("{action} failed: {message}")]
    Action {
        action: &'static str,
        message: String,
    },
}

/// Result type for engine calls.
pub type Result<T> = std::result::Result<T, EngineError>;

/// The tunnel engine's recovery capabilities.
pub trait RecoveryEngine: Send + Sync + 'static {
    /// Adaptive recovery: the engine probes (unless told not to) and picks a
    /// level itself.
    fn smart_recover(&self, call: RecoveryCall)
    -> impl Future<Output = Result<RecoveryOutcome>> + Send;

    /// Lightweight liveness check through the tunnel. `None` means no probe
    /// target answered within `timeout`.
    fn probe_first_success(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Option<ProbeResult>> + Send;

    /// Resumes any paused internal workers.
    fn wake(&self) -> impl Future<Output = Result<()>> + Send;

    /// Closes every tracked connection, returning how many were closed.
    fn close_tracked_connections(&self) -> impl Future<Output = Result<u64>> + Send;

    /// Resets all connections. `system_triggered` distinguishes automatic
    /// resets from user-initiated ones in engine logs.
    fn reset_all_connections(
        &self,
        system_triggered: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Rebinds the tunnel to the current network and routes.
    fn reset_network_binding(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Read-only view of the tunnel service lifecycle.
pub trait TunnelRuntime: Send + Sync + 'static {
    fn is_running(&self) -> bool;
    fn is_starting(&self) -> bool;
    fn is_stopping(&self) -> bool;
    fn is_manually_stopped(&self) -> bool;
    /// Whether the OS has already validated the current link.
    fn is_link_validated(&self) -> bool;

    /// Running and not in any transition or user-stopped state.
    fn is_steady(&self) -> bool {
        self.is_running() && !self.is_starting() && !self.is_stopping() && !self.is_manually_stopped()
    }
}
