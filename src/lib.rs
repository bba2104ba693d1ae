//! Tunnel Recovery - coordinates connectivity recovery for a tunnel engine.
//!
//! Many uncoordinated sources (network changes, doze exit, app foreground,
//! health checks) report that the tunnel may be broken. This library turns
//! that stream of triggers into a rate-limited, deduplicated, single-flight
//! sequence of recovery actions, with a fast path for app resume and a delayed,
//! probe-gated hard fallback.

pub mod coordinator;
pub mod debounce;
pub mod engine;
pub mod escalator;
pub mod events;
pub mod fallback;
pub mod policy;
pub mod stats;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use coordinator::{CoordinatorConfig, RecoveryHandle, spawn_coordinator};
pub use engine::{
    EngineError, ProbeResult, RecoveryCall, RecoveryEngine, RecoveryLevel, RecoveryOutcome,
    SeverityClass, TunnelRuntime,
};
pub use events::{EventSink, RecoveryEvent, TracingSink};
pub use policy::{PolicyError, RecoveryPolicy};
pub use stats::StatsSnapshot;
pub use types::{RecoveryReason, RecoveryRequest, classify};
