//! Coordinator message types.
//!
//! Producers and background tasks never touch coordinator state directly;
//! they send one of these messages and the actor processes them serially.

use tokio::time::Instant;

use crate::engine::ProbeResult;
use crate::escalator::ExecutionReport;

/// Messages that can be sent to the coordinator actor.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// A raw recovery trigger from the host.
    Submit {
        raw_reason: String,
        force: bool,
        requested_at: Instant,
    },

    /// A spawned execution has finished.
    ///
    /// Sent on the internal channel only.
    ExecutionFinished(ExecutionReport),

    /// An armed fallback's grace delay elapsed and its probe completed.
    ///
    /// Sent on the internal channel only. `generation` identifies which arming
    /// produced it, so reports from cancelled fallbacks can be ignored.
    FallbackDue {
        generation: u64,
        probe: Option<ProbeResult>,
    },

    /// Request a graceful shutdown.
    ///
    /// Pending requests are dropped and the armed fallback is cancelled. A
    /// recovery already running on the engine completes in the background.
    Shutdown,
}
