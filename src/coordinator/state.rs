//! Coalescer state owned by the coordinator actor.

use tokio::time::Instant;

use crate::escalator::ExecutionKind;
use crate::types::RecoveryRequest;

/// Mutable coalescing state. Only the actor touches it.
///
/// Invariants:
/// - at most one execution is in flight;
/// - `pending_request` holds at most one request, the survivor of every merge
///   that arrived while an execution was in flight;
/// - `merge_window_deadline` is set exactly when `pending_merge_request` is.
#[derive(Debug, Default)]
pub struct CoalescerState {
    pub in_flight: Option<ExecutionKind>,
    pub pending_request: Option<RecoveryRequest>,
    pub merge_window_deadline: Option<Instant>,
    pub pending_merge_request: Option<RecoveryRequest>,
}

impl CoalescerState {
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }
}
