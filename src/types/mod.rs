//! Core domain types for recovery coordination.
//!
//! Reasons and requests are plain values: classification is a pure function
//! and merging produces new requests rather than mutating queued ones.

pub mod reason;
pub mod request;

pub use reason::{Lane, RecoveryReason, classify};
pub use request::{RecoveryRequest, choose_higher_priority, merge_into};
