//! Recovery coordinator.
//!
//! A single actor task owns all coordination state: the coalescer slots, the
//! debounce clocks and the fallback timer. Producers reach it only through a
//! [`RecoveryHandle`], which enqueues raw triggers on an unbounded channel and
//! returns immediately.
//!
//! # Architecture
//!
//! - Single-flight: at most one engine call in progress at any time
//! - Merging, not queueing: bursts collapse into one surviving request
//! - Engine work and fallback timers run in spawned tasks that report back
//!   as messages
//!
//! # Module Structure
//!
//! - [`message`]: Messages processed by the actor
//! - [`state`]: Coalescer slots
//! - [`coalescer`]: Synchronous decision logic
//! - [`worker`]: The actor's event loop
//! - [`handle`]: Spawning and the public handle

mod coalescer;
mod handle;
mod message;
mod state;
mod worker;


pub use coalescer::{CoordinatorCore, Dispatch, Finished};
pub use handle::{CoordinatorConfig, RecoveryHandle, spawn_coordinator};
pub use message::CoordinatorMessage;
pub use state::CoalescerState;
pub use worker::RecoveryWorker;
