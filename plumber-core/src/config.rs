//! Scheduler-core configuration knobs.
//!
//! The daemon's own CLI/env parsing is out of scope (spec §1); this is only
//! the handful of values the core itself owns.

/// Tuning knobs owned by the scheduler core.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Hint used to pre-size the ready queue's backing `VecDeque`.
    pub ready_queue_hint: usize,
    /// Capacity of each module's event queue (must be a power of two).
    pub equeue_capacity: usize,
    /// Whether a shutdown request drains in-flight requests before returning,
    /// or cancels them immediately.
    pub shutdown_drain: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ready_queue_hint: 64,
            equeue_capacity: 64,
            shutdown_drain: true,
        }
    }
}
