//! Trigger policies deciding when the live buffer is cut.
//!
//! A policy only answers "cut now?"; it never sees the buffer itself. Policies
//! that need time to pass without any `add` call expose a deadline, and the
//! cache runs a background timer for them.

mod capacity;
mod composite;
mod time_period;

pub use capacity::CapacityBasedBufferMonitor;
pub use composite::CompositeBufferMonitor;
pub use time_period::TimePeriodBasedBufferMonitor;

use crate::config::TriggerConfig;
use crate::{Error, Result};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Rule deciding when the live buffer should be cut and flushed.
///
/// Called only from inside the cache's critical section, so implementations
/// need no internal locking.
pub trait BufferMonitor: Send + fmt::Debug {
    /// Record that the live buffer now holds `current_size` events.
    /// Returns true if the buffer should be cut now.
    fn on_event_added(&mut self, current_size: usize) -> bool;

    /// Reset after a cut.
    fn on_cut(&mut self);

    /// When the cache's background timer should next request a cut.
    /// `None` means the policy is purely event-driven.
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    /// Policy name for logs.
    fn name(&self) -> &'static str;
}

/// Build the policy described by a `[trigger]` table.
///
/// Capacity only, period only, or both combined as "whichever comes first".
pub fn build_monitor(config: &TriggerConfig) -> Result<Box<dyn BufferMonitor>> {
    let mut monitors: Vec<Box<dyn BufferMonitor>> = Vec::new();

    if let Some(capacity) = config.capacity {
        monitors.push(Box::new(CapacityBasedBufferMonitor::new(capacity)?));
    }
    if let Some(seconds) = config.period_seconds {
        monitors.push(Box::new(TimePeriodBasedBufferMonitor::new(
            Duration::from_secs(seconds),
        )?));
    }

    match monitors.len() {
        0 => Err(Error::InvalidConfiguration(
            "trigger requires capacity, period_seconds, or both".into(),
        )),
        1 => Ok(monitors.remove(0)),
        _ => Ok(Box::new(CompositeBufferMonitor::new(monitors)?)),
    }
}
