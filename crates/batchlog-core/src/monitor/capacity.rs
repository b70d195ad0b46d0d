//! Cut after a fixed number of events.

use super::BufferMonitor;
use crate::{Error, Result};

/// Cuts when the live buffer reaches `threshold` events.
#[derive(Debug, Clone)]
pub struct CapacityBasedBufferMonitor {
    threshold: usize,
    count: usize,
}

impl CapacityBasedBufferMonitor {
    /// Create a capacity policy. `threshold` must be greater than zero.
    pub fn new(threshold: usize) -> Result<Self> {
        if threshold == 0 {
            return Err(Error::InvalidConfiguration(
                "capacity threshold must be greater than zero".into(),
            ));
        }
        Ok(Self {
            threshold,
            count: 0,
        })
    }

    /// Configured threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl BufferMonitor for CapacityBasedBufferMonitor {
    fn on_event_added(&mut self, current_size: usize) -> bool {
        self.count = current_size;
        self.count >= self.threshold
    }

    fn on_cut(&mut self) {
        self.count = 0;
    }

    fn name(&self) -> &'static str {
        "capacity"
    }
}
