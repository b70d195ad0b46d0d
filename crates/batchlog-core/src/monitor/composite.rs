//! Several policies combined; whichever fires first cuts.

use super::BufferMonitor;
use crate::{Error, Result};
use tokio::time::Instant;

/// Cuts when any member policy asks for a cut.
#[derive(Debug)]
pub struct CompositeBufferMonitor {
    monitors: Vec<Box<dyn BufferMonitor>>,
}

impl CompositeBufferMonitor {
    /// Combine policies. At least one is required.
    pub fn new(monitors: Vec<Box<dyn BufferMonitor>>) -> Result<Self> {
        if monitors.is_empty() {
            return Err(Error::InvalidConfiguration(
                "composite trigger needs at least one policy".into(),
            ));
        }
        Ok(Self { monitors })
    }
}

impl BufferMonitor for CompositeBufferMonitor {
    fn on_event_added(&mut self, current_size: usize) -> bool {
        // Every member sees the event, no short-circuit.
        self.monitors
            .iter_mut()
            .fold(false, |cut, m| m.on_event_added(current_size) | cut)
    }

    fn on_cut(&mut self) {
        for monitor in &mut self.monitors {
            monitor.on_cut();
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.monitors.iter().filter_map(|m| m.next_deadline()).min()
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{CapacityBasedBufferMonitor, TimePeriodBasedBufferMonitor};
    use std::time::Duration;

    fn capacity_and_period() -> CompositeBufferMonitor {
        CompositeBufferMonitor::new(vec![
            Box::new(CapacityBasedBufferMonitor::new(5).unwrap()),
            Box::new(TimePeriodBasedBufferMonitor::new(Duration::from_secs(10)).unwrap()),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_rejected() {
        assert!(CompositeBufferMonitor::new(vec![]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_fires_first() {
        let mut monitor = capacity_and_period();
        for size in 1..5 {
            assert!(!monitor.on_event_added(size));
        }
        assert!(monitor.on_event_added(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_fires_first() {
        let mut monitor = capacity_and_period();
        assert!(!monitor.on_event_added(1));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(monitor.on_event_added(2));

        monitor.on_cut();
        assert!(!monitor.on_event_added(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_earliest_member() {
        let monitor = capacity_and_period();
        let deadline = monitor.next_deadline().unwrap();
        assert_eq!(deadline - Instant::now(), Duration::from_secs(10));
    }
}
