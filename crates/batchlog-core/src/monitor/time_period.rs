//! Cut on a fixed period.

use super::BufferMonitor;
use crate::{Error, Result};
use std::time::Duration;
use tokio::time::Instant;

/// Cuts once `period` has elapsed since the last cut.
///
/// Registers a deadline so the cache cuts even when no events arrive.
#[derive(Debug, Clone)]
pub struct TimePeriodBasedBufferMonitor {
    period: Duration,
    last_cut: Instant,
}

impl TimePeriodBasedBufferMonitor {
    /// Create a period policy. `period` must be non-zero.
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::InvalidConfiguration(
                "flush period must be greater than zero".into(),
            ));
        }
        Ok(Self {
            period,
            last_cut: Instant::now(),
        })
    }

    /// Configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    fn is_due(&self) -> bool {
        self.last_cut.elapsed() >= self.period
    }
}

impl BufferMonitor for TimePeriodBasedBufferMonitor {
    fn on_event_added(&mut self, _current_size: usize) -> bool {
        self.is_due()
    }

    fn on_cut(&mut self) {
        self.last_cut = Instant::now();
    }

    fn next_deadline(&self) -> Option<Instant> {
        Some(self.last_cut + self.period)
    }

    fn name(&self) -> &'static str {
        "time_period"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_period_rejected() {
        assert!(matches!(
            TimePeriodBasedBufferMonitor::new(Duration::ZERO),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_after_period() {
        let mut monitor = TimePeriodBasedBufferMonitor::new(Duration::from_secs(3)).unwrap();
        assert!(!monitor.on_event_added(1));

        tokio::time::advance(Duration::from_millis(2999)).await;
        assert!(!monitor.on_event_added(2));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(monitor.on_event_added(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cut_moves_deadline() {
        let mut monitor = TimePeriodBasedBufferMonitor::new(Duration::from_secs(3)).unwrap();
        let first = monitor.next_deadline().unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        monitor.on_cut();

        let second = monitor.next_deadline().unwrap();
        assert_eq!(second - first, Duration::from_secs(4));
        assert!(!monitor.on_event_added(1));
    }
}
