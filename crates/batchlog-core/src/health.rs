//! Health check system for monitoring component status.
//!
//! The cache registers two components: `cache` (accepting events or shut
//! down) and `sink` (outcome of the most recent flush cycle).

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Component name for the event cache.
pub const COMPONENT_CACHE: &str = "cache";
/// Component name for the publish sink.
pub const COMPONENT_SINK: &str = "sink";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component status is unknown
    Unknown,
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

/// Health check manager for tracking component health.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentStatus>>,
    consecutive_sink_failures: RwLock<u32>,
}

/// Sink failures in a row before the sink is reported unhealthy.
const SINK_UNHEALTHY_AFTER: u32 = 3;

impl HealthCheck {
    /// Create a new health check manager.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            consecutive_sink_failures: RwLock::new(0),
        }
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        let mut components = self.components.write();
        components.insert(name.to_string(), ComponentStatus::Unknown);
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, name: &str) {
        let mut components = self.components.write();
        components.insert(name.to_string(), ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, name: &str, reason: &str) {
        let mut components = self.components.write();
        components.insert(
            name.to_string(),
            ComponentStatus::Degraded(reason.to_string()),
        );
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        let mut components = self.components.write();
        components.insert(
            name.to_string(),
            ComponentStatus::Unhealthy(reason.to_string()),
        );
    }

    /// Record a successful flush cycle.
    pub fn record_sink_success(&self) {
        *self.consecutive_sink_failures.write() = 0;
        self.mark_healthy(COMPONENT_SINK);
    }

    /// Record a failed flush cycle. The sink degrades on the first failure
    /// and turns unhealthy after repeated ones.
    pub fn record_sink_failure(&self, reason: &str) {
        let failures = {
            let mut failures = self.consecutive_sink_failures.write();
            *failures += 1;
            *failures
        };

        if failures >= SINK_UNHEALTHY_AFTER {
            self.mark_unhealthy(COMPONENT_SINK, reason);
        } else {
            self.mark_degraded(COMPONENT_SINK, reason);
        }
    }

    /// Get the status of a specific component.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        let components = self.components.read();
        components.get(name).cloned()
    }

    /// Get all component statuses.
    pub fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.components.read().clone()
    }

    /// Get overall system health status.
    pub fn overall_status(&self) -> HealthStatus {
        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the system is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_lifecycle() {
        let health = HealthCheck::new();

        health.register_component(COMPONENT_CACHE);
        health.register_component(COMPONENT_SINK);

        assert_eq!(
            health.get_component_status(COMPONENT_CACHE),
            Some(ComponentStatus::Unknown)
        );

        health.mark_healthy(COMPONENT_CACHE);
        health.mark_healthy(COMPONENT_SINK);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(COMPONENT_SINK, "slow uploads");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(COMPONENT_CACHE, "shut down");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());
    }

    #[test]
    fn test_health_check_default() {
        let health = HealthCheck::default();
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(health.is_operational());
        assert_eq!(health.get_component_status("unknown"), None);
    }

    #[test]
    fn test_sink_failures_escalate() {
        let health = HealthCheck::new();
        health.register_component(COMPONENT_SINK);

        health.record_sink_failure("timeout");
        assert_eq!(
            health.get_component_status(COMPONENT_SINK),
            Some(ComponentStatus::Degraded("timeout".to_string()))
        );

        health.record_sink_failure("timeout");
        health.record_sink_failure("timeout");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);

        // One success recovers
        health.record_sink_success();
        assert_eq!(
            health.get_component_status(COMPONENT_SINK),
            Some(ComponentStatus::Healthy)
        );

        health.record_sink_failure("timeout");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ComponentStatus::Degraded("slow".into())).unwrap();
        assert_eq!(json, r#"{"status":"degraded","reason":"slow"}"#);
        let json = serde_json::to_string(&ComponentStatus::Healthy).unwrap();
        assert_eq!(json, r#"{"status":"healthy"}"#);
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            r#""unhealthy""#
        );
    }
}
