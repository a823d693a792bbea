//! Component health tracking for the publisher.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Component name for the row source.
pub const SOURCE_COMPONENT: &str = "source";

/// Component name for the event sink.
pub const SINK_COMPONENT: &str = "sink";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
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

impl ComponentStatus {
    /// Label used in health responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded(_) => "degraded",
            ComponentStatus::Unhealthy(_) => "unhealthy",
            ComponentStatus::Unknown => "unknown",
        }
    }

    /// Reason attached to a degraded or unhealthy status.
    pub fn message(&self) -> Option<&str> {
        match self {
            ComponentStatus::Degraded(msg) | ComponentStatus::Unhealthy(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Tracks component health and whether a publish run is in progress.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentStatus>>,
    created_at: Instant,
    job_running: RwLock<bool>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            created_at: Instant::now(),
            job_running: RwLock::new(false),
        }
    }

    /// Health check with the `source` and `sink` components registered.
    pub fn for_publisher() -> Self {
        let health = Self::new();
        health.register_component(SOURCE_COMPONENT);
        health.register_component(SINK_COMPONENT);
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        self.components.write().insert(name.to_string(), status);
    }

    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    pub fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.components.read().clone()
    }

    /// Worst status across all components. Unknown components count as healthy.
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

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    pub fn job_started(&self) {
        *self.job_running.write() = true;
    }

    pub fn job_completed(&self) {
        *self.job_running.write() = false;
    }

    pub fn is_job_running(&self) -> bool {
        *self.job_running.read()
    }

    pub fn uptime(&self) -> Duration {
        self.created_at.elapsed()
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
    fn test_publisher_components_start_unknown() {
        let health = HealthCheck::for_publisher();
        assert_eq!(
            health.get_component_status(SOURCE_COMPONENT),
            Some(ComponentStatus::Unknown)
        );
        assert_eq!(
            health.get_component_status(SINK_COMPONENT),
            Some(ComponentStatus::Unknown)
        );
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(!health.is_job_running());
    }

    #[test]
    fn test_health_status_priority() {
        let health = HealthCheck::for_publisher();
        health.mark_healthy(SOURCE_COMPONENT);
        health.mark_healthy(SINK_COMPONENT);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);

        health.mark_degraded(SINK_COMPONENT, "3 envelopes undelivered");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(SOURCE_COMPONENT, "query failed");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());

        health.mark_healthy(SOURCE_COMPONENT);
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
    }

    #[test]
    fn test_status_labels() {
        let degraded = ComponentStatus::Degraded("slow".into());
        assert_eq!(degraded.as_str(), "degraded");
        assert_eq!(degraded.message(), Some("slow"));
        assert_eq!(ComponentStatus::Healthy.message(), None);
        assert_eq!(ComponentStatus::Unknown.as_str(), "unknown");
        assert_eq!(HealthStatus::Unhealthy.as_str(), "unhealthy");
    }

    #[test]
    fn test_job_lifecycle() {
        let health = HealthCheck::default();
        health.job_started();
        assert!(health.is_job_running());
        health.job_completed();
        assert!(!health.is_job_running());
    }
}
