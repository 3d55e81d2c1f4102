//! Component health for the source and the lake.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Health component name for the Kafka source.
pub const COMPONENT_KAFKA: &str = "kafka";

/// Health component name for the lake.
pub const COMPONENT_LAKE: &str = "lake";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Operational but impaired
    Degraded(String),
    Unhealthy(String),
    /// Not exercised yet
    Unknown,
}

/// Overall status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Serializable snapshot served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: BTreeMap<String, ComponentStatus>,
    pub sync_running: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct SyncState {
    running: bool,
    last_success: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

/// Tracks component health and sync progress.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentStatus>>,
    sync: RwLock<SyncState>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            sync: RwLock::new(SyncState::default()),
        }
    }

    /// Health check with the `kafka` and `lake` components registered.
    pub fn for_sync() -> Self {
        let health = Self::new();
        health.register_component(COMPONENT_KAFKA);
        health.register_component(COMPONENT_LAKE);
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    pub fn mark_healthy(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Healthy);
    }

    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.components.write().insert(
            name.to_string(),
            ComponentStatus::Degraded(reason.to_string()),
        );
    }

    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.components.write().insert(
            name.to_string(),
            ComponentStatus::Unhealthy(reason.to_string()),
        );
    }

    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Unhealthy if any component is unhealthy, degraded if any is degraded.
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

    /// Ready once every registered component has been seen healthy.
    pub fn is_ready(&self) -> bool {
        let components = self.components.read();
        !components.is_empty()
            && components
                .values()
                .all(|s| matches!(s, ComponentStatus::Healthy | ComponentStatus::Degraded(_)))
    }

    pub fn sync_started(&self) {
        self.sync.write().running = true;
    }

    /// Mark the current sync as finished.
    pub fn sync_finished(&self, success: bool) {
        let mut sync = self.sync.write();
        sync.running = false;
        if success {
            sync.last_success = Some(Utc::now());
            sync.consecutive_failures = 0;
        } else {
            sync.consecutive_failures += 1;
        }
    }

    pub fn is_sync_running(&self) -> bool {
        self.sync.read().running
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.sync.read().last_success
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.sync.read().consecutive_failures
    }

    pub fn report(&self) -> HealthReport {
        let sync = self.sync.read();
        HealthReport {
            status: self.overall_status(),
            components: self
                .components
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            sync_running: sync.running,
            last_success: sync.last_success,
            consecutive_failures: sync.consecutive_failures,
        }
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
        let health = HealthCheck::for_sync();

        assert_eq!(
            health.get_component_status(COMPONENT_KAFKA),
            Some(ComponentStatus::Unknown)
        );
        assert!(!health.is_ready());

        health.mark_healthy(COMPONENT_KAFKA);
        health.mark_healthy(COMPONENT_LAKE);
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(health.is_ready());

        health.mark_degraded(COMPONENT_KAFKA, "slow watermarks");
        assert_eq!(health.overall_status(), HealthStatus::Degraded);
        assert!(health.is_operational());

        health.mark_unhealthy(COMPONENT_LAKE, "disk full");
        assert_eq!(health.overall_status(), HealthStatus::Unhealthy);
        assert!(!health.is_operational());
        assert!(!health.is_ready());
    }

    #[test]
    fn test_health_check_default() {
        let health = HealthCheck::default();
        assert_eq!(health.overall_status(), HealthStatus::Healthy);
        assert!(!health.is_ready());
        assert_eq!(health.get_component_status("unknown"), None);
    }

    #[test]
    fn test_sync_lifecycle() {
        let health = HealthCheck::new();
        assert!(!health.is_sync_running());

        health.sync_started();
        assert!(health.is_sync_running());

        health.sync_finished(false);
        health.sync_started();
        health.sync_finished(false);
        assert!(!health.is_sync_running());
        assert_eq!(health.consecutive_failures(), 2);
        assert!(health.last_success().is_none());

        health.sync_started();
        health.sync_finished(true);
        assert_eq!(health.consecutive_failures(), 0);
        assert!(health.last_success().is_some());
    }

    #[test]
    fn test_report_serializes() {
        let health = HealthCheck::for_sync();
        health.mark_healthy(COMPONENT_KAFKA);
        health.mark_unhealthy(COMPONENT_LAKE, "journal corrupted");

        let json = serde_json::to_value(health.report()).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["components"]["kafka"]["status"], "healthy");
        assert_eq!(json["components"]["lake"]["reason"], "journal corrupted");
        assert_eq!(json["sync_running"], false);
    }
}
