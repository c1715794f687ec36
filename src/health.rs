use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::messaging::RedpandaClient;
use crate::metrics::Metrics;
use crate::utils::CircuitState;

// ============================================================================
// Health Registry
// ============================================================================
//
// Components push their status here; /health reads an aggregate:
//
//   any Unhealthy  -> Unhealthy (503)
//   any Degraded   -> Degraded  (200)
//   otherwise      -> Healthy   (200)
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// Degraded still serves traffic
    pub fn is_operational(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy(_))
    }
}

impl From<CircuitState> for HealthStatus {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen => HealthStatus::Degraded("Circuit breaker half-open".to_string()),
            CircuitState::Open => HealthStatus::Unhealthy("Circuit breaker open".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct HealthRegistry {
    components: RwLock<HashMap<String, ComponentHealth>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, component: &str, status: HealthStatus) {
        tracing::debug!(component, status = ?status, "Updated component health");

        let health = ComponentHealth {
            name: component.to_string(),
            status,
            last_check: Utc::now(),
        };

        // A poisoned lock still holds a usable map
        let mut components = self.components.write().unwrap_or_else(|e| e.into_inner());
        components.insert(component.to_string(), health);
    }

    pub fn report(&self) -> HealthReport {
        let components = self.components.read().unwrap_or_else(|e| e.into_inner());

        let mut listed: Vec<ComponentHealth> = components.values().cloned().collect();
        listed.sort_by(|a, b| a.name.cmp(&b.name));

        HealthReport {
            status: overall_status(&listed),
            components: listed,
            check_time: Utc::now(),
        }
    }
}

fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
    let unhealthy: Vec<String> = components
        .iter()
        .filter_map(|c| match &c.status {
            HealthStatus::Unhealthy(msg) => Some(format!("{}: {}", c.name, msg)),
            _ => None,
        })
        .collect();

    if !unhealthy.is_empty() {
        HealthStatus::Unhealthy(unhealthy.join(", "))
    } else if components.iter().any(|c| matches!(c.status, HealthStatus::Degraded(_))) {
        HealthStatus::Degraded("Some components degraded".to_string())
    } else {
        HealthStatus::Healthy
    }
}

/// Poll the Redpanda circuit breaker and mirror it into health and metrics
pub fn spawn_breaker_monitor(
    health: Arc<HealthRegistry>,
    redpanda: Arc<RedpandaClient>,
    metrics: Option<Arc<Metrics>>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;

            let state = redpanda.get_circuit_breaker_state().await;
            if let Some(metrics) = &metrics {
                metrics.update_circuit_breaker_state(state.code());
            }
            health.update("redpanda", state.into());
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_healthy() {
        let report = HealthRegistry::new().report();
        assert!(report.status.is_healthy());
        assert!(report.components.is_empty());
    }

    #[test]
    fn test_unhealthy_component_wins() {
        let registry = HealthRegistry::new();
        registry.update("scylla", HealthStatus::Healthy);
        registry.update("redpanda", CircuitState::HalfOpen.into());

        let report = registry.report();
        assert!(matches!(report.status, HealthStatus::Degraded(_)));
        assert!(report.status.is_operational());

        registry.update("redis", HealthStatus::Unhealthy("connection refused".to_string()));
        let report = registry.report();
        assert!(!report.status.is_operational());
        assert_eq!(
            report.status,
            HealthStatus::Unhealthy("redis: connection refused".to_string())
        );
        assert_eq!(report.components.first().map(|c| c.name.as_str()), Some("redis"));
    }

    #[test]
    fn test_report_serializes_status_tag() {
        let registry = HealthRegistry::new();
        registry.update("redpanda", CircuitState::Open.into());

        let json = serde_json::to_value(registry.report()).unwrap();
        assert_eq!(json["status"]["state"], "unhealthy");
        assert_eq!(json["components"][0]["status"]["reason"], "Circuit breaker open");
    }
}
