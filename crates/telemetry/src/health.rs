// Path: crates/telemetry/src/health.rs

//! Health report types served on `/healthz`.

use serde::{Deserialize, Serialize};

/// The aggregate health of the node or one of its components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Fully operational.
    Up,
    /// Operational with reduced capability (e.g. a breaker open).
    Degraded,
    /// Not operational.
    Down,
}

/// One named component check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Component name, e.g. `"consensus"` or `"breaker:consensus_submit"`.
    pub name: String,
    /// The component's status.
    pub status: HealthStatus,
    /// Optional component-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// The full health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// The reporting service.
    pub service_name: String,
    /// Aggregate status: the worst status among `checks`.
    pub status: HealthStatus,
    /// Seconds since the node started.
    pub uptime_s: u64,
    /// Per-component checks.
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Builds a report whose aggregate status is the worst check status.
    pub fn aggregate(service_name: String, uptime_s: u64, checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Up, |acc, s| match (acc, s) {
                (HealthStatus::Down, _) | (_, HealthStatus::Down) => HealthStatus::Down,
                (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => {
                    HealthStatus::Degraded
                }
                _ => HealthStatus::Up,
            });
        Self {
            service_name,
            status,
            uptime_s,
            checks,
        }
    }
}

/// A source of health reports, implemented by the node supervisor.
pub trait HealthSource: Send + Sync {
    /// Produces the current report.
    fn report(&self) -> HealthReport;
}
