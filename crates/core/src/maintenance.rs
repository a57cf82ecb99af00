use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type recorded for maintenance raised by the detector.
pub const EVENT_TYPE_ANOMALY_DETECTED: &str = "ANOMALY_DETECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    High,
    Critical,
}

impl Severity {
    /// Factor applied to a sensor's base maintenance cost.
    pub fn cost_multiplier(&self) -> f64 {
        match self {
            Severity::High => 1.2,
            Severity::Critical => 1.5,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => f.write_str("HIGH"),
            Severity::Critical => f.write_str("CRITICAL"),
        }
    }
}

/// A maintenance request raised for one sensor.
///
/// Created unresolved; only an external collaborator resolves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceEvent {
    pub id: Uuid,
    pub event_type: String,
    pub sensor_name: String,
    pub severity: Severity,
    /// Raw sensor value that triggered the event.
    pub value: f64,
    pub critical_threshold: f64,
    pub estimated_cost: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

impl MaintenanceEvent {
    pub fn new(
        sensor_name: impl Into<String>,
        severity: Severity,
        value: f64,
        critical_threshold: f64,
        estimated_cost: f64,
    ) -> Self {
        let sensor_name = sensor_name.into();
        let description = format!(
            "{} showing anomalous behavior. Current value: {:.2}",
            sensor_name, value
        );
        Self {
            id: Uuid::new_v4(),
            event_type: EVENT_TYPE_ANOMALY_DETECTED.to_string(),
            sensor_name,
            severity,
            value,
            critical_threshold,
            estimated_cost,
            description,
            created_at: Utc::now(),
            resolved: false,
        }
    }
}
