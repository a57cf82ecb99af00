use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// System-level verdict attached to every inference result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    /// Window not yet full; no verdict.
    Learning,
    Normal,
    /// Loss above the threshold but within twice the threshold.
    Warning,
    /// Loss above twice the threshold.
    Critical,
    /// Loss above the threshold (binary labelling mode).
    Anomaly,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Learning => "LEARNING",
            SystemStatus::Normal => "NORMAL",
            SystemStatus::Warning => "WARNING",
            SystemStatus::Critical => "CRITICAL",
            SystemStatus::Anomaly => "ANOMALY",
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sensor binary state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeatureState {
    #[default]
    Normal,
    Anomaly,
}

impl FeatureState {
    pub fn is_anomaly(&self) -> bool {
        matches!(self, FeatureState::Anomaly)
    }
}

impl fmt::Display for FeatureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureState::Normal => f.write_str("NORMAL"),
            FeatureState::Anomaly => f.write_str("ANOMALY"),
        }
    }
}

/// How a scored loss is turned into a [`SystemStatus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusMode {
    /// NORMAL / WARNING / CRITICAL by multiples of the threshold.
    #[default]
    Tiered,
    /// NORMAL / ANOMALY on the threshold alone.
    Binary,
}

impl StatusMode {
    /// Label a scored loss. `loss` is assumed non-negative.
    pub fn classify(&self, loss: f64, threshold: f64) -> SystemStatus {
        match self {
            StatusMode::Tiered => {
                if loss <= threshold {
                    SystemStatus::Normal
                } else if loss <= 2.0 * threshold {
                    SystemStatus::Warning
                } else {
                    SystemStatus::Critical
                }
            }
            StatusMode::Binary => {
                if loss > threshold {
                    SystemStatus::Anomaly
                } else {
                    SystemStatus::Normal
                }
            }
        }
    }
}

impl FromStr for StatusMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tiered" => Ok(StatusMode::Tiered),
            "binary" => Ok(StatusMode::Binary),
            other => Err(CoreError::Config(format!("unknown status mode: {other}"))),
        }
    }
}

impl fmt::Display for StatusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusMode::Tiered => f.write_str("tiered"),
            StatusMode::Binary => f.write_str("binary"),
        }
    }
}

/// Which scorer variant produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerKind {
    /// Pretrained reconstruction model.
    Model,
    /// Rolling mean/deviation fallback.
    Heuristic,
}

impl ScorerKind {
    /// Operator-facing model status label.
    pub fn status_label(&self) -> &'static str {
        match self {
            ScorerKind::Model => "LOADED",
            ScorerKind::Heuristic => "SIMULATED",
        }
    }
}

impl fmt::Display for ScorerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScorerKind::Model => f.write_str("model"),
            ScorerKind::Heuristic => f.write_str("heuristic"),
        }
    }
}

/// Immutable snapshot produced for every processed reading.
///
/// Maps are keyed by feature name and iterate in feature-set order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub status: SystemStatus,
    /// `reconstruction_loss > threshold`, independent of the status label.
    pub is_anomaly: bool,
    pub reconstruction_loss: f64,
    pub threshold: f64,
    pub sensor_states: IndexMap<String, FeatureState>,
    /// Cumulative NORMAL -> ANOMALY transitions per sensor.
    pub sensor_anomaly_counts: IndexMap<String, u64>,
    pub total_anomalies: u64,
    /// System-level anomalies within the last hour.
    pub recent_anomalies: u64,
    /// Wall time spent in the detector for this reading.
    pub latency_ms: f64,
    /// Scorer failed for this reading and a neutral result was substituted.
    pub degraded: bool,
    pub scorer: ScorerKind,
    pub timestamp: DateTime<Utc>,
}

impl InferenceResult {
    pub fn is_learning(&self) -> bool {
        self.status == SystemStatus::Learning
    }

    pub fn sensor_state(&self, sensor: &str) -> Option<FeatureState> {
        self.sensor_states.get(sensor).copied()
    }

    pub fn sensor_count(&self, sensor: &str) -> u64 {
        self.sensor_anomaly_counts.get(sensor).copied().unwrap_or(0)
    }

    /// Sensors currently flagged, in feature order.
    pub fn anomalous_sensors(&self) -> impl Iterator<Item = &str> {
        self.sensor_states
            .iter()
            .filter(|(_, state)| state.is_anomaly())
            .map(|(name, _)| name.as_str())
    }
}
