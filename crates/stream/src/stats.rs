use std::sync::Arc;

use pumpwatch_compute::{Detector, PipelineMetrics};
use pumpwatch_core::{InferenceResult, ScorerKind, SensorReading, StatusMode};
use serde::Serialize;

/// Static description of the detector behind a stream.
///
/// Refreshed on construction and reload only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectorInfo {
    pub scorer: ScorerKind,
    /// `LOADED` for a model, `SIMULATED` for the heuristic.
    pub model_status: &'static str,
    pub threshold: f64,
    pub status_mode: StatusMode,
    pub window_size: usize,
    pub features: Vec<String>,
}

impl DetectorInfo {
    pub fn of(detector: &Detector) -> Self {
        Self {
            scorer: detector.scorer_kind(),
            model_status: detector.scorer_kind().status_label(),
            threshold: detector.threshold(),
            status_mode: detector.status_mode(),
            window_size: detector.window_size(),
            features: detector.features().names().to_vec(),
        }
    }
}

/// Snapshot returned by `StreamCoordinator::get_statistics`.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatistics {
    pub total_processed: u64,
    /// Processed readings whose loss exceeded the threshold.
    pub total_anomalies: u64,
    /// Readings rejected because the queue was full.
    pub total_dropped: u64,
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub running: bool,
    pub last_reading: Option<SensorReading>,
    pub last_inference: Option<InferenceResult>,
    pub detector: DetectorInfo,
    pub metrics: PipelineMetrics,
}

/// What the consumer publishes after each reading.
///
/// Replaced as a unit under one lock so readers never see a result from
/// one reading paired with counters from another.
#[derive(Debug, Clone, Default)]
pub(crate) struct Published {
    pub total_processed: u64,
    pub total_anomalies: u64,
    pub reading: Option<Arc<SensorReading>>,
    pub inference: Option<Arc<InferenceResult>>,
    pub metrics: PipelineMetrics,
}
