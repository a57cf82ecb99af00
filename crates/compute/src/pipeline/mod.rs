//! Windowed anomaly detector.
//!
//! Wires the per-reading stages together:
//!
//! - **Extract**: project the raw reading onto the feature set.
//! - **Window**: push into the fixed-size history; LEARNING until full.
//! - **Score**: run the configured scorer over the full window.
//! - **Decide**: status, per-feature states, edge-triggered counts.
//! - **Maintain**: raise deduplicated maintenance events.
//!
//! A [`Detector`] owns all mutable state for one stream. It is not shared
//! between consumers; the stream coordinator serialises access to it.

pub mod decision;
pub mod features;
pub mod maintenance;
pub mod metrics;
pub mod scoring;
pub mod window;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tracing::{debug, info};

use pumpwatch_core::{
    Config, CoreError, FeatureSet, InferenceResult, MaintenanceEvent, ScorerKind, SensorReading,
    StatusMode,
};

use self::decision::{DecisionEngine, Verdict};
use self::maintenance::MaintenanceEvaluator;
use self::metrics::{Outcome, PipelineMetrics};
use self::scoring::{HeuristicScorer, Scorer};
use self::window::WindowBuffer;

/// Everything the detector produced for one reading.
#[derive(Debug, Clone)]
pub struct DetectorOutput {
    pub result: InferenceResult,
    /// Maintenance events created by this reading (already deduplicated).
    pub maintenance: Vec<MaintenanceEvent>,
}

/// Stateful anomaly detector for one stream of readings.
pub struct Detector {
    features: FeatureSet,
    window: WindowBuffer,
    scorer: Box<dyn Scorer>,
    decision: DecisionEngine,
    maintenance: MaintenanceEvaluator,
    /// Detector performance metrics.
    pub metrics: PipelineMetrics,
}

fn check_threshold(threshold: f64) -> Result<f64, CoreError> {
    if threshold.is_finite() && threshold > 0.0 {
        Ok(threshold)
    } else {
        Err(CoreError::Config(format!(
            "anomaly threshold must be a positive number, got {threshold}"
        )))
    }
}

impl Detector {
    pub fn new(
        features: FeatureSet,
        window_size: usize,
        threshold: f64,
        mode: StatusMode,
        scorer: Box<dyn Scorer>,
    ) -> Result<Self, CoreError> {
        let threshold = check_threshold(threshold)?;
        let window = WindowBuffer::new(window_size, features.len())?;
        let decision = DecisionEngine::new(&features, threshold, mode);

        info!(
            features = features.len(),
            window_size,
            threshold,
            mode = %mode,
            scorer = %scorer.kind(),
            model_status = scorer.kind().status_label(),
            "detector initialized"
        );

        Ok(Self {
            features,
            window,
            scorer,
            decision,
            maintenance: MaintenanceEvaluator::pump(),
            metrics: PipelineMetrics::default(),
        })
    }

    /// Heuristic detector with the scorer's default threshold and tiered status.
    pub fn heuristic(features: FeatureSet, window_size: usize) -> Result<Self, CoreError> {
        let scorer = HeuristicScorer::new();
        let threshold = scorer.default_threshold();
        Self::new(
            features,
            window_size,
            threshold,
            StatusMode::Tiered,
            Box::new(scorer),
        )
    }

    /// Build from loaded configuration. The threshold is resolved against
    /// the scorer's default.
    pub fn from_config(
        config: &Config,
        features: FeatureSet,
        scorer: Box<dyn Scorer>,
    ) -> Result<Self, CoreError> {
        let threshold = config.resolve_threshold(scorer.default_threshold());
        Self::new(
            features,
            config.detector.window_size,
            threshold,
            config.detector.status_mode,
            scorer,
        )
    }

    pub fn with_maintenance(mut self, evaluator: MaintenanceEvaluator) -> Self {
        self.maintenance = evaluator;
        self
    }

    /// Run one reading through the pipeline, stamped with the current time.
    pub fn process(&mut self, reading: &SensorReading) -> DetectorOutput {
        self.process_at(reading, Utc::now())
    }

    /// Run one reading through the pipeline as if it arrived at `now`.
    pub fn process_at(&mut self, reading: &SensorReading, now: DateTime<Utc>) -> DetectorOutput {
        let timer = self.metrics.timer();

        let was_ready = self.window.is_ready();
        self.window.push(features::extract(reading, &self.features));

        let (verdict, outcome) = if self.window.is_ready() {
            if !was_ready {
                info!(window_size = self.window.capacity(), "window full, scoring started");
            }
            let score = self.scorer.score(&self.window);
            let outcome = if score.degraded {
                Outcome::Degraded
            } else {
                Outcome::Scored
            };
            (self.decision.decide(&score, now), outcome)
        } else {
            (self.decision.warm_up(now), Outcome::WarmUp)
        };

        let mut result = self.build_result(verdict, now);
        let maintenance = self.maintenance.evaluate(reading, &result);
        let latency_ms = timer.finish(&mut self.metrics, outcome, now);
        result.latency_ms = latency_ms;

        debug!(
            status = %result.status,
            loss = result.reconstruction_loss,
            flagged = result.anomalous_sensors().count(),
            latency_ms,
            "reading processed"
        );

        DetectorOutput {
            result,
            maintenance,
        }
    }

    /// Assemble the result. Latency is filled in once every stage has run.
    fn build_result(&self, verdict: Verdict, now: DateTime<Utc>) -> InferenceResult {
        let sensor_states: IndexMap<String, _> = self
            .features
            .names()
            .iter()
            .cloned()
            .zip(verdict.states)
            .collect();
        let sensor_anomaly_counts: IndexMap<String, u64> = self
            .features
            .names()
            .iter()
            .cloned()
            .zip(self.decision.counts().iter().copied())
            .collect();

        InferenceResult {
            status: verdict.status,
            is_anomaly: verdict.is_anomaly,
            reconstruction_loss: verdict.loss,
            threshold: self.decision.threshold(),
            sensor_states,
            sensor_anomaly_counts,
            total_anomalies: self.decision.total_anomalies(),
            recent_anomalies: self.decision.recent_anomalies(),
            latency_ms: 0.0,
            degraded: verdict.degraded,
            scorer: self.scorer.kind(),
            timestamp: now,
        }
    }

    /// Clear the window, per-feature state, counters and metrics.
    ///
    /// Threshold, scorer and open maintenance events are kept.
    pub fn reset(&mut self) {
        self.window.clear();
        self.decision.reset();
        self.metrics = PipelineMetrics::default();
        info!("detector reset");
    }

    /// Swap the scorer and start over. `None` uses the new scorer's default threshold.
    pub fn reload(&mut self, scorer: Box<dyn Scorer>, threshold: Option<f64>) -> Result<(), CoreError> {
        let threshold = check_threshold(threshold.unwrap_or_else(|| scorer.default_threshold()))?;
        info!(
            scorer = %scorer.kind(),
            model_status = scorer.kind().status_label(),
            threshold,
            "detector reloaded"
        );
        self.scorer = scorer;
        self.decision.set_threshold(threshold);
        self.reset();
        Ok(())
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn threshold(&self) -> f64 {
        self.decision.threshold()
    }

    pub fn status_mode(&self) -> StatusMode {
        self.decision.mode()
    }

    pub fn scorer_kind(&self) -> ScorerKind {
        self.scorer.kind()
    }

    pub fn window_size(&self) -> usize {
        self.window.capacity()
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn is_warmed_up(&self) -> bool {
        self.window.is_ready()
    }

    pub fn maintenance(&self) -> &MaintenanceEvaluator {
        &self.maintenance
    }

    pub fn maintenance_mut(&mut self) -> &mut MaintenanceEvaluator {
        &mut self.maintenance
    }
}
