//! Anomaly decisions and edge-triggered counting.
//!
//! Turns a [`Score`] into a system status and per-feature states, and keeps
//! the counters that survive between readings: previous per-feature state,
//! cumulative NORMAL -> ANOMALY transitions per feature, and the system-level
//! anomaly log used for the rolling one-hour count.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use pumpwatch_core::{FeatureSet, FeatureState, StatusMode, SystemStatus};

use super::scoring::Score;

/// A feature is anomalous when its error exceeds this multiple of its even
/// share of the system threshold.
pub const FEATURE_SENSITIVITY: f64 = 1.5;

/// Retention of the system-level anomaly log.
pub const RECENT_WINDOW_SECS: i64 = 3600;

/// Per-reading decision, before it is wrapped into an `InferenceResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub status: SystemStatus,
    pub is_anomaly: bool,
    pub loss: f64,
    pub states: Vec<FeatureState>,
    pub degraded: bool,
}

/// Mutable decision state for one detector.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    width: usize,
    threshold: f64,
    mode: StatusMode,
    previous: Vec<FeatureState>,
    counts: Vec<u64>,
    total_anomalies: u64,
    anomaly_log: VecDeque<DateTime<Utc>>,
}

impl DecisionEngine {
    pub fn new(features: &FeatureSet, threshold: f64, mode: StatusMode) -> Self {
        let width = features.len();
        Self {
            width,
            threshold,
            mode,
            previous: vec![FeatureState::Normal; width],
            counts: vec![0; width],
            total_anomalies: 0,
            anomaly_log: VecDeque::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    pub fn mode(&self) -> StatusMode {
        self.mode
    }

    /// Per-feature error above which a feature is flagged.
    pub fn feature_threshold(&self) -> f64 {
        self.threshold / self.width as f64 * FEATURE_SENSITIVITY
    }

    /// Decide on a scored window and advance the counters.
    pub fn decide(&mut self, score: &Score, now: DateTime<Utc>) -> Verdict {
        if score.degraded {
            return self.degraded(now);
        }

        let loss = score.loss;
        let is_anomaly = loss > self.threshold;
        let status = self.mode.classify(loss, self.threshold);

        let limit = self.feature_threshold();
        let states: Vec<FeatureState> = (0..self.width)
            .map(|i| {
                let error = score.per_feature.get(i).copied().unwrap_or(0.0);
                if error > limit {
                    FeatureState::Anomaly
                } else {
                    FeatureState::Normal
                }
            })
            .collect();

        for (i, state) in states.iter().enumerate() {
            if state.is_anomaly() && !self.previous[i].is_anomaly() {
                self.counts[i] += 1;
            }
            self.previous[i] = *state;
        }

        if is_anomaly {
            self.total_anomalies += 1;
            self.anomaly_log.push_back(now);
        }
        self.prune(now);

        Verdict {
            status,
            is_anomaly,
            loss,
            states,
            degraded: false,
        }
    }

    /// Verdict while the window is still filling. Counters are untouched.
    pub fn warm_up(&mut self, now: DateTime<Utc>) -> Verdict {
        self.prune(now);
        Verdict {
            status: SystemStatus::Learning,
            is_anomaly: false,
            loss: 0.0,
            states: vec![FeatureState::Normal; self.width],
            degraded: false,
        }
    }

    /// Neutral verdict for a reading the scorer could not handle.
    ///
    /// Previous states and counts are left as they were so a transient
    /// failure cannot fabricate a NORMAL -> ANOMALY edge.
    fn degraded(&mut self, now: DateTime<Utc>) -> Verdict {
        self.prune(now);
        Verdict {
            status: SystemStatus::Normal,
            is_anomaly: false,
            loss: 0.0,
            states: vec![FeatureState::Normal; self.width],
            degraded: true,
        }
    }

    /// Drop log entries older than the recent window.
    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::seconds(RECENT_WINDOW_SECS);
        self.anomaly_log.retain(|t| *t > cutoff);
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn previous_states(&self) -> &[FeatureState] {
        &self.previous
    }

    pub fn total_anomalies(&self) -> u64 {
        self.total_anomalies
    }

    pub fn recent_anomalies(&self) -> u64 {
        self.anomaly_log.len() as u64
    }

    /// Back to the freshly constructed state. Threshold and mode are kept.
    pub fn reset(&mut self) {
        self.previous.fill(FeatureState::Normal);
        self.counts.fill(0);
        self.total_anomalies = 0;
        self.anomaly_log.clear();
    }
}
