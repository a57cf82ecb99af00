use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Detector performance metrics, updated incrementally per reading.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineMetrics {
    /// Readings handed to the detector since construction or the last reset.
    pub readings_processed: u64,
    /// Readings that arrived while the window was still filling.
    pub warmup_readings: u64,
    /// Readings that went through a scorer.
    pub scored_readings: u64,
    /// Scored readings where the scorer failed and a neutral result was used.
    pub degraded_readings: u64,
    /// Average detector latency per scored reading in milliseconds.
    pub avg_latency_ms: f64,
    pub last_latency_ms: f64,
    pub last_processed: Option<DateTime<Utc>>,

    #[serde(skip)]
    total_latency_ms: f64,
}

/// How a reading left the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    WarmUp,
    Scored,
    Degraded,
}

impl PipelineMetrics {
    pub fn record(&mut self, outcome: Outcome, elapsed: Duration, at: DateTime<Utc>) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        self.readings_processed += 1;
        self.last_latency_ms = elapsed_ms;
        self.last_processed = Some(at);

        match outcome {
            Outcome::WarmUp => {
                self.warmup_readings += 1;
                return;
            }
            Outcome::Scored => {}
            Outcome::Degraded => self.degraded_readings += 1,
        }

        self.scored_readings += 1;
        self.total_latency_ms += elapsed_ms;
        self.avg_latency_ms = self.total_latency_ms / self.scored_readings as f64;
    }

    /// Start timing one reading.
    pub fn timer(&self) -> ReadingTimer {
        ReadingTimer {
            start: Instant::now(),
        }
    }
}

/// A scoped timer for one pass through the detector.
pub struct ReadingTimer {
    start: Instant,
}

impl ReadingTimer {
    /// Finalize the timer and record metrics. Returns the elapsed milliseconds.
    pub fn finish(self, metrics: &mut PipelineMetrics, outcome: Outcome, at: DateTime<Utc>) -> f64 {
        let elapsed = self.start.elapsed();
        metrics.record(outcome, elapsed, at);
        elapsed.as_secs_f64() * 1000.0
    }
}
