use pumpwatch_core::ScorerKind;

use super::{Score, ScoreError, Scorer};
use crate::pipeline::window::WindowBuffer;

/// Loss above which the heuristic calls the window anomalous when no
/// threshold is configured. The loss is a mean z-score.
pub const HEURISTIC_DEFAULT_THRESHOLD: f64 = 3.0;

/// Floor for the window standard deviation.
const STD_EPSILON: f64 = 1e-6;

/// Statistical fallback used when no model is available.
///
/// For each feature, z = |latest − window mean| / max(window std, ε). The
/// per-feature error is the feature's share of the loss, `z / width`, so the
/// loss (their sum) is the mean z-score across features. Deterministic.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    epsilon: f64,
}

impl HeuristicScorer {
    pub fn new() -> Self {
        Self {
            epsilon: STD_EPSILON,
        }
    }
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl Scorer for HeuristicScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Heuristic
    }

    fn default_threshold(&self) -> f64 {
        HEURISTIC_DEFAULT_THRESHOLD
    }

    fn try_score(&self, window: &WindowBuffer) -> Result<Score, ScoreError> {
        let current = window.latest().ok_or(ScoreError::EmptyWindow)?;
        let width = window.width();
        let n = window.len() as f64;

        let per_feature: Vec<f64> = (0..width)
            .map(|i| {
                let mean = window.column(i).sum::<f64>() / n;
                let variance = window
                    .column(i)
                    .map(|v| (v - mean) * (v - mean))
                    .sum::<f64>()
                    / n;
                let std = variance.sqrt().max(self.epsilon);
                let z = (current[i] - mean).abs() / std;
                z / width as f64
            })
            .collect();

        let loss = per_feature.iter().sum();
        Ok(Score::new(loss, per_feature))
    }
}
