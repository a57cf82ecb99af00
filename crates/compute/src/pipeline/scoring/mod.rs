//! Window scorers.
//!
//! A [`Scorer`] turns a full window into a scalar reconstruction loss plus a
//! per-feature error vector. Two variants exist:
//! - [`ModelScorer`]: wraps an externally trained [`Reconstructor`]
//! - [`HeuristicScorer`]: rolling mean/deviation fallback, no model needed
//!
//! The variant is chosen once when the detector is built.

pub mod heuristic;
pub mod model;

use std::panic::{self, AssertUnwindSafe};

use pumpwatch_core::ScorerKind;
use tracing::warn;

use super::window::WindowBuffer;

pub use heuristic::HeuristicScorer;
pub use model::{ModelScorer, Reconstructor, StandardScaler};

/// Error raised inside a scorer. Never escapes [`Scorer::score`].
#[derive(Debug, thiserror::Error)]
pub enum ScoreError {
    #[error("model error: {0}")]
    Model(String),

    #[error("shape mismatch: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("scorer produced a non-finite value")]
    NonFinite,

    #[error("window is empty")]
    EmptyWindow,
}

/// Output of scoring one window.
#[derive(Debug, Clone, PartialEq)]
pub struct Score {
    /// Non-negative reconstruction loss over the whole window.
    pub loss: f64,
    /// Error attributed to each feature, in feature order.
    pub per_feature: Vec<f64>,
    /// Set when the scorer failed and this is the neutral fallback.
    pub degraded: bool,
}

impl Score {
    pub fn new(loss: f64, per_feature: Vec<f64>) -> Self {
        Self {
            loss,
            per_feature,
            degraded: false,
        }
    }

    /// The fallback returned when scoring fails: zero loss, zero error everywhere.
    pub fn degraded(width: usize) -> Self {
        Self {
            loss: 0.0,
            per_feature: vec![0.0; width],
            degraded: true,
        }
    }

    fn validate(&self, width: usize) -> Result<(), ScoreError> {
        if self.per_feature.len() != width {
            return Err(ScoreError::Shape {
                expected: format!("{width} per-feature errors"),
                actual: format!("{}", self.per_feature.len()),
            });
        }
        let finite = self.loss.is_finite() && self.per_feature.iter().all(|e| e.is_finite());
        if !finite {
            return Err(ScoreError::NonFinite);
        }
        Ok(())
    }
}

/// Pluggable window scorer.
///
/// Implementors provide [`try_score`](Scorer::try_score); callers use
/// [`score`](Scorer::score), which never fails: any error, malformed output
/// or panic from `try_score` yields [`Score::degraded`].
pub trait Scorer: Send {
    fn kind(&self) -> ScorerKind;

    /// Threshold to use when none is configured.
    fn default_threshold(&self) -> f64;

    fn try_score(&self, window: &WindowBuffer) -> Result<Score, ScoreError>;

    fn score(&self, window: &WindowBuffer) -> Score {
        let width = window.width();
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.try_score(window)));
        let checked = match attempt {
            Ok(result) => result.and_then(|mut score| {
                score.validate(width)?;
                score.loss = score.loss.max(0.0);
                Ok(score)
            }),
            Err(_) => Err(ScoreError::Model("scorer panicked".to_string())),
        };

        match checked {
            Ok(score) => score,
            Err(e) => {
                warn!(scorer = %self.kind(), error = %e, "scoring failed, using degraded result");
                Score::degraded(width)
            }
        }
    }
}
