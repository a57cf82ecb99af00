use std::path::Path;

use pumpwatch_core::{Config, CoreError, ScorerKind};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Score, ScoreError, Scorer};
use crate::pipeline::window::WindowBuffer;

/// Loss threshold used with a model when none is configured.
pub const MODEL_DEFAULT_THRESHOLD: f64 = 0.05;

/// A trained sequence model that reconstructs a window.
///
/// Input and output are `rows x features`, oldest row first. Implemented
/// for plain closures so inference backends can be adapted without a
/// wrapper type.
pub trait Reconstructor: Send {
    fn reconstruct(&self, window: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoreError>;
}

impl<F> Reconstructor for F
where
    F: Fn(&[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoreError> + Send,
{
    fn reconstruct(&self, window: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoreError> {
        self(window)
    }
}

/// Per-feature standardisation fitted at training time: `(x - mean) / scale`.
///
/// Only ever applied, never refit on live data. A zero scale is treated as 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn new(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, CoreError> {
        let scaler = Self { mean, scale };
        scaler.check()?;
        Ok(scaler)
    }

    /// Load a fitted scaler from JSON. A missing file is `Ok(None)`.
    pub fn from_file(path: &Path) -> Result<Option<Self>, CoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let scaler: Self = serde_json::from_str(&raw)?;
        scaler.check()?;
        info!(path = %path.display(), features = scaler.width(), "scaler loaded");
        Ok(Some(scaler))
    }

    fn check(&self) -> Result<(), CoreError> {
        if self.mean.is_empty() || self.mean.len() != self.scale.len() {
            return Err(CoreError::InvalidScaler(format!(
                "mean has {} entries, scale has {}",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err(CoreError::InvalidScaler("non-finite parameter".to_string()));
        }
        Ok(())
    }

    pub fn width(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, ScoreError> {
        if row.len() != self.width() {
            return Err(ScoreError::Shape {
                expected: format!("{} scaler features", self.width()),
                actual: format!("{}", row.len()),
            });
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| {
                let scale = if scale.abs() <= f64::EPSILON { 1.0 } else { *scale };
                (x - mean) / scale
            })
            .collect())
    }
}

/// Scores a window by how badly a trained model reconstructs it.
///
/// Loss is the mean absolute reconstruction error over every cell; the
/// per-feature error is the mean absolute error down each column.
pub struct ModelScorer {
    model: Box<dyn Reconstructor>,
    scaler: Option<StandardScaler>,
}

impl ModelScorer {
    pub fn new(model: Box<dyn Reconstructor>) -> Self {
        Self { model, scaler: None }
    }

    pub fn with_scaler(mut self, scaler: StandardScaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    /// Attach the scaler at `path` if the file exists.
    pub fn with_scaler_file(self, path: &Path) -> Result<Self, CoreError> {
        Ok(match StandardScaler::from_file(path)? {
            Some(scaler) => self.with_scaler(scaler),
            None => self,
        })
    }

    /// Model scorer with the scaler named by `SCALER_PATH`, when present.
    pub fn from_config(config: &Config, model: Box<dyn Reconstructor>) -> Result<Self, CoreError> {
        Self::new(model).with_scaler_file(&config.assets.scaler_path)
    }

    pub fn scaler(&self) -> Option<&StandardScaler> {
        self.scaler.as_ref()
    }
}

impl Scorer for ModelScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Model
    }

    fn default_threshold(&self) -> f64 {
        MODEL_DEFAULT_THRESHOLD
    }

    fn try_score(&self, window: &WindowBuffer) -> Result<Score, ScoreError> {
        if window.is_empty() {
            return Err(ScoreError::EmptyWindow);
        }
        let width = window.width();

        let input: Vec<Vec<f64>> = match &self.scaler {
            Some(scaler) => window
                .rows()
                .map(|row| scaler.transform(row))
                .collect::<Result<_, _>>()?,
            None => window.snapshot(),
        };

        let output = self.model.reconstruct(&input)?;
        if output.len() != input.len() || output.iter().any(|row| row.len() != width) {
            return Err(ScoreError::Shape {
                expected: format!("{}x{}", input.len(), width),
                actual: format!(
                    "{}x{}",
                    output.len(),
                    output.first().map(Vec::len).unwrap_or(0)
                ),
            });
        }

        let rows = input.len() as f64;
        let mut per_feature = vec![0.0; width];
        for (original, rebuilt) in input.iter().zip(&output) {
            for (i, (x, y)) in original.iter().zip(rebuilt).enumerate() {
                per_feature[i] += (x - y).abs();
            }
        }
        for e in &mut per_feature {
            *e /= rows;
        }

        let loss = per_feature.iter().sum::<f64>() / width as f64;
        Ok(Score::new(loss, per_feature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn window_of(rows: &[Vec<f64>]) -> WindowBuffer {
        let mut window = WindowBuffer::new(rows.len(), rows[0].len()).unwrap();
        for row in rows {
            window.push(row.clone());
        }
        window
    }

    fn model<F>(f: F) -> Box<dyn Reconstructor>
    where
        F: Fn(&[Vec<f64>]) -> Result<Vec<Vec<f64>>, ScoreError> + Send + 'static,
    {
        Box::new(f)
    }

    fn identity() -> Box<dyn Reconstructor> {
        model(|w| Ok(w.to_vec()))
    }

    fn zeros() -> Box<dyn Reconstructor> {
        model(|w| Ok(w.iter().map(|r| vec![0.0; r.len()]).collect()))
    }

    #[test]
    fn perfect_reconstruction_is_zero_loss() {
        let scorer = ModelScorer::new(identity());
        let score = scorer.score(&window_of(&[vec![1.0, 2.0], vec![3.0, 4.0]]));
        assert!(!score.degraded);
        assert_eq!(score.loss, 0.0);
        assert_eq!(score.per_feature, vec![0.0, 0.0]);
    }

    #[test]
    fn mean_absolute_error_per_column() {
        let scorer = ModelScorer::new(zeros());
        let score = scorer.score(&window_of(&[vec![1.0, -2.0], vec![3.0, 4.0]]));
        assert_eq!(score.per_feature, vec![2.0, 3.0]);
        assert_eq!(score.loss, 2.5);
    }

    #[test]
    fn scaler_applied_before_model() {
        let scaler = StandardScaler::new(vec![1.0, 0.0], vec![2.0, 0.0]).unwrap();
        let scorer = ModelScorer::new(zeros()).with_scaler(scaler);
        let score = scorer.score(&window_of(&[vec![5.0, 3.0]]));
        // (5 - 1) / 2 = 2; zero scale leaves the second column as is.
        assert_eq!(score.per_feature, vec![2.0, 3.0]);
    }

    #[test]
    fn model_error_degrades() {
        let failing = model(|_| Err(ScoreError::Model("session closed".to_string())));
        let score = ModelScorer::new(failing).score(&window_of(&[vec![1.0, 2.0]]));
        assert!(score.degraded);
        assert_eq!(score.loss, 0.0);
    }

    #[test]
    fn wrong_output_shape_degrades() {
        let truncating = model(|w| Ok(w[..1].to_vec()));
        let score = ModelScorer::new(truncating).score(&window_of(&[vec![1.0], vec![2.0]]));
        assert!(score.degraded);
    }

    #[test]
    fn scaler_width_mismatch_degrades() {
        let scaler = StandardScaler::new(vec![0.0], vec![1.0]).unwrap();
        let scorer = ModelScorer::new(identity()).with_scaler(scaler);
        assert!(scorer.score(&window_of(&[vec![1.0, 2.0]])).degraded);
    }

    #[test]
    fn scaler_validation() {
        assert!(StandardScaler::new(vec![], vec![]).is_err());
        assert!(StandardScaler::new(vec![0.0, 1.0], vec![1.0]).is_err());
        assert!(StandardScaler::new(vec![f64::NAN], vec![1.0]).is_err());
    }

    #[test]
    fn scaler_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("scaler.json");
        assert!(StandardScaler::from_file(&missing).unwrap().is_none());

        let path = dir.path().join("fitted.json");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{"mean": [1.0, 2.0], "scale": [0.5, 4.0]}"#).unwrap();

        let scaler = StandardScaler::from_file(&path).unwrap().unwrap();
        assert_eq!(scaler.width(), 2);

        let scorer = ModelScorer::new(identity()).with_scaler_file(&path).unwrap();
        assert!(scorer.scaler().is_some());
    }

    #[test]
    fn from_config_follows_scaler_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();

        config.assets.scaler_path = dir.path().join("absent.json");
        let scorer = ModelScorer::from_config(&config, zeros()).unwrap();
        assert!(scorer.scaler().is_none());

        let path = dir.path().join("scaler.json");
        std::fs::write(&path, r#"{"mean": [1.0], "scale": [2.0]}"#).unwrap();
        config.assets.scaler_path = path;
        let scorer = ModelScorer::from_config(&config, zeros()).unwrap();
        let score = scorer.score(&window_of(&[vec![5.0]]));
        assert_eq!(score.per_feature, vec![2.0]);

        std::fs::write(&config.assets.scaler_path, "not json").unwrap();
        assert!(ModelScorer::from_config(&config, zeros()).is_err());
    }
}
