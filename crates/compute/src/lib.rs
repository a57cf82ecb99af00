pub mod pipeline;

pub use pipeline::decision::{DecisionEngine, FEATURE_SENSITIVITY};
pub use pipeline::maintenance::MaintenanceEvaluator;
pub use pipeline::metrics::PipelineMetrics;
pub use pipeline::scoring::{
    HeuristicScorer, ModelScorer, Reconstructor, Score, ScoreError, Scorer, StandardScaler,
};
pub use pipeline::window::WindowBuffer;
pub use pipeline::{Detector, DetectorOutput};
