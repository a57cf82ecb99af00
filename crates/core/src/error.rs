use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid feature set: {0}")]
    InvalidFeatureSet(String),

    #[error("Invalid scaler: {0}")]
    InvalidScaler(String),

    #[error("Config error: {0}")]
    Config(String),
}
