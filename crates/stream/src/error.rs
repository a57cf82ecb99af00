//! Stream error types.

use pumpwatch_core::CoreError;
use thiserror::Error;

/// Failure reported by a [`ResultSink`](crate::sink::ResultSink).
///
/// The consumer logs these and carries on; they never stop the stream.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to spawn consumer thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}
