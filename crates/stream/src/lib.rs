pub mod coordinator;
pub mod error;
pub mod sink;
pub mod stats;

pub use coordinator::StreamCoordinator;
pub use error::{SinkError, StreamError};
pub use sink::{JsonLinesSink, MemorySink, NoopSink, ReadingId, ResultSink};
pub use stats::{DetectorInfo, StreamStatistics};
