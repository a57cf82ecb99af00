//! Output hooks for processed readings.
//!
//! The consumer hands every raw reading, inference result and maintenance
//! event to a [`ResultSink`]. Persistence lives behind this trait; the
//! detector never depends on it, and a sink error only produces a warning.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use pumpwatch_core::{InferenceResult, MaintenanceEvent, SensorReading};
use serde::{Deserialize, Serialize};

use crate::error::SinkError;

/// Opaque identifier a sink assigns to a stored reading.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadingId(pub String);

impl fmt::Display for ReadingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for result persistence backends.
///
/// Called from the consumer thread, one reading at a time.
pub trait ResultSink: Send + Sync {
    /// Store the raw reading. `Ok(None)` means the sink keeps no readings,
    /// in which case the inference result is not stored either.
    fn store_reading(&self, reading: &SensorReading) -> Result<Option<ReadingId>, SinkError>;

    fn store_inference(&self, reading_id: &ReadingId, result: &InferenceResult)
        -> Result<(), SinkError>;

    fn store_maintenance_event(&self, event: &MaintenanceEvent) -> Result<(), SinkError>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

// ── Noop ──────────────────────────────────────────────────────────

/// Discards everything. Used when no persistence backend is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ResultSink for NoopSink {
    fn store_reading(&self, _reading: &SensorReading) -> Result<Option<ReadingId>, SinkError> {
        Ok(None)
    }

    fn store_inference(&self, _id: &ReadingId, _result: &InferenceResult) -> Result<(), SinkError> {
        Ok(())
    }

    fn store_maintenance_event(&self, _event: &MaintenanceEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}

// ── Memory ────────────────────────────────────────────────────────

/// Keeps everything in memory. Handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    readings: Mutex<Vec<(ReadingId, SensorReading)>>,
    inferences: Mutex<Vec<(ReadingId, InferenceResult)>>,
    events: Mutex<Vec<MaintenanceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn readings(&self) -> Vec<(ReadingId, SensorReading)> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn inferences(&self) -> Vec<(ReadingId, InferenceResult)> {
        self.inferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn maintenance_events(&self) -> Vec<MaintenanceEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResultSink for MemorySink {
    fn store_reading(&self, reading: &SensorReading) -> Result<Option<ReadingId>, SinkError> {
        let mut readings = self.readings.lock().unwrap_or_else(PoisonError::into_inner);
        let id = ReadingId(format!("mem-{}", readings.len() + 1));
        readings.push((id.clone(), reading.clone()));
        Ok(Some(id))
    }

    fn store_inference(&self, id: &ReadingId, result: &InferenceResult) -> Result<(), SinkError> {
        self.inferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id.clone(), result.clone()));
        Ok(())
    }

    fn store_maintenance_event(&self, event: &MaintenanceEvent) -> Result<(), SinkError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

// ── JSON lines ────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Record<'a> {
    Reading {
        id: &'a ReadingId,
        reading: &'a SensorReading,
    },
    Inference {
        reading_id: &'a ReadingId,
        result: &'a InferenceResult,
    },
    Maintenance {
        event: &'a MaintenanceEvent,
    },
}

/// Writes one JSON object per line to any writer.
///
/// Reading ids are sequential. Raw readings are only written when
/// `include_readings` is set.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
    next_id: AtomicU64,
    include_readings: bool,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            next_id: AtomicU64::new(1),
            include_readings: false,
        }
    }

    pub fn include_readings(mut self, include: bool) -> Self {
        self.include_readings = include;
        self
    }

    fn write(&self, record: &Record<'_>) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> ResultSink for JsonLinesSink<W> {
    fn store_reading(&self, reading: &SensorReading) -> Result<Option<ReadingId>, SinkError> {
        let id = ReadingId(self.next_id.fetch_add(1, Ordering::Relaxed).to_string());
        if self.include_readings {
            self.write(&Record::Reading { id: &id, reading })?;
        }
        Ok(Some(id))
    }

    fn store_inference(&self, id: &ReadingId, result: &InferenceResult) -> Result<(), SinkError> {
        self.write(&Record::Inference {
            reading_id: id,
            result,
        })
    }

    fn store_maintenance_event(&self, event: &MaintenanceEvent) -> Result<(), SinkError> {
        self.write(&Record::Maintenance { event })
    }

    fn name(&self) -> &str {
        "jsonl"
    }
}
