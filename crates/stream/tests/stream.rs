use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use pumpwatch_compute::{Detector, Score, ScoreError, Scorer, WindowBuffer};
use pumpwatch_core::config::StreamConfig;
use pumpwatch_core::{
    FeatureSet, FeatureState, InferenceResult, MaintenanceEvent, ScorerKind, SensorReading,
    StatusMode, SystemStatus, PUMP_FEATURES,
};
use pumpwatch_stream::{MemorySink, NoopSink, ReadingId, ResultSink, SinkError, StreamCoordinator};

// ── Helpers ─────────────────────────────────────────────────────

fn config(capacity: usize) -> StreamConfig {
    StreamConfig {
        queue_capacity: capacity,
        poll_timeout_ms: 10,
        join_timeout_ms: 2000,
    }
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

fn wait_processed(stream: &StreamCoordinator, n: u64) {
    assert!(
        wait_for(|| stream.get_statistics().total_processed >= n),
        "timed out waiting for {n} processed readings, got {}",
        stream.get_statistics().total_processed
    );
}

fn zero_reading() -> SensorReading {
    PUMP_FEATURES
        .iter()
        .map(|name| (*name, serde_json::json!(0)))
        .collect()
}

fn pump_reading() -> SensorReading {
    SensorReading::new()
        .with("timestamp", "2024-03-01T08:00:00")
        .with("machine_status", "NORMAL")
        .with("Motor_RPM", 1480.0)
        .with("Bearing_Temperature_C", 62.0)
        .with("Oil_Pressure_bar", 3.4)
        .with("Vibration_mm_s", 2.1)
        .with("Flow_Rate_L_min", 410.0)
        .with("Suction_Pressure_bar", 1.1)
        .with("Discharge_Pressure_bar", 6.8)
        .with("Motor_Current_A", 31.0)
        .with("Casing_Temperature_C", 48.0)
        .with("Ambient_Temperature_C", 22.0)
}

fn statuses(sink: &MemorySink) -> Vec<SystemStatus> {
    sink.inferences().iter().map(|(_, r)| r.status).collect()
}

/// Flags one feature on every scored window.
struct FlagFeature {
    index: usize,
    loss: f64,
}

impl Scorer for FlagFeature {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Model
    }

    fn default_threshold(&self) -> f64 {
        1.0
    }

    fn try_score(&self, window: &WindowBuffer) -> Result<Score, ScoreError> {
        let mut per_feature = vec![0.0; window.width()];
        per_feature[self.index] = 1.0;
        Ok(Score::new(self.loss, per_feature))
    }
}

struct PanickingScorer;

impl Scorer for PanickingScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Model
    }

    fn default_threshold(&self) -> f64 {
        1.0
    }

    fn try_score(&self, _window: &WindowBuffer) -> Result<Score, ScoreError> {
        panic!("model runtime crashed");
    }
}

/// Takes a fixed time per window and records that scoring began.
struct SlowScorer {
    delay: Duration,
    started: Arc<AtomicBool>,
}

impl Scorer for SlowScorer {
    fn kind(&self) -> ScorerKind {
        ScorerKind::Model
    }

    fn default_threshold(&self) -> f64 {
        1.0
    }

    fn try_score(&self, window: &WindowBuffer) -> Result<Score, ScoreError> {
        self.started.store(true, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(Score::new(0.0, vec![0.0; window.width()]))
    }
}

/// Sink whose backend is always down.
struct UnavailableSink;

impl ResultSink for UnavailableSink {
    fn store_reading(&self, _reading: &SensorReading) -> Result<Option<ReadingId>, SinkError> {
        Err(SinkError::Backend("connection refused".to_string()))
    }

    fn store_inference(&self, _id: &ReadingId, _result: &InferenceResult) -> Result<(), SinkError> {
        Err(SinkError::Backend("connection refused".to_string()))
    }

    fn store_maintenance_event(&self, _event: &MaintenanceEvent) -> Result<(), SinkError> {
        Err(SinkError::Backend("connection refused".to_string()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

/// Hands out ids but fails every inference write.
struct FlakyInferenceSink {
    failed: AtomicBool,
}

impl ResultSink for FlakyInferenceSink {
    fn store_reading(&self, _reading: &SensorReading) -> Result<Option<ReadingId>, SinkError> {
        Ok(Some(ReadingId("r".to_string())))
    }

    fn store_inference(&self, _id: &ReadingId, _result: &InferenceResult) -> Result<(), SinkError> {
        self.failed.store(true, Ordering::SeqCst);
        Err(SinkError::Io(std::io::Error::other("disk full")))
    }

    fn store_maintenance_event(&self, _event: &MaintenanceEvent) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

// ── Backpressure ────────────────────────────────────────────────

#[test]
fn overflow_is_dropped_while_consumer_paused() {
    let detector = Detector::heuristic(FeatureSet::pump(), 30).unwrap();
    let stream = StreamCoordinator::new(detector, Arc::new(NoopSink), &config(5)).unwrap();

    let accepted: Vec<bool> = (0..8).map(|_| stream.ingest(pump_reading())).collect();
    assert_eq!(accepted, vec![true, true, true, true, true, false, false, false]);

    let stats = stream.get_statistics();
    assert_eq!(stats.queue_size, 5);
    assert_eq!(stats.total_dropped, 3);
    assert_eq!(stats.total_processed, 0);

    stream.start().unwrap();
    wait_processed(&stream, 5);
    assert!(wait_for(|| stream.queue_size() == 0));

    // Nothing beyond what was dequeued is ever processed.
    thread::sleep(Duration::from_millis(50));
    assert_eq!(stream.get_statistics().total_processed, 5);
    stream.stop();
}

#[tokio::test]
async fn backpressure_replays_more_than_capacity_without_loss() {
    let sink = Arc::new(MemorySink::new());
    let detector = Detector::heuristic(FeatureSet::pump(), 5).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(4)).unwrap();
    stream.start().unwrap();

    for i in 0..200 {
        let reading = pump_reading().with("Motor_RPM", i as f64);
        assert!(
            stream
                .ingest_with_backpressure(reading, Duration::from_millis(1))
                .await
        );
    }
    wait_processed(&stream, 200);
    stream.stop();

    let stats = stream.get_statistics();
    assert_eq!(stats.total_dropped, 0);
    assert_eq!(stats.total_processed, 200);
    assert_eq!(sink.inferences().len(), 200);

    let rpms: Vec<f64> = sink
        .readings()
        .iter()
        .map(|(_, r)| r.value_or_zero("Motor_RPM"))
        .collect();
    let expected: Vec<f64> = (0..200).map(|i| i as f64).collect();
    assert_eq!(rpms, expected);
}

#[test]
fn readings_processed_in_arrival_order() {
    let sink = Arc::new(MemorySink::new());
    let detector = Detector::heuristic(FeatureSet::pump(), 5).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(100)).unwrap();

    for i in 0..40 {
        assert!(stream.ingest(pump_reading().with("Motor_RPM", i as f64)));
    }
    stream.start().unwrap();
    wait_processed(&stream, 40);
    stream.stop();

    let rpms: Vec<f64> = sink
        .readings()
        .iter()
        .map(|(_, r)| r.value_or_zero("Motor_RPM"))
        .collect();
    let expected: Vec<f64> = (0..40).map(|i| i as f64).collect();
    assert_eq!(rpms, expected);

    assert!(stream.get_latest().is_some());
    assert_eq!(stream.get_statistics().last_reading.unwrap().value_or_zero("Motor_RPM"), 39.0);
    let last = stream.get_latest().unwrap();
    assert!(!last.is_learning());
}

// ── Warm-up and scenarios ───────────────────────────────────────

#[test]
fn zero_stream_learns_for_29_then_normal() {
    let sink = Arc::new(MemorySink::new());
    let detector = Detector::heuristic(FeatureSet::pump(), 30).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(100)).unwrap();
    stream.start().unwrap();

    for _ in 0..29 {
        assert!(stream.ingest(zero_reading()));
    }
    wait_processed(&stream, 29);
    let latest = stream.get_latest().unwrap();
    assert_eq!(latest.status, SystemStatus::Learning);
    assert_eq!(latest.reconstruction_loss, 0.0);

    assert!(stream.ingest(zero_reading()));
    wait_processed(&stream, 30);
    stream.stop();

    let seen = statuses(&sink);
    assert_eq!(seen.len(), 30);
    assert!(seen[..29].iter().all(|s| *s == SystemStatus::Learning));
    assert_eq!(seen[29], SystemStatus::Normal);

    let latest = stream.get_latest().unwrap();
    assert!(!latest.is_anomaly);
    assert_eq!(latest.reconstruction_loss, 0.0);
    assert_eq!(latest.scorer, ScorerKind::Heuristic);
}

#[test]
fn malformed_values_are_coerced_not_fatal() {
    let sink = Arc::new(MemorySink::new());
    let detector = Detector::heuristic(FeatureSet::pump(), 2).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(10)).unwrap();
    stream.start().unwrap();

    stream.ingest(pump_reading().with("Motor_RPM", "not a number"));
    stream.ingest(SensorReading::new().with("Motor_RPM", "1480.5"));
    stream.ingest(SensorReading::new());
    wait_processed(&stream, 3);
    stream.stop();

    assert_eq!(statuses(&sink).len(), 3);
    assert!(sink.inferences().iter().all(|(_, r)| !r.degraded));
}

#[test]
fn outlier_flips_single_feature() {
    let sink = Arc::new(MemorySink::new());
    let detector = Detector::heuristic(FeatureSet::pump(), 30).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(100)).unwrap();

    for _ in 0..30 {
        stream.ingest(pump_reading());
    }
    stream.ingest(pump_reading().with("Bearing_Temperature_C", 140.0));
    stream.start().unwrap();
    wait_processed(&stream, 31);
    stream.stop();

    let result = stream.get_latest().unwrap();
    assert_eq!(
        result.sensor_state("Bearing_Temperature_C"),
        Some(FeatureState::Anomaly)
    );
    assert_eq!(result.sensor_count("Bearing_Temperature_C"), 1);
    assert_eq!(result.anomalous_sensors().count(), 1);
    assert_eq!(result.is_anomaly, result.reconstruction_loss > result.threshold);
    assert_eq!(result.total_anomalies, u64::from(result.is_anomaly));

    // Anomalous and above 85 C: one maintenance event, 140 > 1.2 x 85.
    let events = sink.maintenance_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sensor_name, "Bearing_Temperature_C");
    assert_eq!(events[0].severity, pumpwatch_core::Severity::Critical);
}

#[test]
fn sustained_anomaly_counts_once_and_maintenance_dedups() {
    let sink = Arc::new(MemorySink::new());
    let vibration = FeatureSet::pump().index_of("Vibration_mm_s").unwrap();
    let detector = Detector::new(
        FeatureSet::pump(),
        3,
        1.0,
        StatusMode::Tiered,
        Box::new(FlagFeature {
            index: vibration,
            loss: 0.5,
        }),
    )
    .unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(100)).unwrap();
    stream.start().unwrap();

    for _ in 0..10 {
        stream.ingest(pump_reading().with("Vibration_mm_s", 9.0));
    }
    wait_processed(&stream, 10);

    let latest = stream.get_latest().unwrap();
    assert_eq!(latest.sensor_count("Vibration_mm_s"), 1);
    assert_eq!(latest.status, SystemStatus::Normal);
    assert_eq!(sink.maintenance_events().len(), 1);
    assert_eq!(stream.open_maintenance_events().len(), 1);

    let resolved = stream.resolve_maintenance("Vibration_mm_s").unwrap();
    assert!(resolved.resolved);
    assert!(stream.open_maintenance_events().is_empty());

    stream.ingest(pump_reading().with("Vibration_mm_s", 9.0));
    wait_processed(&stream, 11);
    stream.stop();

    assert_eq!(sink.maintenance_events().len(), 2);
    assert_eq!(stream.open_maintenance_events().len(), 1);
}

// ── Reset ───────────────────────────────────────────────────────

#[test]
fn reset_while_running_starts_over() {
    let detector = Detector::new(
        FeatureSet::pump(),
        3,
        1.0,
        StatusMode::Tiered,
        Box::new(FlagFeature { index: 0, loss: 5.0 }),
    )
    .unwrap();
    let stream = StreamCoordinator::with_defaults(detector).unwrap();
    stream.start().unwrap();

    for _ in 0..6 {
        stream.ingest(pump_reading());
    }
    wait_processed(&stream, 6);
    assert_eq!(stream.get_statistics().total_anomalies, 4);

    stream.reset();
    let stats = stream.get_statistics();
    assert_eq!(stats.total_processed, 0);
    assert_eq!(stats.total_anomalies, 0);
    assert!(stats.last_inference.is_none());
    assert!(stream.get_latest().is_none());
    assert!(stats.running);

    stream.ingest(pump_reading());
    wait_processed(&stream, 1);
    let latest = stream.get_latest().unwrap();
    assert_eq!(latest.status, SystemStatus::Learning);
    assert_eq!(latest.total_anomalies, 0);
    assert!(latest.sensor_anomaly_counts.values().all(|c| *c == 0));
    stream.stop();
}

#[test]
fn reset_twice_equals_reset_once() {
    let detector = Detector::heuristic(FeatureSet::pump(), 2).unwrap();
    let stream = StreamCoordinator::with_defaults(detector).unwrap();
    stream.start().unwrap();
    for _ in 0..4 {
        stream.ingest(pump_reading());
    }
    wait_processed(&stream, 4);
    stream.stop();

    stream.reset();
    let once = stream.get_statistics();
    stream.reset();
    let twice = stream.get_statistics();

    assert_eq!(once.total_processed, twice.total_processed);
    assert_eq!(once.total_anomalies, twice.total_anomalies);
    assert_eq!(once.total_dropped, twice.total_dropped);
    assert_eq!(once.metrics.readings_processed, 0);
    assert_eq!(twice.metrics.readings_processed, 0);
    assert!(twice.last_inference.is_none());
}

// ── Lifecycle ───────────────────────────────────────────────────

#[test]
fn start_and_stop_are_idempotent() {
    let detector = Detector::heuristic(FeatureSet::pump(), 2).unwrap();
    let stream = StreamCoordinator::with_defaults(detector).unwrap();

    stream.start().unwrap();
    stream.start().unwrap();
    assert!(stream.is_running());

    stream.ingest(pump_reading());
    wait_processed(&stream, 1);

    stream.stop();
    stream.stop();
    assert!(!stream.is_running());
    assert!(!stream.get_statistics().running);

    // Readings queued while stopped wait for the next start.
    stream.ingest(pump_reading());
    thread::sleep(Duration::from_millis(30));
    assert_eq!(stream.get_statistics().total_processed, 1);

    stream.start().unwrap();
    wait_processed(&stream, 2);
    stream.stop();
}

#[test]
fn stop_finishes_in_flight_reading_and_keeps_the_rest_queued() {
    let sink = Arc::new(MemorySink::new());
    let started = Arc::new(AtomicBool::new(false));
    let scorer = SlowScorer {
        delay: Duration::from_millis(300),
        started: started.clone(),
    };
    let detector =
        Detector::new(FeatureSet::pump(), 1, 1.0, StatusMode::Tiered, Box::new(scorer)).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(10)).unwrap();

    for _ in 0..3 {
        assert!(stream.ingest(pump_reading()));
    }
    stream.start().unwrap();
    assert!(wait_for(|| started.load(Ordering::SeqCst)));
    stream.stop();

    let stats = stream.get_statistics();
    assert!(!stats.running);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.queue_size, 2);
    assert_eq!(sink.inferences().len(), 1);

    stream.start().unwrap();
    wait_processed(&stream, 3);
    stream.stop();

    let stats = stream.get_statistics();
    assert_eq!(stats.total_processed, 3);
    assert_eq!(stats.queue_size, 0);
    assert_eq!(sink.readings().len(), 3);
    assert_eq!(sink.inferences().len(), 3);
}

#[test]
fn reload_switches_scorer() {
    let detector = Detector::heuristic(FeatureSet::pump(), 2).unwrap();
    let stream = StreamCoordinator::with_defaults(detector).unwrap();
    assert_eq!(stream.get_statistics().detector.model_status, "SIMULATED");

    stream
        .reload(Box::new(FlagFeature { index: 0, loss: 0.0 }), Some(0.05))
        .unwrap();
    let info = stream.get_statistics().detector;
    assert_eq!(info.scorer, ScorerKind::Model);
    assert_eq!(info.model_status, "LOADED");
    assert_eq!(info.threshold, 0.05);
}

// ── Failure tolerance ───────────────────────────────────────────

#[test]
fn sink_failures_do_not_stop_the_consumer() {
    let detector = Detector::heuristic(FeatureSet::pump(), 2).unwrap();
    let stream = StreamCoordinator::new(detector, Arc::new(UnavailableSink), &config(10)).unwrap();
    stream.start().unwrap();

    for _ in 0..5 {
        stream.ingest(pump_reading());
    }
    wait_processed(&stream, 5);
    assert!(stream.is_running());
    assert!(stream.get_latest().is_some());
    stream.stop();
}

#[test]
fn inference_write_failure_keeps_statistics() {
    let sink = Arc::new(FlakyInferenceSink {
        failed: AtomicBool::new(false),
    });
    let detector = Detector::heuristic(FeatureSet::pump(), 1).unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(10)).unwrap();
    stream.start().unwrap();

    stream.ingest(pump_reading());
    stream.ingest(pump_reading());
    wait_processed(&stream, 2);
    stream.stop();

    assert!(sink.failed.load(Ordering::SeqCst));
    assert_eq!(stream.get_statistics().total_processed, 2);
}

#[test]
fn scorer_panic_yields_degraded_results() {
    let sink = Arc::new(MemorySink::new());
    let detector = Detector::new(
        FeatureSet::pump(),
        2,
        1.0,
        StatusMode::Tiered,
        Box::new(PanickingScorer),
    )
    .unwrap();
    let stream = StreamCoordinator::new(detector, sink.clone(), &config(10)).unwrap();
    stream.start().unwrap();

    for _ in 0..4 {
        stream.ingest(pump_reading());
    }
    wait_processed(&stream, 4);
    assert!(stream.is_running());
    stream.stop();

    let results = sink.inferences();
    assert_eq!(results.len(), 4);
    assert!(results[0].1.is_learning());
    for (_, result) in &results[1..] {
        assert!(result.degraded);
        assert_eq!(result.status, SystemStatus::Normal);
        assert!(!result.is_anomaly);
    }
    assert_eq!(stream.get_statistics().metrics.degraded_readings, 3);
}
