//! Bounded producer/consumer stream around one [`Detector`].
//!
//! Producers call [`StreamCoordinator::ingest`], which never blocks: when the
//! queue is full the reading is dropped and `false` is returned. A single
//! background thread drains the queue in FIFO order and runs every reading
//! through the detector, the sink and the published statistics.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pumpwatch_compute::{Detector, Scorer};
use pumpwatch_core::config::StreamConfig;
use pumpwatch_core::{CoreError, InferenceResult, MaintenanceEvent, SensorReading};
use tracing::{debug, error, info, warn};

use crate::error::StreamError;
use crate::sink::{NoopSink, ResultSink};
use crate::stats::{DetectorInfo, Published, StreamStatistics};

/// How often `stop` checks whether the consumer has exited.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(5);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the coordinator and its consumer thread.
struct Shared {
    /// Locked for the whole of one reading, and by reset/reload, so admin
    /// operations always land between readings.
    detector: Mutex<Detector>,
    published: RwLock<Published>,
    info: RwLock<DetectorInfo>,
    sink: Arc<dyn ResultSink>,
    queue_size: AtomicUsize,
    total_dropped: AtomicU64,
}

impl Shared {
    fn handle(&self, reading: SensorReading) {
        let reading_id = match self.sink.store_reading(&reading) {
            Ok(id) => id,
            Err(e) => {
                warn!(sink = self.sink.name(), error = %e, "failed to store reading");
                None
            }
        };

        let reading = Arc::new(reading);
        let (result, maintenance) = {
            let mut detector = lock(&self.detector);
            let output = detector.process(&reading);
            let result = Arc::new(output.result);

            let mut published = self.published.write().unwrap_or_else(PoisonError::into_inner);
            published.total_processed += 1;
            if result.is_anomaly {
                published.total_anomalies += 1;
            }
            published.reading = Some(Arc::clone(&reading));
            published.inference = Some(Arc::clone(&result));
            published.metrics = detector.metrics.clone();

            (result, output.maintenance)
        };

        if result.is_anomaly {
            info!(
                status = %result.status,
                loss = result.reconstruction_loss,
                threshold = result.threshold,
                "anomaly detected"
            );
        }

        if let Some(id) = &reading_id {
            if let Err(e) = self.sink.store_inference(id, &result) {
                warn!(sink = self.sink.name(), reading_id = %id, error = %e, "failed to store inference");
            }
        }
        for event in &maintenance {
            if let Err(e) = self.sink.store_maintenance_event(event) {
                warn!(
                    sink = self.sink.name(),
                    sensor = %event.sensor_name,
                    error = %e,
                    "failed to store maintenance event"
                );
            }
        }
    }
}

/// Consumer loop. Holds the receiver for its whole lifetime, so at most one
/// consumer ever drains the queue.
fn consume(
    shared: Arc<Shared>,
    receiver: Arc<Mutex<Receiver<SensorReading>>>,
    stop: Arc<AtomicBool>,
    poll_timeout: Duration,
) {
    let receiver = lock(&receiver);
    debug!("consumer acquired queue");

    while !stop.load(Ordering::Acquire) {
        match receiver.recv_timeout(poll_timeout) {
            Ok(reading) => {
                shared.queue_size.fetch_sub(1, Ordering::AcqRel);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.handle(reading)));
                if outcome.is_err() {
                    error!("reading processing panicked, continuing with next reading");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("consumer exiting");
}

struct ConsumerHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ConsumerHandle {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

/// Owns the bounded queue, the detector and the consumer thread.
pub struct StreamCoordinator {
    shared: Arc<Shared>,
    sender: SyncSender<SensorReading>,
    receiver: Arc<Mutex<Receiver<SensorReading>>>,
    consumer: Mutex<Option<ConsumerHandle>>,
    capacity: usize,
    poll_timeout: Duration,
    join_timeout: Duration,
}

impl StreamCoordinator {
    pub fn new(
        detector: Detector,
        sink: Arc<dyn ResultSink>,
        config: &StreamConfig,
    ) -> Result<Self, StreamError> {
        if config.queue_capacity == 0 {
            return Err(CoreError::Config("queue capacity must be at least 1".to_string()).into());
        }

        let (sender, receiver) = mpsc::sync_channel(config.queue_capacity);
        let info = DetectorInfo::of(&detector);

        info!(
            capacity = config.queue_capacity,
            sink = sink.name(),
            scorer = %info.scorer,
            "stream coordinator created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                detector: Mutex::new(detector),
                published: RwLock::new(Published::default()),
                info: RwLock::new(info),
                sink,
                queue_size: AtomicUsize::new(0),
                total_dropped: AtomicU64::new(0),
            }),
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            consumer: Mutex::new(None),
            capacity: config.queue_capacity,
            poll_timeout: config.poll_timeout(),
            join_timeout: config.join_timeout(),
        })
    }

    /// Coordinator with default stream settings and no persistence.
    pub fn with_defaults(detector: Detector) -> Result<Self, StreamError> {
        Self::new(detector, Arc::new(NoopSink), &StreamConfig::default())
    }

    /// Enqueue a reading without blocking.
    ///
    /// Returns `false` and drops the reading when the queue is full.
    pub fn ingest(&self, reading: SensorReading) -> bool {
        match self.try_ingest(reading) {
            Ok(()) => true,
            Err(_) => {
                self.record_drop();
                false
            }
        }
    }

    /// Enqueue a reading without blocking, handing it back when the queue is
    /// full. Not counted as a drop.
    pub fn try_ingest(&self, reading: SensorReading) -> Result<(), SensorReading> {
        // Counted before the send so the consumer's decrement can never
        // run ahead of it.
        self.shared.queue_size.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(reading) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(reading)) | Err(TrySendError::Disconnected(reading)) => {
                self.shared.queue_size.fetch_sub(1, Ordering::AcqRel);
                Err(reading)
            }
        }
    }

    /// Enqueue a reading, sleeping `backoff` between attempts while the queue
    /// is full.
    ///
    /// Gives up and drops the reading only when no consumer is running to
    /// make room.
    pub async fn ingest_with_backpressure(&self, reading: SensorReading, backoff: Duration) -> bool {
        let mut reading = reading;
        loop {
            match self.try_ingest(reading) {
                Ok(()) => return true,
                Err(rejected) if self.is_running() => {
                    reading = rejected;
                    tokio::time::sleep(backoff).await;
                }
                Err(_) => {
                    self.record_drop();
                    return false;
                }
            }
        }
    }

    fn record_drop(&self) {
        let dropped = self.shared.total_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(capacity = self.capacity, dropped, "queue full, reading dropped");
    }

    /// Start the consumer thread. No-op if it is already running.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut consumer = lock(&self.consumer);
        if consumer.as_ref().is_some_and(ConsumerHandle::is_running) {
            debug!("consumer already running");
            return Ok(());
        }
        if let Some(finished) = consumer.take() {
            if finished.handle.join().is_err() {
                error!("previous consumer thread panicked");
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&self.shared);
            let receiver = Arc::clone(&self.receiver);
            let stop = Arc::clone(&stop);
            let poll_timeout = self.poll_timeout;
            thread::Builder::new()
                .name("pumpwatch-consumer".to_string())
                .spawn(move || consume(shared, receiver, stop, poll_timeout))
                .map_err(StreamError::Spawn)?
        };

        *consumer = Some(ConsumerHandle { stop, handle });
        info!("stream consumer started");
        Ok(())
    }

    /// Signal the consumer to stop and wait up to the join timeout.
    ///
    /// The reading in flight is finished first. No-op if not running.
    pub fn stop(&self) {
        let Some(consumer) = lock(&self.consumer).take() else {
            return;
        };
        consumer.stop.store(true, Ordering::Release);

        let deadline = Instant::now() + self.join_timeout;
        while consumer.is_running() && Instant::now() < deadline {
            thread::sleep(STOP_POLL_INTERVAL);
        }

        if consumer.is_running() {
            warn!(
                timeout_ms = self.join_timeout.as_millis() as u64,
                "consumer did not stop within join timeout, detaching"
            );
            return;
        }
        if consumer.handle.join().is_err() {
            error!("consumer thread panicked");
        }
        info!("stream consumer stopped");
    }

    pub fn is_running(&self) -> bool {
        lock(&self.consumer)
            .as_ref()
            .is_some_and(ConsumerHandle::is_running)
    }

    /// Latest inference result, if any reading has been processed since
    /// construction or the last reset.
    pub fn get_latest(&self) -> Option<Arc<InferenceResult>> {
        self.shared
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .inference
            .clone()
    }

    pub fn get_statistics(&self) -> StreamStatistics {
        let published = self
            .shared
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let detector = self
            .shared
            .info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        StreamStatistics {
            total_processed: published.total_processed,
            total_anomalies: published.total_anomalies,
            total_dropped: self.shared.total_dropped.load(Ordering::Relaxed),
            queue_size: self.queue_size(),
            queue_capacity: self.capacity,
            running: self.is_running(),
            last_reading: published.reading.as_deref().cloned(),
            last_inference: published.inference.as_deref().cloned(),
            detector,
            metrics: published.metrics,
        }
    }

    pub fn queue_size(&self) -> usize {
        self.shared.queue_size.load(Ordering::Acquire)
    }

    /// Clear the detector state and every counter.
    ///
    /// Safe while the consumer runs: applied between two readings. Readings
    /// still queued are kept and processed afterwards. Open maintenance
    /// events are kept.
    pub fn reset(&self) {
        let mut detector = lock(&self.shared.detector);
        detector.reset();
        *self
            .shared
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Published::default();
        self.shared.total_dropped.store(0, Ordering::Relaxed);
        info!("stream reset");
    }

    /// Swap the detector's scorer and reset. `None` uses the scorer default threshold.
    pub fn reload(&self, scorer: Box<dyn Scorer>, threshold: Option<f64>) -> Result<(), StreamError> {
        let mut detector = lock(&self.shared.detector);
        detector.reload(scorer, threshold)?;
        *self
            .shared
            .info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = DetectorInfo::of(&detector);
        *self
            .shared
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Published::default();
        Ok(())
    }

    /// Mark a sensor's open maintenance event resolved.
    pub fn resolve_maintenance(&self, sensor: &str) -> Option<MaintenanceEvent> {
        lock(&self.shared.detector).maintenance_mut().resolve(sensor)
    }

    pub fn open_maintenance_events(&self) -> Vec<MaintenanceEvent> {
        lock(&self.shared.detector)
            .maintenance()
            .open_events()
            .cloned()
            .collect()
    }
}

impl Drop for StreamCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}
