//! stream-worker: replays newline-delimited JSON sensor readings through
//! the streaming detector.
//!
//! Reads one JSON object per line from a file or stdin, ingests it into the
//! bounded stream and writes inference results and maintenance events to
//! stdout as JSON lines. Logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use pumpwatch_compute::{Detector, HeuristicScorer};
use pumpwatch_core::config::{load_dotenv, Config};
use pumpwatch_core::{FeatureSet, SensorReading, StatusMode};
use pumpwatch_stream::{JsonLinesSink, StreamCoordinator};

// ── CLI ─────────────────────────────────────────────────────────────

/// Streaming pump anomaly detector over NDJSON sensor readings.
#[derive(Parser, Debug)]
#[command(name = "stream-worker", version, about)]
struct Cli {
    /// Input file with one JSON reading per line ("-" for stdin).
    #[arg(long, default_value = "-")]
    input: String,

    /// Delay between ingested readings in milliseconds (0 = as fast as possible).
    #[arg(long, env = "STREAM_INTERVAL_MS", default_value_t = 0)]
    interval_ms: u64,

    /// Statistics log interval in seconds.
    #[arg(long, env = "STREAM_STATS_INTERVAL", default_value_t = 10)]
    stats_interval: u64,

    /// Override WINDOW_SIZE.
    #[arg(long)]
    window_size: Option<usize>,

    /// Override ANOMALY_THRESHOLD.
    #[arg(long)]
    threshold: Option<f64>,

    /// Override STATUS_MODE (tiered or binary).
    #[arg(long)]
    status_mode: Option<StatusMode>,

    /// Also write raw readings to the output.
    #[arg(long)]
    echo_readings: bool,

    /// Drop readings when the queue is full instead of waiting for room.
    #[arg(long)]
    lossy: bool,
}

/// Wait between attempts while the queue is full.
const INGEST_BACKOFF: Duration = Duration::from_millis(2);

async fn open_input(input: &str) -> anyhow::Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let path = PathBuf::from(input);
    let file = tokio::fs::File::open(&path).await?;
    info!(path = %path.display(), "reading input file");
    Ok(Box::new(BufReader::new(file)))
}

fn parse_line(line: &str, line_no: u64) -> Option<SensorReading> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<SensorReading>(line) {
        Ok(reading) => Some(reading),
        Err(e) => {
            warn!(line = line_no, error = %e, "skipping malformed reading");
            None
        }
    }
}

fn log_stats(stream: &StreamCoordinator) {
    let stats = stream.get_statistics();
    info!(
        processed = stats.total_processed,
        anomalies = stats.total_anomalies,
        dropped = stats.total_dropped,
        queue = stats.queue_size,
        status = stats
            .last_inference
            .as_ref()
            .map(|r| r.status.as_str())
            .unwrap_or("-"),
        avg_latency_ms = stats.metrics.avg_latency_ms,
        "stream statistics"
    );
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(window_size) = cli.window_size {
        config.detector.window_size = window_size;
    }
    if let Some(threshold) = cli.threshold {
        config.detector.anomaly_threshold = Some(threshold);
    }
    if let Some(mode) = cli.status_mode {
        config.detector.status_mode = mode;
    }
    config.log_summary();

    // No model runtime is linked into this binary.
    warn!("no reconstruction model available, using heuristic scorer (SIMULATED)");
    let detector = Detector::from_config(&config, FeatureSet::pump(), Box::new(HeuristicScorer::new()))?;

    let sink = Arc::new(JsonLinesSink::new(std::io::stdout()).include_readings(cli.echo_readings));
    let stream = StreamCoordinator::new(detector, sink, &config.stream)?;
    stream.start()?;

    let mut lines = open_input(&cli.input).await?.lines();
    let mut stats_tick = tokio::time::interval(Duration::from_secs(cli.stats_interval.max(1)));
    stats_tick.tick().await;
    let pace = Duration::from_millis(cli.interval_ms);

    let mut line_no = 0u64;
    let mut interrupted = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                line_no += 1;
                if let Some(reading) = parse_line(&line, line_no) {
                    if cli.lossy {
                        stream.ingest(reading);
                    } else if !stream.ingest_with_backpressure(reading, INGEST_BACKOFF).await {
                        warn!(line = line_no, "consumer stopped, reading dropped");
                    }
                    if !pace.is_zero() {
                        tokio::time::sleep(pace).await;
                    }
                }
            }
            _ = stats_tick.tick() => log_stats(&stream),
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                interrupted = true;
                break;
            }
        }
    }

    if !interrupted {
        info!(lines = line_no, "input exhausted, draining queue");
        while stream.queue_size() > 0 && stream.is_running() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    stream.stop();
    log_stats(&stream);

    let dropped = stream.get_statistics().total_dropped;
    if dropped > 0 {
        anyhow::bail!("{dropped} readings were dropped");
    }
    info!("stream-worker exited cleanly");
    Ok(())
}
