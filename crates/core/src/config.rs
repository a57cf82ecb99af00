use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::inference::StatusMode;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub detector: DetectorConfig,
    pub stream: StreamConfig,
    pub assets: AssetConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PUMPWATCH_PROFILE` env var. When set (e.g. `PLANT2`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("PUMPWATCH_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            detector: DetectorConfig::from_env_profiled(p),
            stream: StreamConfig::from_env_profiled(p),
            assets: AssetConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Resolve the anomaly threshold.
    ///
    /// Order: explicit `ANOMALY_THRESHOLD`, then the threshold file, then
    /// `scorer_default`. An unreadable threshold file is logged and skipped.
    pub fn resolve_threshold(&self, scorer_default: f64) -> f64 {
        if let Some(t) = self.detector.anomaly_threshold {
            return t;
        }
        match load_threshold_file(&self.assets.threshold_path) {
            Ok(Some(t)) => {
                tracing::info!(
                    path = %self.assets.threshold_path.display(),
                    threshold = t,
                    "threshold loaded"
                );
                t
            }
            Ok(None) => scorer_default,
            Err(e) => {
                tracing::warn!(
                    path = %self.assets.threshold_path.display(),
                    error = %e,
                    "could not load threshold file, using scorer default"
                );
                scorer_default
            }
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  detector:  window={}, threshold={}, status_mode={}",
            self.detector.window_size,
            self.detector
                .anomaly_threshold
                .map(|t| t.to_string())
                .unwrap_or_else(|| "(auto)".to_string()),
            self.detector.status_mode
        );
        tracing::info!(
            "  stream:    queue_capacity={}, poll_timeout={}ms, join_timeout={}ms",
            self.stream.queue_capacity,
            self.stream.poll_timeout_ms,
            self.stream.join_timeout_ms
        );
        tracing::info!(
            "  assets:    threshold={}, scaler={}",
            self.assets.threshold_path.display(),
            self.assets.scaler_path.display()
        );
    }

    /// Return a summary suitable for status responses.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "detector": {
                "window_size": self.detector.window_size,
                "anomaly_threshold": self.detector.anomaly_threshold,
                "status_mode": self.detector.status_mode,
            },
            "stream": {
                "queue_capacity": self.stream.queue_capacity,
                "poll_timeout_ms": self.stream.poll_timeout_ms,
                "join_timeout_ms": self.stream.join_timeout_ms,
            },
            "assets": {
                "threshold_path": self.assets.threshold_path,
                "scaler_path": self.assets.scaler_path,
            },
        })
    }
}

// ── Detector ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Number of readings per scoring window.
    pub window_size: usize,
    /// Explicit threshold; `None` defers to the threshold file or scorer default.
    pub anomaly_threshold: Option<f64>,
    pub status_mode: StatusMode,
}

impl DetectorConfig {
    pub const DEFAULT_WINDOW_SIZE: usize = 30;

    fn from_env_profiled(p: &str) -> Self {
        let status_mode = match profiled_env_opt(p, "STATUS_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to tiered status mode");
                StatusMode::Tiered
            }),
            None => StatusMode::Tiered,
        };
        Self {
            window_size: profiled_env_usize(p, "WINDOW_SIZE", Self::DEFAULT_WINDOW_SIZE),
            anomaly_threshold: profiled_env_opt(p, "ANOMALY_THRESHOLD")
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|t| t.is_finite() && *t > 0.0),
            status_mode,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: Self::DEFAULT_WINDOW_SIZE,
            anomaly_threshold: None,
            status_mode: StatusMode::Tiered,
        }
    }
}

// ── Stream ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum readings waiting for the consumer.
    pub queue_capacity: usize,
    /// How long the consumer waits on an empty queue before rechecking shutdown.
    pub poll_timeout_ms: u64,
    /// Upper bound on waiting for the consumer to exit on stop.
    pub join_timeout_ms: u64,
}

impl StreamConfig {
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

    fn from_env_profiled(p: &str) -> Self {
        Self {
            queue_capacity: profiled_env_usize(p, "QUEUE_CAPACITY", Self::DEFAULT_QUEUE_CAPACITY),
            poll_timeout_ms: profiled_env_u64(p, "POLL_TIMEOUT_MS", 1000),
            join_timeout_ms: profiled_env_u64(p, "JOIN_TIMEOUT_MS", 5000),
        }
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            poll_timeout_ms: 1000,
            join_timeout_ms: 5000,
        }
    }
}

// ── Model assets ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// JSON file holding `{"anomaly_threshold": <f64>}`.
    pub threshold_path: PathBuf,
    /// JSON file holding the fitted scaler (`mean`, `scale`).
    pub scaler_path: PathBuf,
}

impl AssetConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            threshold_path: PathBuf::from(profiled_env_or(p, "THRESHOLD_PATH", "threshold.json")),
            scaler_path: PathBuf::from(profiled_env_or(p, "SCALER_PATH", "scaler.json")),
        }
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            threshold_path: PathBuf::from("threshold.json"),
            scaler_path: PathBuf::from("scaler.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ThresholdFile {
    anomaly_threshold: Option<f64>,
}

/// Read a threshold file. A missing file (or missing key) is `Ok(None)`.
pub fn load_threshold_file(path: &Path) -> Result<Option<f64>, CoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let file: ThresholdFile = serde_json::from_str(&raw)?;
    match file.anomaly_threshold {
        Some(t) if t.is_finite() && t > 0.0 => Ok(Some(t)),
        Some(t) => Err(CoreError::Config(format!(
            "anomaly_threshold must be a positive number, got {t}"
        ))),
        None => Ok(None),
    }
}
