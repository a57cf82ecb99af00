use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Sensor channels reported by the monitored pump, in model input order.
pub const PUMP_FEATURES: [&str; 10] = [
    "Motor_RPM",
    "Bearing_Temperature_C",
    "Oil_Pressure_bar",
    "Vibration_mm_s",
    "Flow_Rate_L_min",
    "Suction_Pressure_bar",
    "Discharge_Pressure_bar",
    "Motor_Current_A",
    "Casing_Temperature_C",
    "Ambient_Temperature_C",
];

/// Metadata key carrying the producer-side timestamp of a reading.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Metadata key carrying the machine status label of a reading.
pub const MACHINE_STATUS_KEY: &str = "machine_status";

/// Ordered, named numeric channels a detector works over.
///
/// Names are unique and the set is never empty. Order is significant: it is
/// the column order of every feature vector and of every per-feature error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FeatureSet {
    names: Vec<String>,
}

impl FeatureSet {
    /// Build a feature set, rejecting empty sets and duplicate names.
    pub fn new<I, S>(names: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(CoreError::InvalidFeatureSet(
                "feature set must contain at least one feature".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(names.len());
        for name in &names {
            if name.is_empty() {
                return Err(CoreError::InvalidFeatureSet(
                    "feature names must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(CoreError::InvalidFeatureSet(format!(
                    "duplicate feature name: {name}"
                )));
            }
        }

        Ok(Self { names })
    }

    /// The ten-channel industrial pump feature set.
    pub fn pump() -> Self {
        Self {
            names: PUMP_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Position of a feature in vector order.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self::pump()
    }
}

impl TryFrom<Vec<String>> for FeatureSet {
    type Error = CoreError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<FeatureSet> for Vec<String> {
    fn from(set: FeatureSet) -> Self {
        set.names
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}

/// One raw reading as delivered by a producer.
///
/// A flat key-value map: feature channels map to numbers (or numeric
/// strings, as CSV replays deliver them), and optional metadata such as
/// `timestamp` and `machine_status` rides along untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorReading {
    fields: BTreeMap<String, Value>,
}

impl SensorReading {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Numeric value of a field, if it holds a finite number.
    ///
    /// Numeric strings are parsed. Booleans, nulls, nested values, NaN and
    /// infinities yield `None`.
    pub fn numeric(&self, key: &str) -> Option<f64> {
        let value = match self.fields.get(key)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Numeric value of a field, with `0.0` for anything missing or malformed.
    pub fn value_or_zero(&self, key: &str) -> f64 {
        self.numeric(key).unwrap_or(0.0)
    }

    /// Producer-side timestamp, if the reading carries one as text.
    pub fn timestamp(&self) -> Option<&str> {
        self.fields.get(TIMESTAMP_KEY).and_then(Value::as_str)
    }

    /// Machine status label (e.g. `NORMAL`, `BROKEN`, `RECOVERING`).
    pub fn machine_status(&self) -> Option<&str> {
        self.fields.get(MACHINE_STATUS_KEY).and_then(Value::as_str)
    }
}

impl From<serde_json::Map<String, Value>> for SensorReading {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self {
            fields: map.into_iter().collect(),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for SensorReading {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
