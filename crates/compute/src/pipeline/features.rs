use pumpwatch_core::{FeatureSet, SensorReading};

/// Project a raw reading onto the feature set, in feature order.
///
/// Missing and non-numeric channels become `0.0`; metadata keys that are not
/// part of the feature set are ignored.
pub fn extract(reading: &SensorReading, features: &FeatureSet) -> Vec<f64> {
    features
        .iter()
        .map(|name| reading.value_or_zero(name))
        .collect()
}
