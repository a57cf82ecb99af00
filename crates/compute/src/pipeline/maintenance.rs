//! Maintenance triggers.
//!
//! A sensor raises a maintenance event when it is flagged anomalous and its
//! raw value is above a fixed critical limit. At most one unresolved event
//! exists per sensor; events are resolved from outside via
//! [`MaintenanceEvaluator::resolve`].

use indexmap::IndexMap;
use pumpwatch_core::{InferenceResult, MaintenanceEvent, SensorReading, Severity};
use tracing::{debug, info};

/// Value above `CRITICAL_ESCALATION x limit` is CRITICAL rather than HIGH.
pub const CRITICAL_ESCALATION: f64 = 1.2;

/// Base cost for sensors without an entry in the cost table.
pub const DEFAULT_BASE_COST: f64 = 30_000.0;

/// Raw-value limits for the pump sensors that can trigger maintenance.
pub const PUMP_CRITICAL_LIMITS: [(&str, f64); 3] = [
    ("Bearing_Temperature_C", 85.0),
    ("Vibration_mm_s", 8.0),
    ("Motor_Current_A", 45.0),
];

/// Base repair cost per sensor.
pub const PUMP_BASE_COSTS: [(&str, f64); 4] = [
    ("Bearing_Temperature_C", 45_000.0),
    ("Vibration_mm_s", 35_000.0),
    ("Motor_Current_A", 60_000.0),
    ("Oil_Pressure_bar", 25_000.0),
];

#[derive(Debug, Clone)]
pub struct MaintenanceEvaluator {
    limits: IndexMap<String, f64>,
    base_costs: IndexMap<String, f64>,
    default_cost: f64,
    open: IndexMap<String, MaintenanceEvent>,
}

impl MaintenanceEvaluator {
    pub fn new<L, C>(limits: L, base_costs: C, default_cost: f64) -> Self
    where
        L: IntoIterator<Item = (String, f64)>,
        C: IntoIterator<Item = (String, f64)>,
    {
        Self {
            limits: limits.into_iter().collect(),
            base_costs: base_costs.into_iter().collect(),
            default_cost,
            open: IndexMap::new(),
        }
    }

    /// Evaluator with the pump limit and cost tables.
    pub fn pump() -> Self {
        Self::new(
            PUMP_CRITICAL_LIMITS.iter().map(|(k, v)| (k.to_string(), *v)),
            PUMP_BASE_COSTS.iter().map(|(k, v)| (k.to_string(), *v)),
            DEFAULT_BASE_COST,
        )
    }

    /// Evaluator that never fires.
    pub fn disabled() -> Self {
        Self::new(Vec::new(), Vec::new(), DEFAULT_BASE_COST)
    }

    pub fn limits(&self) -> &IndexMap<String, f64> {
        &self.limits
    }

    /// Raise events for sensors that are anomalous and over their limit.
    ///
    /// Sensors with an unresolved event are skipped. Returns only the events
    /// created by this call.
    pub fn evaluate(
        &mut self,
        reading: &SensorReading,
        result: &InferenceResult,
    ) -> Vec<MaintenanceEvent> {
        let mut created = Vec::new();

        for (sensor, &limit) in &self.limits {
            let anomalous = result
                .sensor_state(sensor)
                .is_some_and(|state| state.is_anomaly());
            if !anomalous {
                continue;
            }

            let value = reading.value_or_zero(sensor);
            if value <= limit {
                continue;
            }

            if self.open.contains_key(sensor) {
                debug!(sensor = %sensor, "maintenance already open, skipping");
                continue;
            }

            let severity = if value > CRITICAL_ESCALATION * limit {
                Severity::Critical
            } else {
                Severity::High
            };
            let cost = self.estimate_cost(sensor, severity);
            let event = MaintenanceEvent::new(sensor.clone(), severity, value, limit, cost);

            info!(
                sensor = %sensor,
                severity = %severity,
                value,
                limit,
                cost,
                "maintenance event raised"
            );
            created.push(event);
        }

        for event in &created {
            self.open.insert(event.sensor_name.clone(), event.clone());
        }
        created
    }

    /// Base cost for the sensor times the severity multiplier.
    pub fn estimate_cost(&self, sensor: &str, severity: Severity) -> f64 {
        let base = self
            .base_costs
            .get(sensor)
            .copied()
            .unwrap_or(self.default_cost);
        base * severity.cost_multiplier()
    }

    /// Mark the sensor's open event resolved. Returns it, if there was one.
    pub fn resolve(&mut self, sensor: &str) -> Option<MaintenanceEvent> {
        let mut event = self.open.shift_remove(sensor)?;
        event.resolved = true;
        info!(sensor = %sensor, id = %event.id, "maintenance event resolved");
        Some(event)
    }

    /// Register an unresolved event created elsewhere, e.g. restored from storage.
    pub fn track(&mut self, event: MaintenanceEvent) {
        if !event.resolved {
            self.open.insert(event.sensor_name.clone(), event);
        }
    }

    pub fn has_open(&self, sensor: &str) -> bool {
        self.open.contains_key(sensor)
    }

    pub fn open_events(&self) -> impl Iterator<Item = &MaintenanceEvent> {
        self.open.values()
    }
}

impl Default for MaintenanceEvaluator {
    fn default() -> Self {
        Self::pump()
    }
}
