//! Per-tick telemetry snapshots.
//!
//! A [`Snapshot`] is the complete set of named channel values produced by one
//! pass over the calculator chain. Calculators read the previous snapshot and
//! write their own channels into the next one.

use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Channel names written by the calculator chain and the device runtime.
pub mod channel {
    pub const ROUTE_STAGE: &str = "route_stage";
    pub const ROUTE_ENDED: &str = "route_ended";
    pub const THROTTLE: &str = "accelerator_pedal_position";
    pub const BRAKE: &str = "brake";
    pub const IGNITION: &str = "ignition_status";
    pub const PARKING_BRAKE: &str = "parking_brake_status";
    pub const SPEED: &str = "vehicle_speed";
    pub const ACCELERATION: &str = "acceleration";
    pub const TORQUE: &str = "torque_at_transmission";
    pub const ENGINE_SPEED: &str = "engine_speed";
    pub const FUEL_CONSUMED: &str = "fuel_consumed_since_restart";
    pub const FUEL_LEVEL: &str = "fuel_level";
    pub const ODOMETER: &str = "odometer";
    pub const OIL_TEMP: &str = "oil_temp";
    pub const GEAR_POSITION: &str = "transmission_gear_position";
    pub const GEAR: &str = "gear";
    pub const LATITUDE: &str = "latitude";
    pub const LONGITUDE: &str = "longitude";
    pub const HIGH_OIL_TEMP: &str = "high_oil_temp";
    pub const DTC_CODE: &str = "dtc_code";
}

/// One tick's complete set of named telemetry channel values.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Numeric channel value, `0.0` when absent or non-numeric.
    pub fn num(&self, name: &str) -> f64 {
        self.values
            .get(name)
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }

    /// Boolean channel value, `false` when absent.
    pub fn flag(&self, name: &str) -> bool {
        self.values
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Measures wall-clock seconds between consecutive laps.
///
/// The first lap returns `0.0` so integrations start from rest instead of
/// absorbing the gap between construction and the first tick.
#[derive(Debug)]
pub struct LapTimer {
    last: Option<Instant>,
}

impl LapTimer {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn lap(&mut self) -> f64 {
        let now = Instant::now();
        let dt = match self.last {
            Some(prev) => now.duration_since(prev).as_secs_f64(),
            None => 0.0,
        };
        self.last = Some(now);
        dt
    }
}

impl Default for LapTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_defaults_to_zero() {
        let snap = Snapshot::new();
        assert_eq!(snap.num(channel::SPEED), 0.0);
    }

    #[test]
    fn test_set_and_read_back() {
        let mut snap = Snapshot::new();
        snap.set(channel::SPEED, 42.5);
        snap.set(channel::IGNITION, true);
        snap.set(channel::GEAR_POSITION, "third");

        assert_eq!(snap.num(channel::SPEED), 42.5);
        assert!(snap.flag(channel::IGNITION));
        assert_eq!(snap.text(channel::GEAR_POSITION), Some("third"));
    }

    #[test]
    fn test_first_lap_is_zero() {
        let mut timer = LapTimer::new();
        assert_eq!(timer.lap(), 0.0);
        assert!(timer.lap() >= 0.0);
    }
}
