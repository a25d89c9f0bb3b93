//! Fuel and odometer integration calculators.

use super::Calculator;
use super::snapshot::{Snapshot, channel};

/// Liters per second consumed at idle (~1 L/h).
const IDLE_RATE: f64 = 0.000278;
/// Additional liters per second at wide-open throttle (~32 L/h).
const MAX_RATE: f64 = 0.008889;
pub const TANK_SIZE_L: f64 = 40.0;

/// Accumulates fuel burned since trip start. Consumption only occurs while
/// the engine runs.
#[derive(Debug, Default)]
pub struct FuelConsumedCalc {
    consumed_l: f64,
}

impl FuelConsumedCalc {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Calculator for FuelConsumedCalc {
    fn name(&self) -> &'static str {
        channel::FUEL_CONSUMED
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64) {
        if prev.flag(channel::IGNITION) {
            let throttle = prev.num(channel::THROTTLE);
            self.consumed_l += (IDLE_RATE + MAX_RATE * throttle / 100.0) * dt_secs;
        }
        next.set(channel::FUEL_CONSUMED, self.consumed_l);
    }
}

/// Remaining fuel as a percentage of tank capacity.
#[derive(Debug, Default)]
pub struct FuelLevelCalc;

impl FuelLevelCalc {
    pub fn new() -> Self {
        Self
    }
}

impl Calculator for FuelLevelCalc {
    fn name(&self) -> &'static str {
        channel::FUEL_LEVEL
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, _dt_secs: f64) {
        let consumed = prev.num(channel::FUEL_CONSUMED);
        let level = (100.0 * (TANK_SIZE_L - consumed) / TANK_SIZE_L).max(0.0);
        next.set(channel::FUEL_LEVEL, level);
    }
}

/// Trip odometer in kilometers, integrated from km/h over elapsed seconds.
#[derive(Debug, Default)]
pub struct OdometerCalc {
    km: f64,
}

impl OdometerCalc {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Calculator for OdometerCalc {
    fn name(&self) -> &'static str {
        channel::ODOMETER
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64) {
        self.km += prev.num(channel::SPEED) * dt_secs / 3600.0;
        next.set(channel::ODOMETER, self.km);
    }
}
