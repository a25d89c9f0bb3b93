//! Speed and acceleration calculators.

use super::Calculator;
use super::snapshot::{Snapshot, channel};

const ENGINE_V0_FORCE: f64 = 30.0;
const AIR_DRAG_COEFF: f64 = 8.0e-6;
const ENGINE_DRAG_COEFF: f64 = 2.0e-4;
const ROLLING_RESISTANCE: f64 = 0.1;
const BRAKE_CONSTANT: f64 = 0.1;
const PARKING_BRAKE_PENALTY: f64 = 20.0;
const KMH_TO_MS: f64 = 1.0 / 3.6;

/// Integrates vehicle speed (km/h) from the force balance on the previous
/// snapshot: engine force against cubic air drag, engine drag, rolling
/// resistance and braking.
#[derive(Debug, Default)]
pub struct SpeedCalc;

impl SpeedCalc {
    pub fn new() -> Self {
        Self
    }
}

impl Calculator for SpeedCalc {
    fn name(&self) -> &'static str {
        channel::SPEED
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64) {
        let speed = prev.num(channel::SPEED);
        let engine_speed = prev.num(channel::ENGINE_SPEED);
        let throttle = prev.num(channel::THROTTLE);
        let brake = prev.num(channel::BRAKE);
        let gear = prev.num(channel::GEAR).max(1.0);

        let engine_force = if prev.flag(channel::IGNITION) {
            ENGINE_V0_FORCE * throttle / (50.0 * gear)
        } else {
            0.0
        };

        let air_drag = speed.powi(3) * AIR_DRAG_COEFF;
        let engine_drag = engine_speed * ENGINE_DRAG_COEFF;
        let mut accel =
            engine_force - air_drag - engine_drag - ROLLING_RESISTANCE - brake * BRAKE_CONSTANT;
        if prev.flag(channel::PARKING_BRAKE) {
            accel -= PARKING_BRAKE_PENALTY;
        }

        // Drag terms never push the vehicle backwards within one step.
        let new_speed = (speed + accel * dt_secs).max(0.0);
        next.set(channel::SPEED, new_speed);
    }
}

/// Instantaneous acceleration in m/s², derived from the speed delta between
/// this calculator's own consecutive observations.
#[derive(Debug, Default)]
pub struct AccelerationCalc {
    last_speed_kmh: f64,
}

impl AccelerationCalc {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Calculator for AccelerationCalc {
    fn name(&self) -> &'static str {
        channel::ACCELERATION
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64) {
        let speed = prev.num(channel::SPEED);
        let accel = if dt_secs > 0.0 {
            (speed - self.last_speed_kmh) * KMH_TO_MS / dt_secs
        } else {
            0.0
        };
        self.last_speed_kmh = speed;
        next.set(channel::ACCELERATION, accel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_snapshot(speed: f64, throttle: f64) -> Snapshot {
        let mut snap = Snapshot::new();
        snap.set(channel::IGNITION, true);
        snap.set(channel::SPEED, speed);
        snap.set(channel::THROTTLE, throttle);
        snap.set(channel::BRAKE, 0.0);
        snap.set(channel::GEAR, 1.0);
        snap.set(channel::ENGINE_SPEED, 900.0);
        snap
    }

    #[test]
    fn test_throttle_accelerates_from_rest() {
        let mut calc = SpeedCalc::new();
        let prev = running_snapshot(0.0, 50.0);
        let mut next = prev.clone();

        calc.iterate(&prev, &mut next, 1.0);
        assert!(next.num(channel::SPEED) > 0.0);
    }

    #[test]
    fn test_speed_never_goes_negative() {
        let mut calc = SpeedCalc::new();
        let mut prev = running_snapshot(0.5, 0.0);
        prev.set(channel::BRAKE, 100.0);
        let mut next = prev.clone();

        calc.iterate(&prev, &mut next, 2.0);
        assert_eq!(next.num(channel::SPEED), 0.0);
    }

    #[test]
    fn test_no_engine_force_with_ignition_off() {
        let mut calc = SpeedCalc::new();
        let mut prev = running_snapshot(60.0, 99.0);
        prev.set(channel::IGNITION, false);
        let mut next = prev.clone();

        calc.iterate(&prev, &mut next, 1.0);
        assert!(next.num(channel::SPEED) < 60.0);
    }

    #[test]
    fn test_acceleration_tracks_speed_delta() {
        let mut calc = AccelerationCalc::new();
        let mut next = Snapshot::new();

        let prev = running_snapshot(0.0, 0.0);
        calc.iterate(&prev, &mut next, 1.0);

        // 36 km/h gained over 2 s = 5 m/s².
        let prev = running_snapshot(36.0, 0.0);
        calc.iterate(&prev, &mut next, 2.0);
        assert!((next.num(channel::ACCELERATION) - 5.0).abs() < 1e-9);
    }
}
