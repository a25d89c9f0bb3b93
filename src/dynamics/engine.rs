//! Engine-side calculators: torque, engine speed, oil temperature and the
//! two gear channels.

use rand::prelude::*;

use super::Calculator;
use super::snapshot::{Snapshot, channel};

const TORQUE_DRAG_COEFF: f64 = 0.05;
const IDLE_RPM: f64 = 900.0;
const MAX_RPM: f64 = 6000.0;

pub const OIL_TEMP_START: f64 = 100.0;
const OIL_WARMUP_SECS: f64 = 120.0;
const OIL_WARMUP_RATE: f64 = 1.0833;
const OIL_JITTER: f64 = 5.0;
const OIL_HIGH_MIN: f64 = 275.0;
const OIL_HIGH_MAX: f64 = 320.0;

/// Shift-up boundaries in km/h; speeds above the last band select top gear.
const GEAR_BANDS: [f64; 4] = [30.0, 55.0, 85.0, 115.0];
const GEAR_NAMES: [&str; 5] = ["first", "second", "third", "fourth", "fifth"];

/// Torque at the transmission: throttle-scaled power derated by gear ratio,
/// minus rpm-proportional drag.
#[derive(Debug, Default)]
pub struct TorqueCalc;

impl TorqueCalc {
    pub fn new() -> Self {
        Self
    }
}

impl Calculator for TorqueCalc {
    fn name(&self) -> &'static str {
        channel::TORQUE
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, _dt_secs: f64) {
        let engine_speed = prev.num(channel::ENGINE_SPEED);
        let throttle = prev.num(channel::THROTTLE);
        let gear = prev.num(channel::GEAR).max(1.0);

        let drag = engine_speed * TORQUE_DRAG_COEFF;
        let gear_ratio = 1.0 - 0.1 * (gear - 1.0);
        let torque = if prev.flag(channel::IGNITION) {
            throttle * 15.0 * gear_ratio - drag
        } else {
            -drag
        };
        next.set(channel::TORQUE, torque);
    }
}

/// Engine speed in rpm, derived from road speed and the selected gear.
#[derive(Debug, Default)]
pub struct EngineSpeedCalc;

impl EngineSpeedCalc {
    pub fn new() -> Self {
        Self
    }
}

impl Calculator for EngineSpeedCalc {
    fn name(&self) -> &'static str {
        channel::ENGINE_SPEED
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, _dt_secs: f64) {
        let rpm = if prev.flag(channel::IGNITION) {
            let speed = prev.num(channel::SPEED);
            let gear = prev.num(channel::GEAR).max(1.0);
            (IDLE_RPM + speed * 60.0 / gear).min(MAX_RPM)
        } else {
            0.0
        };
        next.set(channel::ENGINE_SPEED, rpm);
    }
}

/// Oil temperature: linear warmup for the first two minutes of runtime, then
/// jitter around the operating baseline. A fired high-oil-temp trigger jumps
/// the baseline into a randomized high band exactly once.
#[derive(Debug)]
pub struct OilTempCalc {
    rng: StdRng,
    runtime_secs: f64,
    baseline: Option<f64>,
    jumped: bool,
}

impl OilTempCalc {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            runtime_secs: 0.0,
            baseline: None,
            jumped: false,
        }
    }
}

impl Calculator for OilTempCalc {
    fn name(&self) -> &'static str {
        channel::OIL_TEMP
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64) {
        if !prev.flag(channel::IGNITION) {
            next.set(channel::OIL_TEMP, prev.num(channel::OIL_TEMP));
            return;
        }

        self.runtime_secs += dt_secs;

        if prev.flag(channel::HIGH_OIL_TEMP) && !self.jumped {
            self.jumped = true;
            self.baseline = Some(self.rng.gen_range(OIL_HIGH_MIN..OIL_HIGH_MAX));
        }

        let temp = match self.baseline {
            Some(baseline) => baseline + self.rng.gen_range(-OIL_JITTER..=OIL_JITTER),
            None if self.runtime_secs < OIL_WARMUP_SECS => {
                OIL_TEMP_START + OIL_WARMUP_RATE * self.runtime_secs
            }
            None => {
                let operating = OIL_TEMP_START + OIL_WARMUP_RATE * OIL_WARMUP_SECS;
                self.baseline = Some(operating);
                operating + self.rng.gen_range(-OIL_JITTER..=OIL_JITTER)
            }
        };
        next.set(channel::OIL_TEMP, temp);
    }
}

/// Selector-style gear position string.
#[derive(Debug, Default)]
pub struct GearPositionCalc;

impl GearPositionCalc {
    pub fn new() -> Self {
        Self
    }
}

impl Calculator for GearPositionCalc {
    fn name(&self) -> &'static str {
        channel::GEAR_POSITION
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, _dt_secs: f64) {
        let position = if !prev.flag(channel::IGNITION) || prev.num(channel::SPEED) < 0.5 {
            "neutral"
        } else {
            let gear = (prev.num(channel::GEAR).max(1.0) as usize).min(GEAR_NAMES.len());
            GEAR_NAMES[gear - 1]
        };
        next.set(channel::GEAR_POSITION, position);
    }
}

/// Numeric gear selection by fixed speed bands.
#[derive(Debug, Default)]
pub struct GearCalc;

impl GearCalc {
    pub fn new() -> Self {
        Self
    }
}

impl Calculator for GearCalc {
    fn name(&self) -> &'static str {
        channel::GEAR
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, _dt_secs: f64) {
        if !prev.flag(channel::IGNITION) {
            next.set(channel::GEAR, 0.0);
            return;
        }
        let speed = prev.num(channel::SPEED);
        let gear = GEAR_BANDS.iter().position(|band| speed < *band);
        let gear = gear.unwrap_or(GEAR_BANDS.len()) as f64 + 1.0;
        next.set(channel::GEAR, gear);
    }
}
