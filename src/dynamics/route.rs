//! Route definitions and the route stage machine.
//!
//! A [`Route`] is an ordered list of stages, each a leg between two
//! waypoints with a target distance. The [`RouteStateMachine`] is the
//! calculator that drives the virtual driver: it works the throttle, walks
//! the vehicle through the stages as the odometer accumulates, injects
//! randomized trigger events, and signals completion.

use anyhow::{Context, Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::Calculator;
use super::snapshot::{Snapshot, channel};

const ADJUST_MIN_SECS: f64 = 30.0;
const ADJUST_MAX_SECS: f64 = 60.0;
const JITTER_PERIOD_SECS: f64 = 7.0;
const JITTER_MAX: f64 = 2.0;
const BURNDOWN_SECS: f64 = 20.0;
const BRAKE_HOLD_SECS: f64 = 5.0;
const THROTTLE_MAX: f64 = 99.0;

/// Diagnostic trouble codes sampled by the `dtc` trigger.
const DTC_CODES: &[&str] = &[
    "P0100", "P0101", "P0113", "P0128", "P0171", "P0300", "P0301", "P0420", "P0442", "P0455",
    "P0504", "C1201", "U0100",
];

/// One leg of a route between two `[longitude, latitude]` waypoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStage {
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub distance_km: f64,
    #[serde(default)]
    pub triggers: Vec<StageTrigger>,
}

/// A trigger attached to a specific stage; activates when the stage begins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrigger {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Brake,
    Dtc,
    #[serde(rename = "oiltemp")]
    OilTemp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub name: Option<String>,
    pub stages: Vec<RouteStage>,
}

impl Route {
    pub fn total_km(&self) -> f64 {
        self.stages.iter().map(|s| s.distance_km).sum()
    }
}

/// Decodes a route document from raw blob-store bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid JSON for a [`Route`] or the
/// route has no stages.
pub fn parse_route(bytes: &[u8]) -> Result<Route> {
    let route: Route = serde_json::from_slice(bytes).context("route file is not valid JSON")?;
    if route.stages.is_empty() {
        bail!("route has no stages");
    }
    Ok(route)
}

/// How many of each trigger kind to scatter along the route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerCounts {
    pub brake: u32,
    pub dtc: u32,
    pub oiltemp: u32,
}

impl Default for TriggerCounts {
    fn default() -> Self {
        Self {
            brake: 1,
            dtc: 2,
            oiltemp: 1,
        }
    }
}

/// Throttle-step tables for the two supported driver temperaments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverProfile {
    #[default]
    Normal,
    Aggressive,
}

impl DriverProfile {
    fn step_table(self) -> &'static [f64] {
        match self {
            DriverProfile::Normal => &[-15.0, -10.0, -5.0, 5.0, 10.0, 15.0, 20.0],
            DriverProfile::Aggressive => &[-25.0, -15.0, 10.0, 20.0, 30.0, 40.0],
        }
    }
}

/// Route phase; transitions are monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Advancing,
    Burndown,
    Ended,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Advancing => "advancing",
            Phase::Burndown => "burndown",
            Phase::Ended => "ended",
        }
    }
}

/// A randomized, at-most-once event at a specific route distance.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub at_km: f64,
    pub fired: bool,
}

/// The calculator named `route_stage`.
pub struct RouteStateMachine {
    route: std::sync::Arc<Route>,
    rng: StdRng,
    profile: DriverProfile,
    phase: Phase,
    stage_index: usize,
    odo_at_stage_start: f64,
    pending: Vec<Trigger>,
    throttle: f64,
    brake: f64,
    brake_hold_left: f64,
    next_adjust_in: f64,
    jitter_in: f64,
    burndown_left: f64,
    elapsed_secs: f64,
    duration_secs: Option<f64>,
}

impl RouteStateMachine {
    pub fn new(
        route: std::sync::Arc<Route>,
        profile: DriverProfile,
        counts: TriggerCounts,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut pending = place_triggers(&mut rng, counts, route.total_km());
        // Stage-defined triggers on the first leg are live from the start.
        for st in &route.stages[0].triggers {
            pending.push(Trigger {
                kind: st.kind,
                at_km: 0.0,
                fired: false,
            });
        }
        let throttle = rng.gen_range(20.0..50.0);
        let next_adjust_in = rng.gen_range(ADJUST_MIN_SECS..ADJUST_MAX_SECS);
        Self {
            route,
            rng,
            profile,
            phase: Phase::Advancing,
            stage_index: 0,
            odo_at_stage_start: 0.0,
            pending,
            throttle,
            brake: 0.0,
            brake_hold_left: 0.0,
            next_adjust_in,
            jitter_in: JITTER_PERIOD_SECS,
            burndown_left: 0.0,
            elapsed_secs: 0.0,
            duration_secs: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    pub fn pending_triggers(&self) -> &[Trigger] {
        &self.pending
    }

    /// Total route duration in seconds, recorded when the trip ends.
    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_secs
    }

    fn adjust_throttle(&mut self, dt_secs: f64, speed: f64) {
        self.next_adjust_in -= dt_secs;
        if self.next_adjust_in <= 0.0 {
            let step = *self
                .profile
                .step_table()
                .choose(&mut self.rng)
                .expect("non-empty step table");
            self.throttle = (self.throttle + step).clamp(0.0, THROTTLE_MAX);
            self.next_adjust_in = self.rng.gen_range(ADJUST_MIN_SECS..ADJUST_MAX_SECS);
            debug!(step, throttle = self.throttle, "throttle adjusted");
        }

        self.jitter_in -= dt_secs;
        if self.jitter_in <= 0.0 {
            if self.brake <= 0.0 && speed > 1.0 {
                let nudge = self.rng.gen_range(-JITTER_MAX..=JITTER_MAX);
                self.throttle = (self.throttle + nudge).clamp(0.0, THROTTLE_MAX);
            }
            self.jitter_in = JITTER_PERIOD_SECS;
        }
    }

    fn fire_due_triggers(&mut self, odometer: f64, next: &mut Snapshot) {
        for i in 0..self.pending.len() {
            if self.pending[i].fired || odometer < self.pending[i].at_km {
                continue;
            }
            self.pending[i].fired = true;
            let kind = self.pending[i].kind;
            match kind {
                TriggerKind::Brake => {
                    self.throttle = 0.0;
                    self.brake = 100.0;
                    self.brake_hold_left = BRAKE_HOLD_SECS;
                }
                TriggerKind::Dtc => {
                    let code = *DTC_CODES.choose(&mut self.rng).expect("non-empty table");
                    next.set(channel::DTC_CODE, code);
                }
                TriggerKind::OilTemp => {
                    next.set(channel::HIGH_OIL_TEMP, true);
                }
            }
            info!(kind = ?kind, at_km = self.pending[i].at_km, "route trigger fired");
        }
    }

    fn set_position(&self, next: &mut Snapshot, lon: f64, lat: f64) {
        next.set(channel::LONGITUDE, lon);
        next.set(channel::LATITUDE, lat);
    }

    fn advance_stages(&mut self, odometer: f64, next: &mut Snapshot) {
        loop {
            let stage = &self.route.stages[self.stage_index];
            let stage_odo = odometer - self.odo_at_stage_start;
            if stage_odo < stage.distance_km {
                let frac = (stage_odo / stage.distance_km).min(1.0);
                let lon = stage.start[0] + (stage.end[0] - stage.start[0]) * frac;
                let lat = stage.start[1] + (stage.end[1] - stage.start[1]) * frac;
                self.set_position(next, lon, lat);
                return;
            }

            if self.stage_index + 1 < self.route.stages.len() {
                self.stage_index += 1;
                self.odo_at_stage_start = odometer;
                let stage = &self.route.stages[self.stage_index];
                self.set_position(next, stage.start[0], stage.start[1]);
                let new_triggers: Vec<Trigger> = stage
                    .triggers
                    .iter()
                    .map(|st| Trigger {
                        kind: st.kind,
                        at_km: odometer,
                        fired: false,
                    })
                    .collect();
                self.pending.extend(new_triggers);
                debug!(stage = self.stage_index, odometer, "stage advanced");
            } else {
                self.phase = Phase::Burndown;
                self.burndown_left = BURNDOWN_SECS;
                self.throttle = 0.0;
                self.brake = 100.0;
                info!(odometer, "route exhausted, entering burndown");
                return;
            }
        }
    }
}

impl Calculator for RouteStateMachine {
    fn name(&self) -> &'static str {
        channel::ROUTE_STAGE
    }

    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64) {
        self.elapsed_secs += dt_secs;
        let odometer = prev.num(channel::ODOMETER);
        let speed = prev.num(channel::SPEED);

        match self.phase {
            Phase::Advancing => {
                if self.brake_hold_left > 0.0 {
                    self.brake_hold_left -= dt_secs;
                    self.throttle = 0.0;
                    if self.brake_hold_left <= 0.0 {
                        self.brake = 0.0;
                    }
                } else {
                    self.adjust_throttle(dt_secs, speed);
                }
                self.fire_due_triggers(odometer, next);
                self.advance_stages(odometer, next);
            }
            Phase::Burndown => {
                self.throttle = 0.0;
                self.brake = 100.0;
                self.burndown_left -= dt_secs;
                if self.burndown_left <= 0.0 {
                    self.phase = Phase::Ended;
                    self.duration_secs = Some(self.elapsed_secs);
                    let last = self.route.stages.last().expect("non-empty route");
                    self.set_position(next, last.end[0], last.end[1]);
                    info!(
                        duration_secs = self.elapsed_secs,
                        odometer, "route ended"
                    );
                }
            }
            Phase::Ended => {
                let last = self.route.stages.last().expect("non-empty route");
                self.set_position(next, last.end[0], last.end[1]);
            }
        }

        next.set(channel::THROTTLE, self.throttle);
        next.set(channel::BRAKE, self.brake);
        next.set(channel::ROUTE_STAGE, self.stage_index as u64);
        if self.phase == Phase::Ended {
            next.set(channel::ROUTE_ENDED, true);
        }
    }
}

fn place_triggers(rng: &mut StdRng, counts: TriggerCounts, total_km: f64) -> Vec<Trigger> {
    let mut triggers = Vec::new();
    if total_km <= 0.0 {
        return triggers;
    }
    let plan = [
        (TriggerKind::Brake, counts.brake),
        (TriggerKind::Dtc, counts.dtc),
        (TriggerKind::OilTemp, counts.oiltemp),
    ];
    for (kind, count) in plan {
        for _ in 0..count {
            triggers.push(Trigger {
                kind,
                at_km: rng.gen_range(0.0..total_km),
                fired: false,
            });
        }
    }
    triggers
}
