//! Vehicle dynamics simulation.
//!
//! One [`DynamicsModel`] owns the ordered calculator chain, the route stage
//! machine and the trip aggregator, advancing them together once per tick.

pub mod aggregate;
pub mod engine;
pub mod fuel;
pub mod motion;
pub mod route;
pub mod snapshot;

use std::sync::Arc;

use self::aggregate::Aggregator;
use self::engine::{
    EngineSpeedCalc, GearCalc, GearPositionCalc, OIL_TEMP_START, OilTempCalc, TorqueCalc,
};
use self::fuel::{FuelConsumedCalc, FuelLevelCalc, OdometerCalc};
use self::motion::{AccelerationCalc, SpeedCalc};
use self::route::{DriverProfile, Route, RouteStateMachine, TriggerCounts};
use self::snapshot::{LapTimer, Snapshot, channel};

/// Default cadence of the physics loop.
pub const PHYSICS_INTERVAL_MS: u64 = 500;

/// A stateful unit producing one (or a small family of) derived telemetry
/// channels per tick.
///
/// Implementations read only the previous snapshot and write only their own
/// channels into the next one; the chain order in [`DynamicsModel::new`]
/// makes the inter-channel data flow explicit.
pub trait Calculator: Send {
    fn name(&self) -> &'static str;
    fn iterate(&mut self, prev: &Snapshot, next: &mut Snapshot, dt_secs: f64);
}

pub struct DynamicsModel {
    chain: Vec<Box<dyn Calculator>>,
    snapshot: Snapshot,
    metrics: Aggregator,
    route: Arc<Route>,
    timer: LapTimer,
    ended: bool,
}

impl DynamicsModel {
    pub fn new(
        route: Arc<Route>,
        profile: DriverProfile,
        triggers: TriggerCounts,
        seed: u64,
    ) -> Self {
        let chain: Vec<Box<dyn Calculator>> = vec![
            Box::new(RouteStateMachine::new(
                route.clone(),
                profile,
                triggers,
                seed,
            )),
            Box::new(SpeedCalc::new()),
            Box::new(AccelerationCalc::new()),
            Box::new(TorqueCalc::new()),
            Box::new(EngineSpeedCalc::new()),
            Box::new(FuelConsumedCalc::new()),
            Box::new(FuelLevelCalc::new()),
            Box::new(OdometerCalc::new()),
            Box::new(OilTempCalc::new(seed.wrapping_add(1))),
            Box::new(GearPositionCalc::new()),
            Box::new(GearCalc::new()),
        ];

        Self {
            chain,
            snapshot: initial_snapshot(&route),
            metrics: Aggregator::new(),
            route,
            timer: LapTimer::new(),
            ended: false,
        }
    }

    /// Runs one simulation tick against wall-clock elapsed time.
    pub fn tick(&mut self) -> &Snapshot {
        let dt = self.timer.lap();
        self.advance(dt)
    }

    /// Runs one simulation tick with an explicit time delta.
    pub fn advance(&mut self, dt_secs: f64) -> &Snapshot {
        let mut next = self.snapshot.clone();
        for calc in &mut self.chain {
            calc.iterate(&self.snapshot, &mut next, dt_secs);
        }
        self.metrics.observe(&next, dt_secs);
        self.ended = next.flag(channel::ROUTE_ENDED);
        self.snapshot = next;
        &self.snapshot
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn metrics(&self) -> &Aggregator {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut Aggregator {
        &mut self.metrics
    }

    /// True once the route stage machine has reached its terminal phase.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Flips the ignition; called by the owning device on start/stop. A trip
    /// start also resets the aggregator.
    pub fn set_ignition(&mut self, on: bool) {
        self.snapshot.set(channel::IGNITION, on);
        if on {
            self.metrics.reset();
        }
    }
}

fn initial_snapshot(route: &Route) -> Snapshot {
    let first = &route.stages[0];
    let mut snap = Snapshot::new();
    snap.set(channel::IGNITION, false);
    snap.set(channel::PARKING_BRAKE, false);
    snap.set(channel::THROTTLE, 0.0);
    snap.set(channel::BRAKE, 0.0);
    snap.set(channel::SPEED, 0.0);
    snap.set(channel::ACCELERATION, 0.0);
    snap.set(channel::TORQUE, 0.0);
    snap.set(channel::ENGINE_SPEED, 0.0);
    snap.set(channel::FUEL_CONSUMED, 0.0);
    snap.set(channel::FUEL_LEVEL, 100.0);
    snap.set(channel::ODOMETER, 0.0);
    snap.set(channel::OIL_TEMP, OIL_TEMP_START);
    snap.set(channel::GEAR, 0.0);
    snap.set(channel::GEAR_POSITION, "neutral");
    snap.set(channel::LONGITUDE, first.start[0]);
    snap.set(channel::LATITUDE, first.start[1]);
    snap.set(channel::ROUTE_STAGE, 0u64);
    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::route::RouteStage;

    fn short_route() -> Arc<Route> {
        Arc::new(Route {
            name: None,
            stages: vec![RouteStage {
                start: [-122.33, 47.60],
                end: [-122.30, 47.62],
                distance_km: 2.0,
                triggers: Vec::new(),
            }],
        })
    }

    fn quiet_triggers() -> TriggerCounts {
        TriggerCounts {
            brake: 0,
            dtc: 0,
            oiltemp: 0,
        }
    }

    fn running_model() -> DynamicsModel {
        let mut model = DynamicsModel::new(
            short_route(),
            DriverProfile::Normal,
            quiet_triggers(),
            1234,
        );
        model.set_ignition(true);
        model
    }

    #[test]
    fn test_vehicle_moves_under_throttle() {
        let mut model = running_model();
        for _ in 0..60 {
            model.advance(0.5);
        }
        let snap = model.snapshot();
        assert!(snap.num(channel::SPEED) > 0.0);
        assert!(snap.num(channel::ODOMETER) > 0.0);
        assert!(snap.num(channel::ENGINE_SPEED) > 0.0);
    }

    #[test]
    fn test_fuel_level_monotone_while_running() {
        let mut model = running_model();
        let mut last = model.snapshot().num(channel::FUEL_LEVEL);
        for _ in 0..500 {
            let level = model.advance(0.5).num(channel::FUEL_LEVEL);
            assert!(level <= last);
            last = level;
        }
        assert!(last < 100.0);
    }

    #[test]
    fn test_trip_runs_to_completion() {
        let mut model = running_model();
        let mut ticks = 0u32;
        while !model.ended() && ticks < 50_000 {
            model.advance(0.5);
            ticks += 1;
        }

        assert!(model.ended(), "route did not complete within bound");
        let snap = model.snapshot();
        assert!(snap.num(channel::ODOMETER) >= model.route().total_km());
        assert!(snap.flag(channel::ROUTE_ENDED));
        assert!(model.metrics().report().channels[channel::SPEED].samples > 0);
    }

    #[test]
    fn test_stationary_with_ignition_off() {
        let mut model = DynamicsModel::new(
            short_route(),
            DriverProfile::Normal,
            quiet_triggers(),
            77,
        );
        for _ in 0..20 {
            model.advance(0.5);
        }
        let snap = model.snapshot();
        assert_eq!(snap.num(channel::SPEED), 0.0);
        assert_eq!(snap.num(channel::FUEL_CONSUMED), 0.0);
        assert_eq!(snap.num(channel::ENGINE_SPEED), 0.0);
    }
}
