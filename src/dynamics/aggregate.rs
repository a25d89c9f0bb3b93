//! Rolling trip statistics.
//!
//! The [`Aggregator`] consumes every snapshot the model produces and keeps
//! incremental means plus threshold-crossing counters for the whole trip.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use super::snapshot::{Snapshot, channel};

/// Channels tracked with a running mean.
pub const MEASURED_CHANNELS: &[&str] = &[
    channel::SPEED,
    channel::ENGINE_SPEED,
    channel::TORQUE,
    channel::OIL_TEMP,
    channel::FUEL_LEVEL,
];

const HIGH_SPEED_KMH: f64 = 90.0;
const IDLE_SPEED_KMH: f64 = 1.0;
const HIGH_ACCEL_MS2: f64 = 3.2;
const HIGH_BRAKE_MS2: f64 = -3.5;
const ACCEL_SAMPLE_SECS: f64 = 1.0;

/// Running mean over an unbounded sample stream.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ChannelStat {
    pub mean: f64,
    pub samples: u64,
}

impl ChannelStat {
    fn push(&mut self, value: f64) {
        self.mean = (self.mean * self.samples as f64 + value) / (self.samples as f64 + 1.0);
        self.samples += 1;
    }
}

/// Serializable view of a trip's aggregated telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub channels: BTreeMap<String, ChannelStat>,
    pub high_speed_duration_ms: u64,
    pub idle_duration_ms: u64,
    pub high_acceleration_events: u32,
    pub high_braking_events: u32,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Aggregator {
    channels: BTreeMap<&'static str, ChannelStat>,
    high_speed_ms: f64,
    idle_ms: f64,
    high_acceleration_events: u32,
    high_braking_events: u32,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    accel_window_secs: f64,
    speed_at_window_start: f64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            channels: MEASURED_CHANNELS
                .iter()
                .map(|c| (*c, ChannelStat::default()))
                .collect(),
            high_speed_ms: 0.0,
            idle_ms: 0.0,
            high_acceleration_events: 0,
            high_braking_events: 0,
            start_time: Utc::now(),
            end_time: None,
            accel_window_secs: 0.0,
            speed_at_window_start: 0.0,
        }
    }

    /// Folds one snapshot into the trip statistics. `dt_secs` is the elapsed
    /// time since the previous snapshot.
    pub fn observe(&mut self, snapshot: &Snapshot, dt_secs: f64) {
        for (name, stat) in self.channels.iter_mut() {
            stat.push(snapshot.num(name));
        }

        let speed = snapshot.num(channel::SPEED);
        if speed > HIGH_SPEED_KMH {
            self.high_speed_ms += dt_secs * 1000.0;
        }
        if snapshot.flag(channel::IGNITION) && speed <= IDLE_SPEED_KMH {
            self.idle_ms += dt_secs * 1000.0;
        }

        // Acceleration events are judged over >= 1 s windows rather than per
        // tick, so short scheduling hiccups do not register as maneuvers.
        self.accel_window_secs += dt_secs;
        if self.accel_window_secs >= ACCEL_SAMPLE_SECS {
            let accel = (speed - self.speed_at_window_start) / 3.6 / self.accel_window_secs;
            if accel > HIGH_ACCEL_MS2 {
                self.high_acceleration_events += 1;
            }
            if accel < HIGH_BRAKE_MS2 {
                self.high_braking_events += 1;
            }
            self.accel_window_secs = 0.0;
            self.speed_at_window_start = speed;
        }
    }

    /// Reinitializes all counters for a new trip.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Marks the trip as finished.
    pub fn finalize(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        self.channels.get(name).map(|s| s.mean)
    }

    /// Materializes the current state for publication.
    pub fn report(&self) -> AggregatedMetrics {
        AggregatedMetrics {
            channels: self
                .channels
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            high_speed_duration_ms: self.high_speed_ms as u64,
            idle_duration_ms: self.idle_ms as u64,
            high_acceleration_events: self.high_acceleration_events,
            high_braking_events: self.high_braking_events,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}
