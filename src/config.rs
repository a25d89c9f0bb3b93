//! Simulation run configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::dynamics::route::{DriverProfile, TriggerCounts};

/// Knobs for one simulation run, loaded from a JSON document.
///
/// Every field has a default, so a config file only needs to spell out what
/// it overrides:
/// ```json
/// {
///   "publish_interval_ms": 1000,
///   "driver_profile": "aggressive",
///   "triggers": {"brake": 2, "dtc": 3, "oiltemp": 1}
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Cadence of the vehicle physics loop.
    pub physics_interval_ms: u64,
    /// Cadence of telemetry publication.
    pub publish_interval_ms: u64,
    /// How often a running device re-reads its persisted record to observe
    /// an externally requested stop.
    pub stage_poll_interval_ms: u64,
    /// Minimum spacing between aggregated telemetry messages.
    pub aggregation_interval_ms: u64,
    /// Cadence of the fleet garbage-collection sweep.
    pub gc_interval_ms: u64,
    /// Topic prefix for vehicle telemetry.
    pub telemetry_topic_prefix: String,
    pub driver_profile: DriverProfile,
    pub triggers: TriggerCounts,
    /// Fixed seed for reproducible runs; absent means seeded from entropy.
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            physics_interval_ms: crate::dynamics::PHYSICS_INTERVAL_MS,
            publish_interval_ms: 2_000,
            stage_poll_interval_ms: 30_000,
            aggregation_interval_ms: 60_000,
            gc_interval_ms: 30_000,
            telemetry_topic_prefix: "fleetsim/telemetry".to_string(),
            driver_profile: DriverProfile::Normal,
            triggers: TriggerCounts::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read config file '{path}'"))?;
        serde_json::from_str(&content).with_context(|| format!("invalid config file '{path}'"))
    }
}
