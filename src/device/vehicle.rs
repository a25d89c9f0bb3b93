//! Vehicle devices: the dynamics model behind the publish plumbing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use rand::prelude::*;
use serde::Serialize;
use serde_json::json;
use tracing::error;

use super::{DeviceContext, PayloadSource, TickOutcome, TripInfo};
use crate::config::SimulationConfig;
use crate::dynamics::DynamicsModel;
use crate::dynamics::route::Route;
use crate::dynamics::snapshot::channel;
use crate::infra::blobs::put_json;
use crate::messages::{
    AggregateMessage, ChannelMessage, GeoPointer, LocationMessage, iso_micros, quantize,
    trip_geojson,
};

/// Standard VIN alphabet (I, O and Q excluded).
const VIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPRSTUVWXYZ0123456789";
const VIN_LENGTH: usize = 17;

/// Channels republished on every publish tick. Latitude and longitude are
/// deliberately absent: they travel merged in a single location message.
const PUBLISHED_CHANNELS: &[&str] = &[
    channel::SPEED,
    channel::ACCELERATION,
    channel::ENGINE_SPEED,
    channel::TORQUE,
    channel::FUEL_CONSUMED,
    channel::FUEL_LEVEL,
    channel::ODOMETER,
    channel::OIL_TEMP,
    channel::GEAR,
    channel::GEAR_POSITION,
    channel::THROTTLE,
    channel::BRAKE,
];

pub fn generate_vin(rng: &mut StdRng) -> String {
    (0..VIN_LENGTH)
        .map(|_| *VIN_ALPHABET.choose(rng).expect("non-empty alphabet") as char)
        .collect()
}

pub struct VehicleSource {
    vin: String,
    topic: String,
    aggregate_topic: String,
    physics_interval: Duration,
    aggregation_interval: Duration,
    model: tokio::sync::Mutex<DynamicsModel>,
    published_dtcs: Mutex<HashSet<String>>,
    last_aggregate: Mutex<Option<Instant>>,
    path: Mutex<Vec<[f64; 2]>>,
}

impl VehicleSource {
    /// Builds a vehicle over a loaded route. A supplied VIN is kept;
    /// otherwise one is generated from the device seed.
    pub fn new(
        route: Arc<Route>,
        config: &SimulationConfig,
        vin: Option<String>,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let vin = vin.unwrap_or_else(|| generate_vin(&mut rng));
        let model = DynamicsModel::new(route, config.driver_profile, config.triggers, seed);
        let topic = format!("{}/{}", config.telemetry_topic_prefix, vin);
        let aggregate_topic = format!("{topic}/aggregate");
        Self {
            vin,
            topic,
            aggregate_topic,
            physics_interval: Duration::from_millis(config.physics_interval_ms),
            aggregation_interval: Duration::from_millis(config.aggregation_interval_ms),
            model: tokio::sync::Mutex::new(model),
            published_dtcs: Mutex::new(HashSet::new()),
            last_aggregate: Mutex::new(None),
            path: Mutex::new(Vec::new()),
        }
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    /// Read access to the underlying model, mainly for observability.
    pub fn model(&self) -> &tokio::sync::Mutex<DynamicsModel> {
        &self.model
    }

    async fn send(&self, ctx: &DeviceContext, topic: &str, message: &impl Serialize) {
        match serde_json::to_vec(message) {
            Ok(body) => {
                if let Err(e) = ctx.publisher.publish(topic, Bytes::from(body)).await {
                    error!(error = %e, topic, "telemetry publish failed");
                }
            }
            Err(e) => error!(error = %e, topic, "telemetry serialization failed"),
        }
    }

    /// Whether an aggregated message is due: once immediately at the first
    /// tick, then at most once per aggregation interval.
    fn aggregate_due(&self) -> bool {
        let mut last = self.last_aggregate.lock().expect("aggregate clock poisoned");
        match *last {
            Some(at) if at.elapsed() < self.aggregation_interval => false,
            _ => {
                *last = Some(Instant::now());
                true
            }
        }
    }
}

#[async_trait]
impl PayloadSource for VehicleSource {
    fn kind(&self) -> &'static str {
        "vehicle"
    }

    fn physics_interval(&self) -> Option<Duration> {
        Some(self.physics_interval)
    }

    async fn on_start(&self, _trip: &TripInfo) {
        self.model.lock().await.set_ignition(true);
        self.published_dtcs.lock().expect("dtc set poisoned").clear();
        self.path.lock().expect("path poisoned").clear();
        *self.last_aggregate.lock().expect("aggregate clock poisoned") = None;
    }

    async fn physics_tick(&self) {
        let mut model = self.model.lock().await;
        // Once the route ends the tick loop goes quiet; the next publish
        // tick observes the flag and stops the device.
        if !model.ended() {
            model.tick();
        }
    }

    async fn publish_tick(&self, ctx: &DeviceContext, trip: &TripInfo) -> Result<TickOutcome> {
        let (snapshot, ended) = {
            let model = self.model.lock().await;
            (model.snapshot().clone(), model.ended())
        };
        if !snapshot.flag(channel::IGNITION) {
            return Ok(TickOutcome::Continue);
        }

        let timestamp = iso_micros(Utc::now());
        for name in PUBLISHED_CHANNELS {
            let Some(value) = snapshot.get(name) else {
                continue;
            };
            let value = match value.as_f64() {
                Some(number) => json!(quantize(name, number)),
                None => value.clone(),
            };
            let message = ChannelMessage {
                timestamp: timestamp.clone(),
                trip_id: trip.trip_id.clone(),
                vin: self.vin.clone(),
                name: name.to_string(),
                value,
            };
            self.send(ctx, &self.topic, &message).await;
        }

        let lat = snapshot.num(channel::LATITUDE);
        let lon = snapshot.num(channel::LONGITUDE);
        let location = LocationMessage::new(
            timestamp.clone(),
            trip.trip_id.clone(),
            self.vin.clone(),
            lat,
            lon,
        );
        self.send(ctx, &self.topic, &location).await;
        self.path.lock().expect("path poisoned").push([lon, lat]);

        // Each unique trouble code goes out once per run.
        if let Some(code) = snapshot.text(channel::DTC_CODE) {
            let fresh = self
                .published_dtcs
                .lock()
                .expect("dtc set poisoned")
                .insert(code.to_string());
            if fresh {
                let message = ChannelMessage {
                    timestamp: timestamp.clone(),
                    trip_id: trip.trip_id.clone(),
                    vin: self.vin.clone(),
                    name: "dtc".to_string(),
                    value: json!(code),
                };
                self.send(ctx, &self.topic, &message).await;
            }
        }

        if ended {
            let metrics = {
                let mut model = self.model.lock().await;
                model.metrics_mut().finalize();
                model.metrics().report()
            };

            let geojson = trip_geojson(&self.path.lock().expect("path poisoned").clone());
            let key = format!("trips/{}/{}.geojson", self.vin, trip.trip_id);
            let pointer = match put_json(ctx.blobs.as_ref(), &key, &geojson).await {
                Ok(()) => Some(GeoPointer {
                    bucket: ctx.blobs.bucket().to_string(),
                    key,
                }),
                Err(e) => {
                    error!(error = %e, "trip geojson upload failed");
                    None
                }
            };

            let message =
                AggregateMessage::new(trip.trip_id.clone(), self.vin.clone(), metrics, pointer);
            self.send(ctx, &self.aggregate_topic, &message).await;
            return Ok(TickOutcome::Finished);
        }

        if self.aggregate_due() {
            let metrics = self.model.lock().await.metrics().report();
            let message = AggregateMessage::new(trip.trip_id.clone(), self.vin.clone(), metrics, None);
            self.send(ctx, &self.aggregate_topic, &message).await;
        }

        Ok(TickOutcome::Continue)
    }

    async fn on_stop(&self) {
        self.model.lock().await.set_ignition(false);
    }
}
