//! Shapes of the messages published to the telemetry transport.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::dynamics::aggregate::AggregatedMetrics;
use crate::dynamics::snapshot::channel;

/// Decimal places kept per published channel.
const PRECISION: &[(&str, u32)] = &[
    (channel::SPEED, 1),
    (channel::ACCELERATION, 3),
    (channel::ENGINE_SPEED, 0),
    (channel::TORQUE, 1),
    (channel::FUEL_CONSUMED, 6),
    (channel::FUEL_LEVEL, 2),
    (channel::ODOMETER, 3),
    (channel::OIL_TEMP, 1),
    (channel::THROTTLE, 1),
    (channel::BRAKE, 1),
    (channel::LATITUDE, 6),
    (channel::LONGITUDE, 6),
];

/// Timestamp format carried by every published message.
pub fn iso_micros(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Rounds a channel value to its configured publication precision.
pub fn quantize(channel_name: &str, value: f64) -> f64 {
    let precision = PRECISION
        .iter()
        .find(|(name, _)| *name == channel_name)
        .map(|(_, p)| *p)
        .unwrap_or(2);
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

/// One telemetry channel reading.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelMessage {
    pub timestamp: String,
    pub trip_id: String,
    pub vin: String,
    pub name: String,
    pub value: Value,
}

/// Latitude and longitude merged into a single position message.
#[derive(Debug, Clone, Serialize)]
pub struct LocationMessage {
    pub timestamp: String,
    pub trip_id: String,
    pub vin: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationMessage {
    pub fn new(timestamp: String, trip_id: String, vin: String, lat: f64, lon: f64) -> Self {
        Self {
            timestamp,
            trip_id,
            vin,
            name: "location".to_string(),
            latitude: quantize(channel::LATITUDE, lat),
            longitude: quantize(channel::LONGITUDE, lon),
        }
    }
}

/// Pointer to an uploaded trip GeoJSON object.
#[derive(Debug, Clone, Serialize)]
pub struct GeoPointer {
    pub bucket: String,
    pub key: String,
}

/// Trip-level aggregated telemetry.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateMessage {
    pub timestamp: String,
    pub trip_id: String,
    pub vin: String,
    pub name: String,
    #[serde(flatten)]
    pub metrics: AggregatedMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geojson: Option<GeoPointer>,
}

impl AggregateMessage {
    pub fn new(
        trip_id: String,
        vin: String,
        metrics: AggregatedMetrics,
        geojson: Option<GeoPointer>,
    ) -> Self {
        Self {
            timestamp: iso_micros(Utc::now()),
            trip_id,
            vin,
            name: "aggregated_telemetrics".to_string(),
            metrics,
            geojson,
        }
    }
}

/// Builds a GeoJSON `LineString` feature from the trip path.
pub fn trip_geojson(path: &[[f64; 2]]) -> Value {
    serde_json::json!({
        "type": "Feature",
        "geometry": {
            "type": "LineString",
            "coordinates": path,
        },
        "properties": {},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_uses_channel_precision() {
        assert_eq!(quantize(channel::SPEED, 61.2345), 61.2);
        assert_eq!(quantize(channel::ENGINE_SPEED, 2150.7), 2151.0);
        assert_eq!(quantize(channel::LATITUDE, 47.123456789), 47.123457);
        // Unlisted channels fall back to two decimals.
        assert_eq!(quantize("custom", 1.2345), 1.23);
    }

    #[test]
    fn test_iso_micros_has_microsecond_field() {
        let ts = iso_micros(Utc::now());
        let fraction = ts.rsplit('.').next().unwrap();
        assert_eq!(fraction.len(), 6);
    }

    #[test]
    fn test_aggregate_message_flattens_metrics() {
        let metrics = crate::dynamics::aggregate::Aggregator::new().report();
        let msg = AggregateMessage::new("t-1".into(), "VIN".into(), metrics, None);
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["name"], "aggregated_telemetrics");
        assert!(value.get("high_speed_duration_ms").is_some());
        assert!(value.get("geojson").is_none());
    }

    #[test]
    fn test_trip_geojson_is_linestring() {
        let geo = trip_geojson(&[[-122.3, 47.6], [-122.2, 47.7]]);
        assert_eq!(geo["geometry"]["type"], "LineString");
        assert_eq!(geo["geometry"]["coordinates"].as_array().unwrap().len(), 2);
    }
}
