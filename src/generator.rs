//! Schema-driven synthetic payload generation for generic devices.
//!
//! An [`AttributeGenerator`] turns a list of [`AttributeSpec`]s into a JSON
//! payload. Values are drawn from a per-generator seeded RNG so repeated runs
//! with the same seed produce identical streams.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::f64::consts::TAU;

const DEFAULT_ID_LENGTH: usize = 21;
const DEFAULT_FLOAT_PRECISION: u32 = 2;
/// Kilometers per degree of latitude / of longitude at the equator.
const KM_PER_DEG_LAT: f64 = 110.574;
const KM_PER_DEG_LON: f64 = 111.320;

/// Declarative description of one generated attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    /// Static attributes are synthesized once and then reused for the
    /// lifetime of the generator, so identifier-like fields stay stable
    /// across repeated emissions from the same simulated device.
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// A non-empty default bypasses randomness and is emitted verbatim,
    /// except that boolean specs coerce `"true"`/`"false"` strings.
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AttributeKind {
    Id {
        #[serde(default)]
        length: Option<usize>,
        #[serde(default)]
        charset: Option<String>,
    },
    String {
        min: usize,
        max: usize,
    },
    Int {
        min: i64,
        max: i64,
    },
    Float {
        min: f64,
        max: f64,
        #[serde(default)]
        precision: Option<u32>,
    },
    Bool,
    Timestamp {
        #[serde(default)]
        tsformat: Option<String>,
    },
    Location {
        /// `[latitude, longitude]` of the sampling disk center.
        center: [f64; 2],
        /// Disk radius in kilometers.
        radius: f64,
    },
    #[serde(rename = "pickOne")]
    PickOne {
        arr: Vec<Value>,
    },
    Sinusoidal {
        min: f64,
        max: f64,
    },
    Decay {
        min: f64,
        max: f64,
    },
    Object {
        payload: Vec<AttributeSpec>,
    },
}

/// Stateful payload generator.
///
/// Holds the per-attribute call counters that drive the `sinusoidal` and
/// `decay` curves and the cache backing `static` attributes.
pub struct AttributeGenerator {
    rng: StdRng,
    steps: HashMap<String, u64>,
    cache: HashMap<String, Value>,
}

impl AttributeGenerator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            steps: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    /// Generates one payload object from the given specs.
    pub fn generate(&mut self, specs: &[AttributeSpec]) -> Value {
        Value::Object(self.generate_at("", specs))
    }

    fn generate_at(&mut self, prefix: &str, specs: &[AttributeSpec]) -> Map<String, Value> {
        let mut payload = Map::new();
        for spec in specs {
            let value = self.value_for(prefix, spec);
            payload.insert(spec.name.clone(), value);
        }
        payload
    }

    fn value_for(&mut self, prefix: &str, spec: &AttributeSpec) -> Value {
        let key = format!("{prefix}{}", spec.name);

        // The step counter advances on every visit, including the cached and
        // default paths. The sinusoidal and decay curves depend on this exact
        // counting, so a default elsewhere in the payload does not change
        // their shape.
        let step = {
            let counter = self.steps.entry(key.clone()).or_insert(0);
            *counter += 1;
            *counter
        };

        if let Some(default) = spec.default.as_ref().filter(|d| !is_empty_default(d)) {
            return coerce_default(default, &spec.kind);
        }

        if spec.is_static {
            if let Some(cached) = self.cache.get(&key) {
                return cached.clone();
            }
        }

        let value = self.synthesize(&key, &spec.kind, step);

        if spec.is_static {
            self.cache.insert(key, value.clone());
        }

        value
    }

    fn synthesize(&mut self, key: &str, kind: &AttributeKind, step: u64) -> Value {
        match kind {
            AttributeKind::Id { length, charset } => {
                let len = length.unwrap_or(DEFAULT_ID_LENGTH);
                Value::String(match charset {
                    Some(chars) if !chars.is_empty() => {
                        let pool: Vec<char> = chars.chars().collect();
                        (0..len)
                            .map(|_| *pool.choose(&mut self.rng).expect("non-empty charset"))
                            .collect()
                    }
                    _ => (&mut self.rng)
                        .sample_iter(Alphanumeric)
                        .take(len)
                        .map(char::from)
                        .collect(),
                })
            }
            AttributeKind::String { min, max } => {
                let len = self.rng.gen_range(*min..=*max);
                Value::String(
                    (&mut self.rng)
                        .sample_iter(Alphanumeric)
                        .take(len)
                        .map(char::from)
                        .collect(),
                )
            }
            AttributeKind::Int { min, max } => json!(self.rng.gen_range(*min..=*max)),
            AttributeKind::Float {
                min,
                max,
                precision,
            } => {
                let raw = self.rng.gen_range(*min..=*max);
                json!(round_to(
                    raw,
                    precision.unwrap_or(DEFAULT_FLOAT_PRECISION)
                ))
            }
            AttributeKind::Bool => Value::Bool(self.rng.r#gen()),
            AttributeKind::Timestamp { tsformat } => {
                let now = Utc::now();
                Value::String(match tsformat.as_deref() {
                    Some("unix") => now.timestamp_millis().to_string(),
                    _ => now.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
            }
            AttributeKind::Location { center, radius } => {
                // Uniform-area disk sampling; naive lat/lon jitter would
                // cluster points near the center and distort with latitude.
                let r_km = radius * self.rng.r#gen::<f64>().sqrt();
                let theta = self.rng.r#gen::<f64>() * TAU;
                let lat = center[0] + (r_km * theta.cos()) / KM_PER_DEG_LAT;
                let lon = center[1]
                    + (r_km * theta.sin()) / (KM_PER_DEG_LON * center[0].to_radians().cos());
                json!({ "latitude": round_to(lat, 6), "longitude": round_to(lon, 6) })
            }
            AttributeKind::PickOne { arr } => arr
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or(Value::Null),
            AttributeKind::Sinusoidal { min, max } => {
                let mid = median(*min, *max);
                let amplitude = median(0.0, max - min);
                let step = step as f64;
                let noise: f64 = self.rng.r#gen();
                json!(round_to(
                    mid + amplitude * (TAU * step / 100.0 * 5.0).sin() * noise,
                    2
                ))
            }
            AttributeKind::Decay { min, max } => {
                let step = step as f64;
                json!(round_to(max - (max - min) * (1.0 - (-0.05 * step).exp()), 2))
            }
            AttributeKind::Object { payload } => {
                let prefix = format!("{key}.");
                Value::Object(self.generate_at(&prefix, payload))
            }
        }
    }
}

impl Default for AttributeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn median(a: f64, b: f64) -> f64 {
    (a + b) / 2.0
}

fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(precision as i32);
    (value * factor).round() / factor
}

fn is_empty_default(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn coerce_default(default: &Value, kind: &AttributeKind) -> Value {
    if matches!(kind, AttributeKind::Bool) {
        if let Value::String(s) = default {
            return Value::Bool(s.eq_ignore_ascii_case("true"));
        }
    }
    default.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, kind: AttributeKind) -> AttributeSpec {
        AttributeSpec {
            name: name.to_string(),
            is_static: false,
            default: None,
            kind,
        }
    }

    #[test]
    fn test_static_attribute_is_stable() {
        let mut generator = AttributeGenerator::seeded(7);
        let mut id_spec = spec(
            "sensor_id",
            AttributeKind::Id {
                length: None,
                charset: None,
            },
        );
        id_spec.is_static = true;
        let specs = vec![id_spec];

        let first = generator.generate(&specs);
        let second = generator.generate(&specs);
        assert_eq!(first["sensor_id"], second["sensor_id"]);
        assert_eq!(first["sensor_id"].as_str().unwrap().len(), 21);
    }

    #[test]
    fn test_int_respects_bounds() {
        let mut generator = AttributeGenerator::seeded(7);
        let specs = vec![spec("reading", AttributeKind::Int { min: -4, max: 9 })];

        for _ in 0..200 {
            let payload = generator.generate(&specs);
            let v = payload["reading"].as_i64().unwrap();
            assert!((-4..=9).contains(&v));
        }
    }

    #[test]
    fn test_degenerate_int_range_is_constant() {
        let mut generator = AttributeGenerator::seeded(1);
        let specs = vec![spec("fixed", AttributeKind::Int { min: 10, max: 10 })];

        for _ in 0..10 {
            assert_eq!(generator.generate(&specs)["fixed"], json!(10));
        }
    }

    #[test]
    fn test_float_respects_bounds_and_precision() {
        let mut generator = AttributeGenerator::seeded(3);
        let specs = vec![spec(
            "temp",
            AttributeKind::Float {
                min: 18.0,
                max: 27.5,
                precision: Some(1),
            },
        )];

        for _ in 0..100 {
            let v = generator.generate(&specs)["temp"].as_f64().unwrap();
            assert!((18.0..=27.5).contains(&v));
            assert_eq!(v, round_to(v, 1));
        }
    }

    #[test]
    fn test_pick_one_membership() {
        let mut generator = AttributeGenerator::seeded(11);
        let specs = vec![spec(
            "mode",
            AttributeKind::PickOne {
                arr: vec![json!("a"), json!("b")],
            },
        )];

        for _ in 0..50 {
            let v = generator.generate(&specs)["mode"].clone();
            assert!(v == json!("a") || v == json!("b"));
        }
    }

    #[test]
    fn test_default_bypasses_randomness() {
        let mut generator = AttributeGenerator::seeded(5);
        let mut s = spec("plant", AttributeKind::Int { min: 0, max: 100 });
        s.default = Some(json!("plant-042"));

        assert_eq!(generator.generate(&[s])["plant"], json!("plant-042"));
    }

    #[test]
    fn test_bool_default_coercion() {
        let mut generator = AttributeGenerator::seeded(5);
        let mut s = spec("enabled", AttributeKind::Bool);
        s.default = Some(json!("true"));

        assert_eq!(generator.generate(&[s])["enabled"], Value::Bool(true));
    }

    #[test]
    fn test_empty_default_is_ignored() {
        let mut generator = AttributeGenerator::seeded(5);
        let mut s = spec("fixed", AttributeKind::Int { min: 3, max: 3 });
        s.default = Some(json!(""));

        assert_eq!(generator.generate(&[s])["fixed"], json!(3));
    }

    #[test]
    fn test_decay_approaches_min() {
        let mut generator = AttributeGenerator::seeded(5);
        let specs = vec![spec(
            "battery",
            AttributeKind::Decay {
                min: 20.0,
                max: 100.0,
            },
        )];

        let first = generator.generate(&specs)["battery"].as_f64().unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = generator.generate(&specs)["battery"].as_f64().unwrap();
        }
        assert!(first > last);
        assert!(last >= 20.0);
        assert!((last - 20.0).abs() < 1.0);
    }

    #[test]
    fn test_sinusoidal_stays_near_bounds() {
        let mut generator = AttributeGenerator::seeded(9);
        let specs = vec![spec(
            "pressure",
            AttributeKind::Sinusoidal {
                min: 40.0,
                max: 60.0,
            },
        )];

        for _ in 0..300 {
            let v = generator.generate(&specs)["pressure"].as_f64().unwrap();
            assert!((39.0..=61.0).contains(&v), "out of band: {v}");
        }
    }

    #[test]
    fn test_location_within_radius() {
        let mut generator = AttributeGenerator::seeded(13);
        let center = [47.6062, -122.3321];
        let specs = vec![spec(
            "position",
            AttributeKind::Location {
                center,
                radius: 5.0,
            },
        )];

        for _ in 0..100 {
            let payload = generator.generate(&specs);
            let lat = payload["position"]["latitude"].as_f64().unwrap();
            let lon = payload["position"]["longitude"].as_f64().unwrap();
            let dy = (lat - center[0]) * KM_PER_DEG_LAT;
            let dx = (lon - center[1]) * KM_PER_DEG_LON * center[0].to_radians().cos();
            assert!((dx * dx + dy * dy).sqrt() <= 5.01);
        }
    }

    #[test]
    fn test_object_recurses() {
        let mut generator = AttributeGenerator::seeded(17);
        let nested = vec![spec("hum", AttributeKind::Int { min: 1, max: 1 })];
        let specs = vec![spec("env", AttributeKind::Object { payload: nested })];

        let payload = generator.generate(&specs);
        assert_eq!(payload["env"]["hum"], json!(1));
    }

    #[test]
    fn test_seeded_generators_agree() {
        let specs = vec![
            spec("a", AttributeKind::Int { min: 0, max: 1000 }),
            spec("b", AttributeKind::String { min: 4, max: 12 }),
        ];
        let mut left = AttributeGenerator::seeded(99);
        let mut right = AttributeGenerator::seeded(99);

        for _ in 0..20 {
            assert_eq!(left.generate(&specs), right.generate(&specs));
        }
    }

    #[test]
    fn test_spec_deserializes_from_json() {
        let raw = r#"{
            "name": "mode",
            "static": true,
            "type": "pickOne",
            "arr": ["eco", "boost"]
        }"#;
        let parsed: AttributeSpec = serde_json::from_str(raw).unwrap();
        assert!(parsed.is_static);
        assert!(matches!(parsed.kind, AttributeKind::PickOne { .. }));
    }
}
