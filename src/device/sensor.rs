//! Generic sensor devices: schema-driven payloads on a publish cadence.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::error;

use super::{DeviceContext, PayloadSource, TickOutcome, TripInfo};
use crate::generator::AttributeGenerator;
use crate::services::device_types::DeviceType;

/// Field added to every generated payload so downstream consumers can
/// correlate messages with the emitting device.
const CORRELATION_FIELD: &str = "_id_";

pub struct SensorSource {
    device_type: DeviceType,
    generator: Mutex<AttributeGenerator>,
}

impl SensorSource {
    pub fn new(device_type: DeviceType, seed: Option<u64>) -> Self {
        let generator = match seed {
            Some(seed) => AttributeGenerator::seeded(seed),
            None => AttributeGenerator::new(),
        };
        Self {
            device_type,
            generator: Mutex::new(generator),
        }
    }
}

#[async_trait]
impl PayloadSource for SensorSource {
    fn kind(&self) -> &'static str {
        "device"
    }

    fn publish_interval(&self) -> Option<Duration> {
        (self.device_type.interval_ms > 0)
            .then(|| Duration::from_millis(self.device_type.interval_ms))
    }

    async fn publish_tick(&self, ctx: &DeviceContext, trip: &TripInfo) -> Result<TickOutcome> {
        let mut payload = {
            let mut generator = self.generator.lock().expect("generator poisoned");
            generator.generate(&self.device_type.payload)
        };
        if let Value::Object(fields) = &mut payload {
            fields.insert(CORRELATION_FIELD.to_string(), json!(trip.device_id));
        }

        let body = serde_json::to_vec(&payload)?;
        if let Err(e) = ctx
            .publisher
            .publish(&self.device_type.topic, Bytes::from(body))
            .await
        {
            error!(error = %e, topic = %self.device_type.topic, "payload publish failed");
        }
        Ok(TickOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::generator::{AttributeKind, AttributeSpec};
    use crate::infra::blobs::DirBlobStore;
    use crate::infra::publish::MemoryPublisher;
    use crate::infra::store::MemoryDeviceStore;
    use std::sync::Arc;

    fn counter_type() -> DeviceType {
        DeviceType {
            name: "counter".to_string(),
            user_id: "tester".to_string(),
            shared: false,
            topic: "sensors/counter".to_string(),
            interval_ms: 1_000,
            payload: vec![AttributeSpec {
                name: "count".to_string(),
                is_static: false,
                default: None,
                kind: AttributeKind::Int { min: 2, max: 2 },
            }],
            vehicle: false,
        }
    }

    #[tokio::test]
    async fn test_payload_carries_correlation_id() {
        let publisher = Arc::new(MemoryPublisher::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = DeviceContext {
            store: Arc::new(MemoryDeviceStore::new()),
            publisher: publisher.clone(),
            blobs: Arc::new(DirBlobStore::new(dir.path())),
            config: Arc::new(SimulationConfig::default()),
        };
        let trip = TripInfo {
            trip_id: "t-1".to_string(),
            device_id: "counter-001".to_string(),
        };

        let source = SensorSource::new(counter_type(), Some(4));
        let outcome = source.publish_tick(&ctx, &trip).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Continue));

        let messages = publisher.take();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "sensors/counter");
        let payload: Value = serde_json::from_slice(&messages[0].1).unwrap();
        assert_eq!(payload["count"], json!(2));
        assert_eq!(payload[CORRELATION_FIELD], json!("counter-001"));
    }

    #[test]
    fn test_interval_override() {
        let source = SensorSource::new(counter_type(), Some(4));
        assert_eq!(source.publish_interval(), Some(Duration::from_secs(1)));

        let mut quiet = counter_type();
        quiet.interval_ms = 0;
        let source = SensorSource::new(quiet, Some(4));
        assert_eq!(source.publish_interval(), None);
    }
}
