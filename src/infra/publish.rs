//! Telemetry transport.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;

/// Fire-and-forget publish onto a named topic.
///
/// Failures are reported to the caller, which logs and moves on; the engine
/// never retries or blocks a tick on the transport.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
}

/// Publishes over the AWS IoT data plane.
pub struct IotPublisher {
    client: aws_sdk_iotdataplane::Client,
}

impl IotPublisher {
    /// Creates a publisher using the ambient AWS configuration (env vars,
    /// instance profile, etc.) already loaded by `aws_config::load_from_env`.
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: aws_sdk_iotdataplane::Client::new(config),
        }
    }
}

#[async_trait]
impl TelemetryPublisher for IotPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish()
            .topic(topic)
            .payload(aws_sdk_iotdataplane::primitives::Blob::new(payload.to_vec()))
            .send()
            .await
            .with_context(|| format!("IoT publish failed for topic '{topic}'"))?;
        Ok(())
    }
}

/// Collects published messages in memory; used by tests and as a sink when
/// no transport is configured.
#[derive(Default)]
pub struct MemoryPublisher {
    messages: Mutex<Vec<(String, Bytes)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Bytes)> {
        self.messages.lock().expect("publisher poisoned").clone()
    }

    pub fn take(&self) -> Vec<(String, Bytes)> {
        std::mem::take(&mut *self.messages.lock().expect("publisher poisoned"))
    }
}

#[async_trait]
impl TelemetryPublisher for MemoryPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.messages
            .lock()
            .expect("publisher poisoned")
            .push((topic.to_string(), payload));
        Ok(())
    }
}
