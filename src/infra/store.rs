//! Persisted device records, counters and usage metrics.
//!
//! The device record is the single source of truth the engine polls to
//! observe externally requested stops: an orchestrator flips the stage to
//! `stopping` and the running device notices on its next stage poll.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Name of the shared live-device counter.
pub const ACTIVE_DEVICES_COUNTER: &str = "active_devices";

/// Lifecycle stage of a persisted device record.
///
/// Normal runs move `provisioning → hydrated → sleeping`; an external stop
/// request inserts `stopping` before `sleeping`. The stage never moves
/// backwards within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStage {
    Provisioning,
    Hydrated,
    Sleeping,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: String,
    pub user_id: String,
    pub stage: DeviceStage,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub runs: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DeviceRecord {
    pub fn provisioned(id: &str, user_id: &str) -> Self {
        Self {
            id: id.to_string(),
            user_id: user_id.to_string(),
            stage: DeviceStage::Provisioning,
            started_at: None,
            ended_at: None,
            runs: 0,
            metadata: serde_json::Value::Null,
        }
    }
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>>;
    async fn put(&self, record: &DeviceRecord) -> Result<()>;
    /// Atomically adds `delta` to a named counter and returns the new value.
    async fn add_to_counter(&self, name: &str, delta: i64) -> Result<i64>;
    /// Accumulates run duration under a usage category.
    async fn record_usage(&self, category: &str, duration_secs: i64) -> Result<()>;
}

/// DynamoDB-backed store. Records are kept as a JSON document in a single
/// attribute; counters and usage rows use atomic `ADD` updates.
pub struct DynamoDeviceStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoDeviceStore {
    pub fn new(config: &aws_config::SdkConfig, table: &str) -> Self {
        Self {
            client: aws_sdk_dynamodb::Client::new(config),
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl DeviceStore for DynamoDeviceStore {
    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>> {
        use aws_sdk_dynamodb::types::AttributeValue;

        let resp = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(id.to_string()))
            .send()
            .await
            .with_context(|| format!("GetItem failed for device '{id}'"))?;

        let Some(item) = resp.item else {
            return Ok(None);
        };
        let doc = item
            .get("doc")
            .and_then(|v| v.as_s().ok())
            .ok_or_else(|| anyhow!("device '{id}' record has no document attribute"))?;
        Ok(Some(serde_json::from_str(doc).with_context(|| {
            format!("device '{id}' record document is invalid")
        })?))
    }

    async fn put(&self, record: &DeviceRecord) -> Result<()> {
        use aws_sdk_dynamodb::types::AttributeValue;

        let doc = serde_json::to_string(record)?;
        self.client
            .put_item()
            .table_name(&self.table)
            .item("id", AttributeValue::S(record.id.clone()))
            .item("doc", AttributeValue::S(doc))
            .send()
            .await
            .with_context(|| format!("PutItem failed for device '{}'", record.id))?;
        Ok(())
    }

    async fn add_to_counter(&self, name: &str, delta: i64) -> Result<i64> {
        use aws_sdk_dynamodb::types::AttributeValue;

        let resp = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(format!("counter#{name}")))
            .update_expression("ADD #v :d")
            .expression_attribute_names("#v", "value")
            .expression_attribute_values(":d", AttributeValue::N(delta.to_string()))
            .return_values(aws_sdk_dynamodb::types::ReturnValue::UpdatedNew)
            .send()
            .await
            .with_context(|| format!("counter update failed for '{name}'"))?;

        resp.attributes
            .as_ref()
            .and_then(|a| a.get("value"))
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| anyhow!("counter '{name}' update returned no value"))
    }

    async fn record_usage(&self, category: &str, duration_secs: i64) -> Result<()> {
        use aws_sdk_dynamodb::types::AttributeValue;

        self.client
            .update_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(format!("usage#{category}")))
            .update_expression("ADD #r :one, #d :secs")
            .expression_attribute_names("#r", "runs")
            .expression_attribute_names("#d", "duration_secs")
            .expression_attribute_values(":one", AttributeValue::N("1".to_string()))
            .expression_attribute_values(":secs", AttributeValue::N(duration_secs.to_string()))
            .send()
            .await
            .with_context(|| format!("usage update failed for '{category}'"))?;
        Ok(())
    }
}

/// In-memory store for local runs and tests.
#[derive(Default)]
pub struct MemoryDeviceStore {
    records: Mutex<HashMap<String, DeviceRecord>>,
    counters: Mutex<HashMap<String, i64>>,
    usage: Mutex<HashMap<String, i64>>,
}

impl MemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> i64 {
        *self
            .counters
            .lock()
            .expect("store poisoned")
            .get(name)
            .unwrap_or(&0)
    }

    pub fn usage_secs(&self, category: &str) -> i64 {
        *self
            .usage
            .lock()
            .expect("store poisoned")
            .get(category)
            .unwrap_or(&0)
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn get(&self, id: &str) -> Result<Option<DeviceRecord>> {
        Ok(self
            .records
            .lock()
            .expect("store poisoned")
            .get(id)
            .cloned())
    }

    async fn put(&self, record: &DeviceRecord) -> Result<()> {
        self.records
            .lock()
            .expect("store poisoned")
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn add_to_counter(&self, name: &str, delta: i64) -> Result<i64> {
        let mut counters = self.counters.lock().expect("store poisoned");
        let value = counters.entry(name.to_string()).or_insert(0);
        *value += delta;
        Ok(*value)
    }

    async fn record_usage(&self, category: &str, duration_secs: i64) -> Result<()> {
        let mut usage = self.usage.lock().expect("store poisoned");
        *usage.entry(category.to_string()).or_insert(0) += duration_secs;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryDeviceStore::new();
        assert!(store.get("d-1").await.unwrap().is_none());

        let mut record = DeviceRecord::provisioned("d-1", "user-a");
        store.put(&record).await.unwrap();
        record.stage = DeviceStage::Hydrated;
        store.put(&record).await.unwrap();

        let loaded = store.get("d-1").await.unwrap().unwrap();
        assert_eq!(loaded.stage, DeviceStage::Hydrated);
        assert_eq!(loaded.user_id, "user-a");
    }

    #[tokio::test]
    async fn test_counter_is_cumulative() {
        let store = MemoryDeviceStore::new();
        assert_eq!(store.add_to_counter("live", 1).await.unwrap(), 1);
        assert_eq!(store.add_to_counter("live", 1).await.unwrap(), 2);
        assert_eq!(store.add_to_counter("live", -2).await.unwrap(), 0);
    }

    #[test]
    fn test_stage_serializes_snake_case() {
        let json = serde_json::to_string(&DeviceStage::Provisioning).unwrap();
        assert_eq!(json, r#""provisioning""#);
    }
}
