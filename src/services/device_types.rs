//! Device-type catalog lookup.
//!
//! Device types are authored elsewhere; the engine only resolves them. A
//! lookup cascades through three scopes before failing: the requesting
//! user's own catalog, the default user's catalog, and finally any type
//! flagged as shared. An intermediate miss is not an error.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::generator::AttributeSpec;

/// Owner of the built-in device types.
pub const DEFAULT_USER: &str = "default";

/// Declarative description of one simulated device class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceType {
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub shared: bool,
    /// Topic generic devices publish their payloads to.
    pub topic: String,
    /// Publish cadence for this type; falls back to the run config when zero.
    #[serde(default)]
    pub interval_ms: u64,
    /// Attribute specs for generic payload generation; empty for vehicles.
    #[serde(default)]
    pub payload: Vec<AttributeSpec>,
    /// Vehicle types run the dynamics model instead of the generator.
    #[serde(default)]
    pub vehicle: bool,
}

#[async_trait]
pub trait DeviceTypeSource: Send + Sync {
    /// Looks up a type owned by a specific user.
    async fn find(&self, user_id: &str, name: &str) -> Result<Option<DeviceType>>;
    /// Looks up a type flagged as shared, regardless of owner.
    async fn find_shared(&self, name: &str) -> Result<Option<DeviceType>>;
}

/// Resolves a device type through the fallback cascade.
///
/// # Errors
///
/// Fails only when all three scopes miss; this is a configuration error and
/// the device must not be hydrated.
pub async fn resolve(
    source: &dyn DeviceTypeSource,
    user_id: &str,
    name: &str,
) -> Result<DeviceType> {
    if let Some(found) = source.find(user_id, name).await? {
        return Ok(found);
    }
    debug!(user_id, name, "device type not in user catalog, trying default user");
    if let Some(found) = source.find(DEFAULT_USER, name).await? {
        return Ok(found);
    }
    debug!(name, "device type not in default catalog, trying shared types");
    if let Some(found) = source.find_shared(name).await? {
        return Ok(found);
    }
    Err(anyhow!(
        "device type '{name}' not found for user '{user_id}', the default user, or shared"
    ))
}

/// In-memory catalog used by the CLI and tests.
#[derive(Default)]
pub struct MemoryDeviceTypes {
    types: Vec<DeviceType>,
}

impl MemoryDeviceTypes {
    pub fn new(types: Vec<DeviceType>) -> Self {
        Self { types }
    }
}

#[async_trait]
impl DeviceTypeSource for MemoryDeviceTypes {
    async fn find(&self, user_id: &str, name: &str) -> Result<Option<DeviceType>> {
        Ok(self
            .types
            .iter()
            .find(|t| t.user_id == user_id && t.name == name)
            .cloned())
    }

    async fn find_shared(&self, name: &str) -> Result<Option<DeviceType>> {
        Ok(self
            .types
            .iter()
            .find(|t| t.shared && t.name == name)
            .cloned())
    }
}
