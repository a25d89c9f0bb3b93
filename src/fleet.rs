//! Fleet-level tracking of live device instances.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use crate::device::DeviceRuntime;
use crate::infra::store::{ACTIVE_DEVICES_COUNTER, DeviceStage, DeviceStore};

/// Holds the live devices of one simulation run and garbage-collects the
/// finished ones.
pub struct FleetController {
    store: Arc<dyn DeviceStore>,
    devices: HashMap<String, DeviceRuntime>,
}

impl FleetController {
    pub fn new(store: Arc<dyn DeviceStore>) -> Self {
        Self {
            store,
            devices: HashMap::new(),
        }
    }

    /// Starts a device and tracks it. A start failure is a hydration error:
    /// the device is not added and the error surfaces to the caller.
    pub async fn add(&mut self, mut device: DeviceRuntime) -> Result<()> {
        device.start().await?;
        if let Err(e) = self.store.add_to_counter(ACTIVE_DEVICES_COUNTER, 1).await {
            error!(error = %e, "live-device counter increment failed");
        }
        self.devices.insert(device.id().to_string(), device);
        Ok(())
    }

    pub fn live_count(&self) -> usize {
        self.devices.len()
    }

    /// Removes every device whose lifecycle stage reached `sleeping`,
    /// decrementing the shared counter per removal. Sweeping an already
    /// removed device is a no-op, so repeated sweeps are safe.
    pub async fn gc(&mut self) -> usize {
        let mut finished = Vec::new();
        for (id, device) in &self.devices {
            if device.stage().await == DeviceStage::Sleeping {
                finished.push(id.clone());
            }
        }

        for id in &finished {
            if let Some(mut device) = self.devices.remove(id) {
                device.stop().await;
                if let Err(e) = self.store.add_to_counter(ACTIVE_DEVICES_COUNTER, -1).await {
                    error!(error = %e, "live-device counter decrement failed");
                }
                info!(id = %id, "garbage-collected finished device");
            }
        }
        finished.len()
    }

    /// Stops every tracked device; removal still happens through [`Self::gc`].
    pub async fn stop_all(&mut self) {
        for device in self.devices.values_mut() {
            device.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::device::{DeviceContext, PayloadSource, TickOutcome, TripInfo};
    use crate::infra::blobs::DirBlobStore;
    use crate::infra::publish::MemoryPublisher;
    use crate::infra::store::{DeviceRecord, MemoryDeviceStore};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Finishes on its first publish tick.
    struct OneShotSource;

    #[async_trait]
    impl PayloadSource for OneShotSource {
        fn kind(&self) -> &'static str {
            "device"
        }

        async fn publish_tick(
            &self,
            _ctx: &DeviceContext,
            _trip: &TripInfo,
        ) -> anyhow::Result<TickOutcome> {
            Ok(TickOutcome::Finished)
        }
    }

    fn test_context(store: Arc<MemoryDeviceStore>, dir: &std::path::Path) -> DeviceContext {
        let mut config = SimulationConfig::default();
        config.publish_interval_ms = 10;
        config.stage_poll_interval_ms = 50;
        DeviceContext {
            store,
            publisher: Arc::new(MemoryPublisher::new()),
            blobs: Arc::new(DirBlobStore::new(dir)),
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_gc_removes_finished_devices_idempotently() {
        let store = Arc::new(MemoryDeviceStore::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(store.clone(), dir.path());

        let mut fleet = FleetController::new(store.clone());
        for i in 0..3 {
            let record = DeviceRecord::provisioned(&format!("dev-{i}"), "tester");
            let device = DeviceRuntime::new(record, Arc::new(OneShotSource), ctx.clone());
            fleet.add(device).await.unwrap();
        }
        assert_eq!(fleet.live_count(), 3);
        assert_eq!(store.counter(ACTIVE_DEVICES_COUNTER), 3);

        // All sources finish on their first publish tick.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let removed = fleet.gc().await;
        assert_eq!(removed, 3);
        assert_eq!(fleet.live_count(), 0);
        assert_eq!(store.counter(ACTIVE_DEVICES_COUNTER), 0);

        // A second sweep finds nothing and changes nothing.
        assert_eq!(fleet.gc().await, 0);
        assert_eq!(store.counter(ACTIVE_DEVICES_COUNTER), 0);
    }

    #[tokio::test]
    async fn test_stop_all_leaves_removal_to_gc() {
        let store = Arc::new(MemoryDeviceStore::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(store.clone(), dir.path());

        let mut fleet = FleetController::new(store.clone());
        let record = DeviceRecord::provisioned("dev-a", "tester");
        fleet
            .add(DeviceRuntime::new(record, Arc::new(OneShotSource), ctx))
            .await
            .unwrap();

        fleet.stop_all().await;
        assert_eq!(fleet.live_count(), 1);
        assert_eq!(fleet.gc().await, 1);
        assert_eq!(fleet.live_count(), 0);
    }
}
