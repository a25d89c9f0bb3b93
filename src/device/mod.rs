//! Device lifecycle runtime.
//!
//! A [`DeviceRuntime`] binds a persisted device record to a payload source
//! and owns every timer the device runs: the physics loop, the publish loop
//! and the slow stage poll that observes externally requested stops. All
//! three live inside a single supervisor task per device, so stopping a
//! device deterministically halts all of its timers with no leaked work.

pub mod sensor;
pub mod vehicle;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::infra::store::{DeviceRecord, DeviceStage, DeviceStore};
use crate::infra::{BlobStore, TelemetryPublisher};

/// Collaborators shared by every device in a run.
#[derive(Clone)]
pub struct DeviceContext {
    pub store: Arc<dyn DeviceStore>,
    pub publisher: Arc<dyn TelemetryPublisher>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Arc<SimulationConfig>,
}

/// Identity of one run; the trip id is regenerated on every start.
#[derive(Debug, Clone)]
pub struct TripInfo {
    pub trip_id: String,
    pub device_id: String,
}

/// Result of one publish tick.
pub enum TickOutcome {
    Continue,
    /// The source has nothing more to emit (e.g. the route ended); the
    /// runtime stops the device.
    Finished,
}

/// What a device emits. Vehicles plug in the dynamics model, generic
/// devices the attribute generator.
#[async_trait]
pub trait PayloadSource: Send + Sync + 'static {
    /// Usage-metric category for this source.
    fn kind(&self) -> &'static str;

    /// Cadence of the physics loop; `None` disables it.
    fn physics_interval(&self) -> Option<Duration> {
        None
    }

    /// Publish cadence override; `None` uses the run config.
    fn publish_interval(&self) -> Option<Duration> {
        None
    }

    async fn on_start(&self, _trip: &TripInfo) {}

    async fn physics_tick(&self) {}

    async fn publish_tick(&self, ctx: &DeviceContext, trip: &TripInfo) -> Result<TickOutcome>;

    async fn on_stop(&self) {}
}

pub struct DeviceRuntime {
    id: String,
    ctx: DeviceContext,
    source: Arc<dyn PayloadSource>,
    record: Arc<tokio::sync::Mutex<DeviceRecord>>,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceRuntime {
    pub fn new(record: DeviceRecord, source: Arc<dyn PayloadSource>, ctx: DeviceContext) -> Self {
        Self {
            id: record.id.clone(),
            ctx,
            source,
            record: Arc::new(tokio::sync::Mutex::new(record)),
            shutdown: None,
            task: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn stage(&self) -> DeviceStage {
        self.record.lock().await.stage
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Hydrates the device: persists the `hydrated` stage, generates a fresh
    /// trip id and spawns the supervisor task.
    ///
    /// # Errors
    ///
    /// Fails when the hydrated record cannot be persisted; the device does
    /// not start in that case.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.task.take();

        let trip = TripInfo {
            trip_id: Uuid::new_v4().to_string(),
            device_id: self.id.clone(),
        };
        {
            let mut record = self.record.lock().await;
            record.stage = DeviceStage::Hydrated;
            record.started_at = Some(Utc::now());
            record.ended_at = None;
            record.runs += 1;
            self.ctx
                .store
                .put(&record)
                .await
                .context("persisting hydrated device record")?;
        }
        self.source.on_start(&trip).await;
        info!(trip_id = %trip.trip_id, "device hydrated");

        let (tx, rx) = watch::channel(false);
        self.shutdown = Some(tx);
        let span = info_span!("device", id = %self.id);
        self.task = Some(tokio::spawn(
            run_device(
                self.ctx.clone(),
                self.source.clone(),
                self.record.clone(),
                trip,
                rx,
            )
            .instrument(span),
        ));
        Ok(())
    }

    /// Stops the device and waits for its supervisor to tear down. Calling
    /// this on a device that never started is a no-op.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }
        if let Err(e) = task.await {
            error!(error = %e, "device supervisor join failed");
        }
    }
}

/// Per-device supervisor: one task, three timer roles.
async fn run_device(
    ctx: DeviceContext,
    source: Arc<dyn PayloadSource>,
    record: Arc<tokio::sync::Mutex<DeviceRecord>>,
    trip: TripInfo,
    mut shutdown: watch::Receiver<bool>,
) {
    let has_physics = source.physics_interval().is_some();
    let mut physics = tokio::time::interval(
        source
            .physics_interval()
            .unwrap_or(Duration::from_millis(ctx.config.physics_interval_ms)),
    );
    let mut publish = tokio::time::interval(
        source
            .publish_interval()
            .unwrap_or(Duration::from_millis(ctx.config.publish_interval_ms)),
    );
    let mut poll = tokio::time::interval(Duration::from_millis(ctx.config.stage_poll_interval_ms));
    physics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    publish.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = physics.tick(), if has_physics => {
                source.physics_tick().await;
            }
            _ = publish.tick() => {
                match source.publish_tick(&ctx, &trip).await {
                    Ok(TickOutcome::Continue) => {}
                    Ok(TickOutcome::Finished) => {
                        info!(trip_id = %trip.trip_id, "payload source finished");
                        break;
                    }
                    Err(e) => error!(error = %e, "publish tick failed"),
                }
            }
            _ = poll.tick() => {
                match ctx.store.get(&trip.device_id).await {
                    Ok(Some(persisted)) if persisted.stage == DeviceStage::Stopping => {
                        info!("externally requested stop observed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "stage poll failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    teardown(&ctx, source.as_ref(), &record).await;
}

async fn teardown(
    ctx: &DeviceContext,
    source: &dyn PayloadSource,
    record: &tokio::sync::Mutex<DeviceRecord>,
) {
    source.on_stop().await;

    let duration_secs;
    {
        let mut record = record.lock().await;
        let ended = Utc::now();
        record.stage = DeviceStage::Sleeping;
        record.ended_at = Some(ended);
        duration_secs = record
            .started_at
            .map(|s| (ended - s).num_seconds())
            .unwrap_or(0);
        if let Err(e) = ctx.store.put(&record).await {
            error!(error = %e, "persisting sleeping stage failed");
        }
    }
    info!(duration_secs, "device sleeping");

    // Usage accounting must not delay teardown.
    let store = ctx.store.clone();
    let category = source.kind();
    tokio::spawn(async move {
        if let Err(e) = store.record_usage(category, duration_secs).await {
            warn!(error = %e, "usage metric update failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::AttributeSpec;
    use crate::infra::blobs::DirBlobStore;
    use crate::infra::publish::MemoryPublisher;
    use crate::infra::store::MemoryDeviceStore;
    use crate::services::device_types::DeviceType;
    use super::sensor::SensorSource;

    fn fast_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.publish_interval_ms = 10;
        config.stage_poll_interval_ms = 25;
        config
    }

    fn test_context(
        store: Arc<MemoryDeviceStore>,
        publisher: Arc<MemoryPublisher>,
        dir: &std::path::Path,
    ) -> DeviceContext {
        DeviceContext {
            store,
            publisher,
            blobs: Arc::new(DirBlobStore::new(dir)),
            config: Arc::new(fast_config()),
        }
    }

    fn sensor_type() -> DeviceType {
        DeviceType {
            name: "env".to_string(),
            user_id: "tester".to_string(),
            shared: false,
            topic: "sensors/env".to_string(),
            interval_ms: 0,
            payload: vec![AttributeSpec {
                name: "temp".to_string(),
                is_static: false,
                default: None,
                kind: crate::generator::AttributeKind::Int { min: 1, max: 5 },
            }],
            vehicle: false,
        }
    }

    #[tokio::test]
    async fn test_stop_before_start_is_noop() {
        let store = Arc::new(MemoryDeviceStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(store.clone(), publisher, dir.path());

        let record = DeviceRecord::provisioned("dev-0", "tester");
        let source = Arc::new(SensorSource::new(sensor_type(), Some(1)));
        let mut runtime = DeviceRuntime::new(record, source, ctx);

        runtime.stop().await;
        assert_eq!(runtime.stage().await, DeviceStage::Provisioning);
        assert!(store.get("dev-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_stop_walks_lifecycle() {
        let store = Arc::new(MemoryDeviceStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(store.clone(), publisher.clone(), dir.path());

        let record = DeviceRecord::provisioned("dev-1", "tester");
        let source = Arc::new(SensorSource::new(sensor_type(), Some(1)));
        let mut runtime = DeviceRuntime::new(record, source, ctx);

        runtime.start().await.unwrap();
        assert_eq!(runtime.stage().await, DeviceStage::Hydrated);
        assert_eq!(
            store.get("dev-1").await.unwrap().unwrap().stage,
            DeviceStage::Hydrated
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        runtime.stop().await;

        let persisted = store.get("dev-1").await.unwrap().unwrap();
        assert_eq!(persisted.stage, DeviceStage::Sleeping);
        assert!(persisted.ended_at.unwrap() >= persisted.started_at.unwrap());
        assert_eq!(persisted.runs, 1);
        assert!(!publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_external_stop_request_is_observed() {
        let store = Arc::new(MemoryDeviceStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(store.clone(), publisher, dir.path());

        let record = DeviceRecord::provisioned("dev-2", "tester");
        let source = Arc::new(SensorSource::new(sensor_type(), Some(1)));
        let mut runtime = DeviceRuntime::new(record, source, ctx);
        runtime.start().await.unwrap();

        // Flip the persisted record to `stopping`, as the orchestrator would.
        let mut persisted = store.get("dev-2").await.unwrap().unwrap();
        persisted.stage = DeviceStage::Stopping;
        store.put(&persisted).await.unwrap();

        let mut observed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if store.get("dev-2").await.unwrap().unwrap().stage == DeviceStage::Sleeping {
                observed = true;
                break;
            }
        }
        assert!(observed, "device never observed the stop request");
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let store = Arc::new(MemoryDeviceStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(store.clone(), publisher, dir.path());

        let record = DeviceRecord::provisioned("dev-3", "tester");
        let source = Arc::new(SensorSource::new(sensor_type(), Some(1)));
        let mut runtime = DeviceRuntime::new(record, source, ctx);

        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        assert_eq!(store.get("dev-3").await.unwrap().unwrap().runs, 1);
        runtime.stop().await;
    }
}
