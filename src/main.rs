//! CLI entry point for the fleetsim device simulator.
//!
//! Provides subcommands for running a local fleet of simulated devices and
//! for one-shot payload generation from an attribute-spec file.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use fleetsim::config::SimulationConfig;
use fleetsim::device::sensor::SensorSource;
use fleetsim::device::vehicle::VehicleSource;
use fleetsim::device::{DeviceContext, DeviceRuntime, PayloadSource};
use fleetsim::dynamics::route::{Route, parse_route};
use fleetsim::fleet::FleetController;
use fleetsim::generator::{AttributeGenerator, AttributeSpec};
use fleetsim::infra::blobs::DirBlobStore;
use fleetsim::infra::publish::IotPublisher;
use fleetsim::infra::store::MemoryDeviceStore;
use fleetsim::infra::{BlobStore, DeviceRecord, TelemetryPublisher};
use fleetsim::output::CapturePublisher;
use fleetsim::services::device_types::{DeviceType, MemoryDeviceTypes, resolve};

#[derive(Parser)]
#[command(name = "fleetsim")]
#[command(about = "Simulate fleets of virtual IoT devices", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a local fleet built from a device type definition
    Run {
        /// Path to the device type JSON file
        #[arg(value_name = "DEVICE_TYPE")]
        device_type: String,

        /// Number of device instances to launch
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Directory containing route JSON files (vehicle types only)
        #[arg(short, long, default_value = "routes")]
        routes: String,

        /// Optional simulation config JSON file
        #[arg(long)]
        config: Option<String>,

        /// CSV file capturing every published message
        #[arg(short, long, default_value = "telemetry.csv")]
        output: String,

        /// Publish to AWS IoT instead of the local capture file
        #[arg(long, default_value_t = false)]
        iot: bool,

        /// Stop the run after this many seconds (0 = run until all trips end)
        #[arg(short, long, default_value_t = 0)]
        duration: u64,

        /// Fixed seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        /// User the device type is resolved for
        #[arg(short, long, default_value = "local")]
        user: String,
    },
    /// Generate payloads from an attribute-spec file and print them
    Generate {
        /// Path to a JSON file holding a list of attribute specs
        #[arg(value_name = "SPEC_FILE")]
        spec: String,

        /// Number of payloads to emit
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Fixed seed for reproducible output
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/fleetsim.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("fleetsim.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            device_type,
            count,
            routes,
            config,
            output,
            iot,
            duration,
            seed,
            user,
        } => {
            run_fleet(
                &device_type,
                count,
                &routes,
                config.as_deref(),
                &output,
                iot,
                duration,
                seed,
                &user,
            )
            .await?;
        }
        Commands::Generate { spec, count, seed } => {
            generate_payloads(&spec, count, seed)?;
        }
    }

    Ok(())
}

/// Spins up `count` devices of one type and drives the fleet until every
/// trip finishes, the duration elapses, or the run is interrupted.
#[tracing::instrument(skip(config_path, output, seed), fields(device_type_path, count, user))]
async fn run_fleet(
    device_type_path: &str,
    count: usize,
    routes_dir: &str,
    config_path: Option<&str>,
    output: &str,
    iot: bool,
    duration: u64,
    seed: Option<u64>,
    user: &str,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => SimulationConfig::load(path)?,
        None => SimulationConfig::default(),
    };
    if seed.is_some() {
        config.seed = seed;
    }
    let base_seed = config.seed.unwrap_or_else(rand::random);
    info!(base_seed, "simulation seed selected");

    let device_type = load_device_type(device_type_path, user)?;
    let catalog = MemoryDeviceTypes::new(vec![device_type.clone()]);
    let device_type = resolve(&catalog, user, &device_type.name).await?;

    let publisher: Arc<dyn TelemetryPublisher> = if iot {
        let aws = aws_config::load_from_env().await;
        info!("publishing to AWS IoT");
        Arc::new(IotPublisher::new(&aws))
    } else {
        info!(output, "capturing published messages locally");
        Arc::new(CapturePublisher::new(output))
    };

    let store = Arc::new(MemoryDeviceStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(DirBlobStore::new(routes_dir));
    let ctx = DeviceContext {
        store: store.clone(),
        publisher,
        blobs: blobs.clone(),
        config: Arc::new(config.clone()),
    };

    // Routes are loaded once per key and shared across the fleet; a loading
    // failure here is fatal for the whole run.
    let mut routes: Vec<Arc<Route>> = Vec::new();
    if device_type.vehicle {
        for key in route_keys(routes_dir)? {
            let bytes = blobs
                .get(&key)
                .await
                .with_context(|| format!("unable to load route '{key}'"))?;
            let route =
                parse_route(&bytes).with_context(|| format!("unable to parse route '{key}'"))?;
            info!(key = %key, total_km = route.total_km(), "route loaded");
            routes.push(Arc::new(route));
        }
        if routes.is_empty() {
            bail!("no route files found in '{routes_dir}'");
        }
    }

    let mut fleet = FleetController::new(store.clone());
    for index in 0..count {
        let id = format!("{}-{:03}", device_type.name, index);
        let record = DeviceRecord::provisioned(&id, user);
        let device_seed = base_seed.wrapping_add(index as u64);

        let source: Arc<dyn PayloadSource> = if device_type.vehicle {
            let route = routes[index % routes.len()].clone();
            Arc::new(VehicleSource::new(route, &config, None, device_seed))
        } else {
            Arc::new(SensorSource::new(device_type.clone(), Some(device_seed)))
        };

        fleet.add(DeviceRuntime::new(record, source, ctx.clone())).await?;
    }
    info!(live = fleet.live_count(), "fleet started");

    let started = std::time::Instant::now();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(config.gc_interval_ms)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, stopping fleet");
                fleet.stop_all().await;
            }
        }

        let removed = fleet.gc().await;
        if removed > 0 {
            info!(removed, live = fleet.live_count(), "fleet sweep");
        }
        if fleet.live_count() == 0 {
            break;
        }
        if duration > 0 && started.elapsed() >= Duration::from_secs(duration) {
            info!(duration, "run duration reached, stopping fleet");
            fleet.stop_all().await;
            fleet.gc().await;
            break;
        }
    }

    info!(
        usage_device_secs = store.usage_secs("device"),
        usage_vehicle_secs = store.usage_secs("vehicle"),
        "fleet run finished"
    );
    Ok(())
}

fn load_device_type(path: &str, user: &str) -> Result<DeviceType> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read device type file '{path}'"))?;
    let mut device_type: DeviceType = serde_json::from_str(&content)
        .with_context(|| format!("invalid device type file '{path}'"))?;
    if device_type.user_id.is_empty() {
        device_type.user_id = user.to_string();
    }
    Ok(device_type)
}

fn route_keys(routes_dir: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    for entry in std::fs::read_dir(routes_dir)
        .with_context(|| format!("unable to read routes directory '{routes_dir}'"))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                keys.push(name.to_string());
            }
        }
    }
    keys.sort();
    Ok(keys)
}

fn generate_payloads(spec_path: &str, count: usize, seed: Option<u64>) -> Result<()> {
    let content = std::fs::read_to_string(spec_path)
        .with_context(|| format!("unable to read spec file '{spec_path}'"))?;
    let specs: Vec<AttributeSpec> = serde_json::from_str(&content)
        .with_context(|| format!("invalid spec file '{spec_path}'"))?;

    let mut generator = match seed {
        Some(seed) => AttributeGenerator::seeded(seed),
        None => AttributeGenerator::new(),
    };
    for _ in 0..count {
        let payload = generator.generate(&specs);
        match serde_json::to_string_pretty(&payload) {
            Ok(rendered) => println!("{rendered}"),
            Err(e) => error!(error = %e, "payload serialization failed"),
        }
    }
    Ok(())
}
