//! hwkey-link demo host.
//!
//! Drives the key service link against the in-process loopback service.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌────────────┐   ┌──────────────┐   ┌─────────────────────┐   ┌──────────────┐
//!   │  KeyClient │──▶│ Lifecycle    │──▶│ ServiceBinder       │──▶│ RemoteService│
//!   │  (keys)    │   │ Controller   │   │ (loopback binder)   │   │ (loopback)   │
//!   └────────────┘   └──────┬───────┘   └─────────────────────┘   └──────┬───────┘
//!                           │  ▲ connected / disconnected / binder died │
//!                           │  └─────────────────────────────────────────┘
//!                           ▼
//!                  backoff timers, health checks, listener events
//! ```
//!
//! Commands:
//! - `probe`: connect once and print a JSON status report
//! - `run`: keep the link up until interrupted, optionally crashing the
//!   service on a fixed period to exercise recovery

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use hwkey_link::config::watcher::ConfigWatcher;
use hwkey_link::config::{load_config, LinkConfig};
use hwkey_link::keys::{ResultCode, StaticPlatform};
use hwkey_link::lifecycle::signals::shutdown_on_signal;
use hwkey_link::lifecycle::{start_link, LinkStack, Shutdown};
use hwkey_link::link::{ConnectionEvent, ConnectionState, RetryCounters};
use hwkey_link::observability::{logging, metrics};
use hwkey_link::params::ProviderLookupError;
use hwkey_link::transport::loopback::{BindBehavior, LoopbackBinder};
use hwkey_link::transport::{ParamValue, PARAM_BIOMETRIC_TYPE, PARAM_SENSOR_POSITION};

#[derive(Parser)]
#[command(name = "hwkey-link")]
#[command(about = "Hardware key service link demo", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated bind latency of the loopback service.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect once and print the link status as JSON
    Probe,
    /// Keep the link alive until Ctrl-C
    Run {
        /// Crash the loopback service every N seconds (0 disables)
        #[arg(long, default_value_t = 0)]
        outage_every_secs: u64,
    },
}

#[derive(Serialize)]
struct ProbeReport {
    connected: bool,
    state: ConnectionState,
    counters: RetryCounters,
    handle: Option<String>,
    service_version: Option<i32>,
    has_master_key: Option<bool>,
    biometric_type: i32,
    sensor_position: Option<Vec<i32>>,
    errors: Vec<ResultCode>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LinkConfig::default(),
    };
    logging::init_logging(&config.observability)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "hwkey-link starting");

    if config.observability.metrics_enabled {
        // Validation already checked the address.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        }
    }

    let binder = Arc::new(LoopbackBinder::new(
        tokio::runtime::Handle::current(),
        BindBehavior::Accept {
            latency: Duration::from_millis(cli.latency_ms),
        },
    ));
    seed_parameters(&binder);

    let stack = start_link(
        &config,
        binder.clone(),
        Arc::new(StaticPlatform::supported()),
        Err(ProviderLookupError::NotFound("no vendor provider in demo".into())),
    )?;
    stack
        .controller
        .set_listener(Some(Arc::new(|event: ConnectionEvent| {
            tracing::info!(event = %event, "Connection event");
        })));

    match cli.command {
        Commands::Probe => probe(&stack).await?,
        Commands::Run { outage_every_secs } => {
            run(&stack, &binder, cli.config.map(|path| (path, config)), outage_every_secs).await?
        }
    }

    stack.controller.release();
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn probe(stack: &LinkStack) -> Result<(), Box<dyn std::error::Error>> {
    let connected = stack.controller.ensure_connected().await;
    let mut errors = Vec::new();

    let service_version = match stack.client.service_version().await {
        Ok(version) => Some(version),
        Err(e) => {
            errors.push(e.code());
            None
        }
    };
    let has_master_key = match stack.client.has_master_key().await {
        Ok(has) => Some(has),
        Err(e) => {
            errors.push(e.code());
            None
        }
    };
    if connected {
        if let Err(e) = stack.client.refresh_device_parameters().await {
            tracing::warn!(error = %e, "Device parameter refresh aborted");
        }
    }

    let report = ProbeReport {
        connected,
        state: stack.controller.state(),
        counters: stack.controller.counters(),
        handle: stack.controller.current_handle().map(|h| h.to_string()),
        service_version,
        has_master_key,
        biometric_type: stack.params.biometric_type(),
        sensor_position: stack.params.sensor_position(),
        errors,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run(
    stack: &LinkStack,
    binder: &Arc<LoopbackBinder>,
    watched: Option<(PathBuf, LinkConfig)>,
    outage_every_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();

    // Keep the watcher alive for the duration of the run.
    let _watcher = match watched {
        Some((path, current)) => {
            let (watcher, mut updates) = ConfigWatcher::new(&path, current);
            let watcher = watcher.run()?;
            let controller = stack.controller.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(connection) = updates.recv() => controller.update_config(connection),
                        _ = stop.recv() => break,
                    }
                }
            });
            Some(watcher)
        }
        None => None,
    };

    if outage_every_secs > 0 {
        let binder = Arc::clone(binder);
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(outage_every_secs));
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::warn!("Simulating key service crash");
                        binder.kill_service();
                        seed_parameters(&binder);
                    }
                    _ = stop.recv() => break,
                }
            }
        });
    }

    {
        let client = stack.client.clone();
        let mut stop = shutdown.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                tokio::select! {
                    _ = ticker.tick() => match client.service_version().await {
                        Ok(version) => tracing::info!(
                            version,
                            state = %client.controller().state(),
                            "Key service reachable"
                        ),
                        Err(e) => tracing::warn!(code = %e.code(), error = %e, "Key service check failed"),
                    },
                    _ = stop.recv() => break,
                }
            }
        });
    }

    let released = shutdown.release_on_trigger(stack.controller.clone());
    shutdown_on_signal(&shutdown).await;
    released.await?;
    Ok(())
}

fn seed_parameters(binder: &LoopbackBinder) {
    let service = binder.service();
    service.set_param(PARAM_BIOMETRIC_TYPE, ParamValue::Int(1));
    service.set_param(PARAM_SENSOR_POSITION, ParamValue::IntList(vec![540, 1900]));
}
