mod command;
mod config;
mod dispatcher;
mod safety;
mod state;
mod task;
mod telemetry;
mod transport;

use std::sync::Arc;

use anyhow::{Context, Result};
use command::CommandExecutor;
use comms_shared::ModuleState;
use config::{BusBackend, ModuleConfig};
use dispatcher::Dispatcher;
use safety::{HeartbeatBeacon, HeartbeatMonitor};
use state::SharedState;
use task::ShutdownReason;
use telemetry::{StatusReporter, TelemetryPublisher};
use tokio::sync::mpsc;
use transport::{LivenessStore, MemoryBus, MessageBus, MqttBus};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ModuleConfig::from_env();
    info!("Communication module starting: {}", config.module_id);

    let (bus, liveness): (Arc<dyn MessageBus>, Arc<dyn LivenessStore>) = match config.backend {
        BusBackend::Mqtt => {
            info!("  MQTT broker: {}:{}", config.mqtt.host, config.mqtt.port);
            let bus = Arc::new(
                MqttBus::connect(config.mqtt.clone())
                    .await
                    .context("connecting to MQTT broker")?,
            );
            let liveness: Arc<dyn LivenessStore> = bus.clone();
            (bus as Arc<dyn MessageBus>, liveness)
        }
        BusBackend::Memory => {
            warn!("  Using in-process bus; no host can reach this module");
            let bus = Arc::new(MemoryBus::new());
            let liveness: Arc<dyn LivenessStore> = bus.clone();
            (bus as Arc<dyn MessageBus>, liveness)
        }
    };

    let state = SharedState::new(ModuleState::new());
    let telemetry = TelemetryPublisher::new(bus.clone(), config.telemetry_topic.clone());

    let executor = Arc::new(CommandExecutor::new(
        state.clone(),
        telemetry.clone(),
        config.simulation.clone(),
    ));
    let dispatcher = Dispatcher::start(bus.clone(), config.dispatcher.clone(), executor)
        .await
        .context("starting command dispatcher")?;

    let beacon = HeartbeatBeacon::new(bus.clone(), liveness.clone(), config.beacon.clone()).start();
    let monitor = HeartbeatMonitor::new(
        liveness,
        state.clone(),
        telemetry.clone(),
        config.heartbeat.clone(),
    )
    .start();

    let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
    let status = StatusReporter::new(
        bus.clone(),
        state.clone(),
        telemetry,
        config.status_interval,
        config.drift_seed,
    )
    .start(fatal_tx);

    info!("Module ready in {}. Press Ctrl+C to stop", state.status().await);

    let reason = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            ShutdownReason::Interrupted
        }
        Some(reason) = fatal_rx.recv() => reason,
    };
    warn!("Shutting down: {}", reason);

    status.stop().await;
    monitor.stop().await;
    beacon.stop().await;
    dispatcher.stop().await;
    if let Err(e) = bus.close().await {
        warn!("Failed to close {} bus: {:#}", bus.name(), e);
    }
    info!("Module stopped");

    match reason {
        ShutdownReason::Interrupted => Ok(()),
        ShutdownReason::BusLost { reason } => Err(anyhow::anyhow!("bus connectivity lost: {}", reason)),
    }
}
