use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use room_srec::config::{ConfigProvider, EnvOverlay, FileConfigStore, SchedulerConfig, keys};
use room_srec::logging;
use room_srec::monitor::CommandProbe;
use room_srec::recording::{CommandRecorder, CommandRecorderConfig};
use room_srec::registry::{JsonRoomRegistry, RoomRegistry};
use room_srec::rooms::RoomSet;
use room_srec::scheduler::Scheduler;
use room_srec::Error;

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var_os(name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn require_command(config: &impl ConfigProvider, key: &str) -> room_srec::Result<String> {
    config
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::config_missing(key))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config_path = env_path("SREC_CONFIG", "config.txt");
    let rooms_path = env_path("SREC_ROOMS", "rooms.json");
    let log_dir = env_path("SREC_LOG_DIR", "logs");

    // Installed first so config loading is logged; `debug` is applied below.
    let (log_config, _guard) = logging::init_logging(&log_dir, false)?;

    let store = EnvOverlay::from_env(
        FileConfigStore::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?,
    );
    let config = SchedulerConfig::from_provider(&store).context("invalid scheduler configuration")?;
    log_config.apply_debug_setting(config.debug)?;

    let cancel = CancellationToken::new();
    log_config.start_retention_cleanup(cancel.clone());

    info!(config = %config_path.display(), rooms = %rooms_path.display(), "room-srec starting");

    let probe = CommandProbe::from_command_line(&require_command(&store, keys::PROBE_COMMAND)?)?;
    let output_dir = store.get(keys::OUTPUT_DIR).unwrap_or_else(|| "download".to_string());
    let mut recorder_config = CommandRecorderConfig::from_command_line(
        &require_command(&store, keys::RECORDER_COMMAND)?,
        output_dir,
    )?;
    if let Some(args) = store.get(keys::RECORDER_SIDE_CHANNEL_ARGS) {
        recorder_config = recorder_config.with_side_channel_args(&args);
    }

    let registry = Arc::new(JsonRoomRegistry::new(&rooms_path));
    let rooms = Arc::new(RoomSet::from_rooms(registry.load_all().await?)?);
    info!(count = rooms.len(), "Rooms loaded");

    let scheduler = Scheduler::new(
        config,
        rooms,
        registry,
        Arc::new(probe),
        Arc::new(CommandRecorder::new(recorder_config)),
    );
    scheduler.start();

    shutdown_signal().await;

    scheduler.shutdown().await;
    cancel.cancel();
    info!("room-srec shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
