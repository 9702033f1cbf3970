//! Command-line recorder
//!
//! Connects to one peripheral, enables notifications once services are
//! discovered and records every batch until interrupted.

use anyhow::Context;
use clap::Parser;
use gatt_recorder::domain::settings::SettingsService;
use gatt_recorder::infrastructure::bluetooth::btleplug_backend::BtleplugStack;
use gatt_recorder::infrastructure::bluetooth::protocol::{
    parse_uuid, GENERIC_DATA_CHAR_UUID, HEART_RATE_MEASUREMENT_UUID,
};
use gatt_recorder::infrastructure::logging::init_logger;
use gatt_recorder::{BleSession, ChannelObserver, ExternalStorage, FsStorage, SessionEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "gatt-recorder")]
#[command(about = "Record GATT notifications from a BLE peripheral")]
struct Cli {
    /// Device address (AA:BB:CC:DD:EE:FF); defaults to the last connected one
    address: Option<String>,

    /// Characteristics to subscribe to, full or 16-bit short form
    #[arg(short, long = "notify", value_delimiter = ',')]
    notify: Vec<String>,

    /// Directory holding the record file and reference transcripts
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Quiet period before a batch is flushed, in milliseconds
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Settings file (defaults to the per-user config directory)
    #[arg(long)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings_service = match &cli.settings {
        Some(path) => SettingsService::open(path.clone()),
        None => SettingsService::new()?,
    };
    let _log_guard = init_logger(&settings_service.get().log_settings)?;

    // Flags apply to this run only and never reach the settings file
    let settings = settings_service
        .get()
        .with_overrides(cli.storage_root.clone(), cli.debounce_ms);

    let address = cli
        .address
        .clone()
        .or_else(|| settings.last_connected_address.clone())
        .context("No device address given and none remembered")?;

    let notify = if cli.notify.is_empty() {
        vec![GENERIC_DATA_CHAR_UUID, HEART_RATE_MEASUREMENT_UUID]
    } else {
        cli.notify
            .iter()
            .map(|uuid| parse_uuid(uuid).with_context(|| format!("Invalid UUID {}", uuid)))
            .collect::<anyhow::Result<Vec<Uuid>>>()?
    };

    let config = settings.session_config()?;
    let storage = FsStorage::new(settings.storage_root()?);
    if !storage.is_available() {
        warn!(
            "Storage root {} is not a directory, batches will not be recorded",
            storage.root().display()
        );
    }

    let stack = BtleplugStack::new().await?;
    let (observer, mut events) = ChannelObserver::channel();
    let session = BleSession::new(Arc::new(stack), Arc::new(storage), config, Arc::new(observer));

    session.initialize()?;
    session.connect(&address)?;
    info!("Connecting to {}", address);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::GattConnected => {
                        if let Err(e) = settings_service.remember_address(&address) {
                            warn!("Failed to save settings: {}", e);
                        }
                    }
                    SessionEvent::GattServicesDiscovered => {
                        for service in session.list_services().unwrap_or_default() {
                            info!(
                                "Service {} ({} characteristics)",
                                service.uuid,
                                service.characteristics.len()
                            );
                        }
                        for uuid in &notify {
                            session.set_notification(*uuid, true);
                        }
                    }
                    SessionEvent::GattDisconnected => {
                        warn!("Disconnected from {}", address);
                    }
                    SessionEvent::DataAvailable { data, same } => {
                        if data.is_empty() {
                            info!("Batch recorded, same as reference: {}", same);
                        } else {
                            println!("{}", data);
                        }
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    if let Some(report) = session.flush_now() {
        info!("Flushed {} pending payloads on shutdown", report.payloads);
    }
    session.close();
    Ok(())
}
