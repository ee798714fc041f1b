//! plate-watch - watch-list plate recognition bridge for a camera NVR
//!
//! Subscribes to NVR vehicle-detection events over MQTT, runs plate
//! recognition on eligible events, fuzzy-matches recognized plates against
//! a configured watch-list, and republishes results to Home Assistant's
//! MQTT discovery bus.
//!
//! Module structure:
//! - `domain/` - Event envelopes and the persistent plate record
//! - `io/` - External interfaces (MQTT, NVR, recognizer, snapshots, store)
//! - `services/` - Business logic (filter, matcher, detection, gates)
//! - `infra/` - Infrastructure (Config)

use clap::Parser;
use plate_watch::infra::Config;
use plate_watch::io::{
    create_ha_channel, HaPublisher, NvrClient, PlateStore, RestRecognizer, SnapshotWriter,
};
use plate_watch::services::Dispatcher;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// plate-watch - NVR plate recognition and watch-list matching
#[derive(Parser, Debug)]
#[command(name = "plate-watch", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/plate-watch.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), "plate-watch starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        events_topic = %config.events_topic(),
        nvr_base_url = %config.nvr_base_url(),
        cameras = ?config.cameras().keys().collect::<Vec<_>>(),
        watched_plates = %config.watched_plates().len(),
        fuzzy_match = %config.fuzzy_match(),
        workers = %config.workers(),
        "config_loaded"
    );

    // Open the plate store (creates the database and schema on first run)
    let store = PlateStore::open(config.db_path()).await?;

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create event channel (bounded for backpressure)
    let (event_tx, event_rx) = mpsc::channel(1000);

    // Start MQTT ingest client
    let ingest_config = config.clone();
    let ingest_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            plate_watch::io::mqtt::start_event_ingest(ingest_config, event_tx, ingest_shutdown)
                .await
        {
            tracing::error!(error = %e, "MQTT ingest error");
        }
    });

    // Start Home Assistant egress publisher
    let (ha_sender, ha_rx) = create_ha_channel(1000);
    let publisher = HaPublisher::new(&config, ha_rx);
    let publisher_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        publisher.run(publisher_shutdown).await;
    });

    // External collaborators, constructed once and shared across workers
    let snapshots = Arc::new(NvrClient::new(&config));
    let recognizer = Arc::new(RestRecognizer::new(&config));
    let writer = Arc::new(SnapshotWriter::new(config.snapshot_dir()));

    let dispatcher = Dispatcher::new(config, store, snapshots, recognizer, writer, ha_sender);

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run dispatcher - consumes events until the ingest channel closes
    dispatcher.run(event_rx).await;

    info!("plate-watch shutdown complete");
    Ok(())
}
