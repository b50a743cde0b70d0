//! Kiosk hub entry point.
//!
//! ```text
//! kiosk-hub                  Serve devices, operator console on stdin
//! kiosk-hub --config <path>  Load a custom config TOML
//! kiosk-hub --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use kiosk_core::ConnectionInfo;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kiosk_hub::catalog::Catalog;
use kiosk_hub::config::HubConfig;
use kiosk_hub::signer::UrlSigner;
use kiosk_hub::{HubEvent, KioskHub, console};

#[derive(Parser, Debug)]
#[command(name = "kiosk-hub", about = "Schedule and command hub for kiosk devices")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "kiosk-hub.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        println!("{}", toml::to_string_pretty(&HubConfig::default())?);
        return Ok(());
    }

    let config = HubConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("kiosk-hub v{}", env!("CARGO_PKG_VERSION"));

    let catalog_path = config.catalog.schedule_file.clone();
    let catalog = Catalog::load(&catalog_path).await.unwrap_or_else(|e| {
        warn!("{e}; starting with an empty catalog");
        Catalog::default()
    });
    info!("catalog: {} screens from {}", catalog.screen_count(), catalog_path.display());

    let signer = UrlSigner::new(
        &config.catalog.signing_key,
        config.catalog.media_base_url.clone(),
        chrono::Duration::seconds(config.catalog.url_lifetime_secs),
    );
    let (hub, mut events) = KioskHub::listen(
        ConnectionInfo::new(config.network.bind_address.clone(), config.network.port),
        catalog,
        signer,
        chrono::Duration::seconds(config.presence.offline_after_secs),
    )
    .await?;
    let handle = hub.handle();

    let stop = CancellationToken::new();
    let server = tokio::spawn(hub.serve(stop.clone()));

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                HubEvent::DeviceConnected { device_id, screen_id, peer } => {
                    info!("+ {device_id} ({screen_id}) from {peer}")
                }
                HubEvent::DeviceDisconnected { device_id } => info!("- {device_id}"),
                HubEvent::PresenceChanged { device_id, status } => {
                    info!("{device_id} is now {status:?}")
                }
                HubEvent::CommandUpdated(update) => {
                    info!("command #{} {}", update.command_id, update.status)
                }
                HubEvent::Heartbeat(_) => {}
            }
        }
    });

    tokio::spawn(console::run(handle, catalog_path, tokio::io::stdin()));

    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl-C received, shutting down");
    stop.cancel();
    server.await.ok();

    Ok(())
}
