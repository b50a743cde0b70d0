//! Kiosk device entry point.
//!
//! ```text
//! kiosk-device                  Run in the foreground
//! kiosk-device --console        Also accept operator commands on stdin
//! kiosk-device --config <path>  Load a custom config TOML
//! kiosk-device --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kiosk_device::config::DeviceConfig;
use kiosk_device::service::KioskService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "kiosk-device", about = "Digital signage kiosk runtime")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "kiosk-device.toml")]
    config: PathBuf,

    /// Read operator commands from stdin.
    #[arg(long)]
    console: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&DeviceConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = DeviceConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("kiosk-device v{}", env!("CARGO_PKG_VERSION"));
    info!("device: {} on screen {}", config.device.device_id, config.device.screen_id);
    info!("hub: {}:{}", config.hub.address, config.hub.port);
    info!("cache: {}", config.cache.directory.display());

    let service = KioskService::new(config);
    let stop = service.stop_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.cancel();
    });

    service.run(cli.console).await?;

    Ok(())
}
