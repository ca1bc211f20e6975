//! YDS Logger - Yamaha diagnostic bus to ELM327 bridge
//!
//! Usage: `yds-logger [config.json]`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use yds_logger_lib::constants::timing::IDLE_SLEEP_MS;
use yds_logger_lib::serial;
use yds_logger_lib::{
    Config, FixedHealth, Gateway, QueueTransport, SerialBus, SqliteStore, SystemClock, TcpBridge,
    Tick,
};

fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    println!("╔═══════════════════════════════════════════════════════╗");
    println!("║     YDS Logger v{:<38}║", env!("CARGO_PKG_VERSION"));
    println!("║     Yamaha diagnostic bus to ELM327 bridge            ║");
    println!("╚═══════════════════════════════════════════════════════╝");
    println!();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("yds-logger.json"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let mut bus = match SerialBus::open(&config.bus.port, config.bus.baud_rate) {
        Ok(bus) => bus,
        Err(e) => {
            error!("{:#}", e);
            match serial::list_ports() {
                Ok(ports) if !ports.is_empty() => {
                    println!("Available ports:");
                    for port in ports {
                        println!("  {}", port.describe());
                    }
                }
                Ok(_) => println!("No serial ports found. Is the L9637D adapter connected?"),
                Err(e) => warn!("{:#}", e),
            }
            return Err(e);
        }
    };

    let mut bridge = TcpBridge::bind(&config.link)?;
    let clock = SystemClock::new();
    let idle = Duration::from_millis(IDLE_SLEEP_MS);

    loop {
        let store = SqliteStore::open(Path::new(&config.storage.path))
            .context("Failed to open settings store")?;
        let mut transport = QueueTransport::new(config.link.queue_capacity);
        let mut gateway = Gateway::new(&config, clock, store, FixedHealth::from(&config.identity));
        gateway.start(&mut transport);
        info!("Logger running on {}", bus.name());

        loop {
            let tick = gateway.tick(&mut bus, &mut transport);
            let moved = bridge.poll(&mut transport);

            match tick {
                Tick::Restart => break,
                Tick::Idle if !moved => std::thread::sleep(idle),
                _ => {}
            }
        }

        bridge.flush(&mut transport);
        info!("Restarting");
    }
}
