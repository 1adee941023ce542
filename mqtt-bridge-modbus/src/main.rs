//! MQTT bridge for Modbus PLCs.
//!
//! Polls configured tag groups from a Modbus/TCP controller and publishes
//! each group as a timestamped JSON payload to an MQTT broker.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use mqtt_bridge_modbus::config::BridgeConfig;
use mqtt_bridge_modbus::runner::BridgeRunner;
use plcbridge_common::LoggingConfig;

/// MQTT bridge for Modbus PLCs.
#[derive(Parser, Debug)]
#[command(name = "mqtt-bridge-modbus")]
#[command(about = "Polls a Modbus PLC and publishes tag groups to MQTT")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "plcbridge.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration; failures here are fatal before any connection
    // is attempted.
    let config = BridgeConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    plcbridge_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting mqtt-bridge-modbus");
    info!("Loaded configuration from {:?}", args.config);

    BridgeRunner::new(config).run().await
}
