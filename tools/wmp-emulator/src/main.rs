//! WMP Emulator Server
//!
//! A standalone emulated IS-IR-WMP-1 gateway for developing and testing
//! controllers without hardware.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wmp_core::{ClockMode, DEFAULT_PORT};
use wmp_emulator::{EmulatedDevice, EmulatorConfig};

#[derive(Parser)]
#[command(name = "wmp-emulator")]
#[command(about = "Emulated Intesis WMP gateway")]
#[command(version)]
struct Cli {
    /// Listen host
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Vertical vane capability, compact notation (e.g. A5S, 4, N)
    #[arg(long)]
    vud: Option<String>,

    /// Horizontal vane capability, compact notation
    #[arg(long)]
    vlr: Option<String>,

    /// Fan speed capability, compact notation (no swing)
    #[arg(long)]
    fan: Option<String>,

    /// Setpoint limits follow the mode
    #[arg(long)]
    dynamic_setptemp: bool,

    /// Freeze the gateway clock
    #[arg(long)]
    frozen_clock: bool,

    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Load the config file, then apply flag overrides
    fn emulator_config(&self) -> Result<EmulatorConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str::<EmulatorConfig>(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => EmulatorConfig::default(),
        };

        if let Some(token) = &self.vud {
            config.vaneud = token.clone();
        }
        if let Some(token) = &self.vlr {
            config.vanelr = token.clone();
        }
        if let Some(token) = &self.fan {
            config.fansp = token.clone();
        }
        if self.dynamic_setptemp {
            config.dynamic_setpoint = true;
        }
        if self.frozen_clock {
            config.clock = ClockMode::Frozen;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.emulator_config()?;
    let addr = format!("{}:{}", cli.host, cli.port);

    tracing::info!("Starting WMP emulator");
    tracing::info!(
        "FANSP {}, VANEUD {}, VANELR {}, setpoint limits {}",
        config.fansp,
        config.vaneud,
        config.vanelr,
        if config.dynamic_setpoint {
            "per mode"
        } else {
            "static"
        }
    );
    tracing::info!("Idle timeout: {:?}", config.idle_timeout());

    let device = EmulatedDevice::new(config)?;

    let serving = device.clone();
    let server = tokio::spawn(async move { serving.serve_tcp(&addr).await });

    tokio::select! {
        result = server => {
            result.context("emulator task failed")??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            device.stop();
        }
    }

    Ok(())
}
