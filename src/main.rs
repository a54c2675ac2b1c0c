use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use haptic_ring_runtime::config::RuntimeConfig;
use haptic_ring_runtime::runtime::{self, RunOptions};

/// Haptic ring host runtime
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port of the amplifier controller
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Run against a simulated amplifier controller instead of hardware
    #[arg(long)]
    simulate: bool,

    /// Read operator commands from the keyboard
    #[arg(long)]
    keyboard: bool,

    /// Start with sending disabled
    #[arg(long)]
    no_send: bool,

    /// Start with receiving disabled
    #[arg(long)]
    no_receive: bool,

    /// Host loop frequency
    #[arg(long)]
    loop_hz: Option<u64>,
}

impl Args {
    fn into_options(self) -> Result<RunOptions, Box<dyn std::error::Error + Send + Sync>> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from {}", path.display());
                RuntimeConfig::load(path)?
            }
            None => RuntimeConfig::default(),
        };

        if let Some(port) = self.port {
            config.serial.port = port;
        }
        if let Some(baud) = self.baud {
            config.serial.baudrate = baud;
        }
        if self.no_send {
            config.serial.sending = false;
        }
        if self.no_receive {
            config.serial.receiving = false;
        }
        if self.loop_hz.is_some() {
            config.loop_hz = self.loop_hz;
        }

        Ok(RunOptions {
            config,
            simulate: self.simulate,
            keyboard: self.keyboard,
        })
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=debug or trace for per-frame output)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let result = match args.into_options() {
        Ok(options) => runtime::run(options).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
