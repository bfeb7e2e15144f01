//! Calypso Service - Ultrasonic anemometer to delta stream.
//!
//! Run with: `cargo run -p calypso-service`

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use calypso_core::{BleTransport, Ultrasonic};
use calypso_service::config::default_config_path;
use calypso_service::{Collector, Config, Exit};

/// Calypso Service - stream Ultrasonic wind data as JSON deltas.
#[derive(Parser, Debug)]
#[command(name = "calypso-service")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Advertised device name (overrides config).
    #[arg(short, long, global = true)]
    name: Option<String>,

    /// Output rate in Hz: 1, 4 or 8 (overrides config).
    #[arg(short, long, global = true)]
    rate: Option<u8>,

    /// Compass: 1 on, 0 off (overrides config).
    #[arg(long, global = true)]
    compass: Option<u8>,

    /// Maximum retries, 0 for unlimited (overrides config).
    #[arg(long, global = true)]
    max_retries: Option<u32>,

    /// Search timeout in seconds (overrides config).
    #[arg(long, global = true)]
    search_timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the driver in the foreground (default behavior).
    Run,

    /// Manage the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,

    /// Write the effective configuration to the config path.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Validate the effective configuration.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("calypso_service=info".parse()?)
                .add_directive("calypso_core=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    match args.command {
        Some(Command::Config { action }) => {
            handle_config_action(action, args.config.as_deref(), &config)
        }
        Some(Command::Run) | None => run(config).await,
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(name) = &args.name {
        config.device.name = name.clone();
    }
    if let Some(rate) = args.rate {
        config.device.rate = Some(rate);
    }
    if let Some(compass) = args.compass {
        config.device.compass = Some(compass);
    }
    if let Some(max_retries) = args.max_retries {
        config.device.max_retries = max_retries;
    }
    if let Some(secs) = args.search_timeout {
        config.device.search_timeout_secs = secs;
    }

    Ok(config)
}

fn handle_config_action(
    action: ConfigAction,
    path: Option<&Path>,
    config: &Config,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let path = path.map_or_else(default_config_path, Path::to_path_buf);
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            config.validate()?;
            config.save(&path)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        ConfigAction::Check => {
            config.validate()?;
            println!("Configuration is valid");
            Ok(())
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    if let Err(e) = config.validate() {
        warn!("{}", e);
    }

    let transport = BleTransport::new().await?.timeouts(config.link_timeouts());
    let driver = Ultrasonic::new(Arc::new(transport), config.device_options());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let (exit, _) = Collector::new(driver, std::io::stdout()).run(shutdown).await?;
    match exit {
        Exit::Shutdown => info!("Stopped"),
        Exit::RetriesExhausted => anyhow::bail!("Device not reachable, retries exhausted"),
    }
    Ok(())
}
