use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use steamlink_bridge_lib::commands::{run_bridge, scan_devices, show_config};
use steamlink_bridge_lib::config::AppConfig;
use steamlink_bridge_lib::logging;
use steamlink_bridge_lib::state::AppState;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridges a Steam Controller over BLE to a virtual gamepad")]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List controllers as they are discovered
    Scan {
        /// Scan duration in seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    /// Connect to a controller and stream it to the virtual gamepad until Ctrl-C
    Run {
        /// Device id or MAC address; the first controller found is used otherwise
        #[arg(long)]
        device: Option<String>,
        /// Scan duration in seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Log gamepad frames instead of creating a virtual device
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    match cli.command {
        Command::Config => {
            let path = match cli.config {
                Some(path) => path,
                None => AppConfig::default_path()?,
            };
            let config = AppConfig::load_config(&path).await?;
            println!("{}", show_config(&config, &path)?);
        }
        Command::Scan { duration } => {
            let app_state = AppState::new(cli.config, true).await?;
            let duration = scan_duration(&app_state.config, duration);
            let found = scan_devices(&app_state, duration).await?;
            if found.is_empty() {
                println!("No controllers found");
            }
            app_state.supervisor.shutdown().await?;
        }
        Command::Run {
            device,
            duration,
            dry_run,
        } => {
            let app_state = AppState::new(cli.config, dry_run).await?;
            let duration = scan_duration(&app_state.config, duration);
            run_bridge(&app_state, device.as_deref(), duration).await?;
        }
    }

    info!("Exiting");
    Ok(())
}

fn scan_duration(config: &AppConfig, override_secs: Option<u64>) -> Duration {
    override_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.scan.duration())
}
