//! CLI entry point for the pairlink relay server.
//!
//! This binary runs the room-based relay that pairlink channels rendezvous
//! through, and offers small helpers for generating and validating
//! configuration files.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};
use pairlink::{
    relay::RelayServer,
    utils::{PairlinkConfig, DEFAULT_CONFIG_FILE},
};
use std::path::PathBuf;
use tokio::signal;

/// Pairlink Relay - rendezvous and blind message relay for paired channels
#[derive(Parser)]
#[command(name = "pairlink-relay")]
#[command(about = "Room-based relay server for end-to-end encrypted pairlink channels")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay server
    Run {
        /// Listen address, overriding the configuration
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate a configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let mut config = PairlinkConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { listen } => {
            if let Some(listen) = listen {
                config.relay.listen_addr = listen;
            }
            run_relay(&config).await
        }
        Commands::Config { action } => handle_config_command(action, &config),
    }
}

fn setup_logging(verbose: u8, quiet: bool) {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();
}

async fn run_relay(config: &PairlinkConfig) -> Result<()> {
    let server = RelayServer::bind(&config.relay).await?;
    info!("relay listening on {}", server.local_addr()?);

    tokio::select! {
        result = server.run() => {
            warn!("relay stopped: {result:?}");
            result?;
        }
        _ = signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    Ok(())
}

fn handle_config_command(action: ConfigCommands, config: &PairlinkConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if path.exists() {
                return Err(anyhow::anyhow!(
                    "{} already exists, refusing to overwrite",
                    path.display()
                ));
            }
            PairlinkConfig::default().save(&path)?;
            println!("Configuration written to {}", path.display());
            Ok(())
        }
        ConfigCommands::Validate { file } => {
            let path = file.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            let config = PairlinkConfig::from_file(&path)?;
            config.validate()?;
            println!("{} is valid", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            println!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
