use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::{
    config::CyclerConfig,
    controller::{CycleRecord, ReaderLifecycleController},
    error::CycleError,
    model::DiscoveryMethod,
    services::{ConnectionService, DiscoveryService, LocationDirectory},
    simulator::{FailurePoint, SimulatedTerminal},
};

#[derive(Parser)]
#[command(name = "reader-cycler")]
#[command(about = "Cycles a card reader through discover, connect and disconnect to reproduce disconnect defects")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// JSON config file; flags override its values
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover, connect and disconnect a reader over and over until something fails
    Run {
        #[command(flatten)]
        backend: BackendArgs,

        /// Stop after this many completed cycles (default: never)
        #[arg(short = 'n', long)]
        cycles: Option<u64>,

        /// Discovery method (bluetooth-scan, bluetooth-proximity, internet)
        #[arg(short, long)]
        method: Option<DiscoveryMethod>,

        /// Scan for physical readers instead of simulated ones
        #[arg(long)]
        hardware: bool,

        /// Make the simulated backend report NOT CONNECTED after a disconnect
        #[arg(long)]
        clean_disconnect: bool,
    },

    /// List the locations the backend offers
    Locations {
        #[command(flatten)]
        backend: BackendArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct BackendArgs {
    /// Connection token endpoint
    #[arg(long, env = "READER_CYCLER_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Hand this fixed token to the backend instead of calling the endpoint
    #[arg(long)]
    pub static_token: Option<String>,

    /// Make one backend call fail (list-locations, discover, connect, disconnect)
    #[arg(long)]
    pub fail_at: Option<FailurePoint>,
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.quiet {
        log::LevelFilter::Warn
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Run {
            backend,
            cycles,
            method,
            hardware,
            clean_disconnect,
        } => {
            let mut config = build_config(cli.config.as_deref(), &backend)?;
            if let Some(cycles) = cycles {
                config.max_cycles = Some(cycles);
            }
            if let Some(method) = method {
                config.discovery.method = method;
            }
            if hardware {
                config.discovery.simulated = false;
            }
            if clean_disconnect {
                config.simulator.sticky_disconnect = false;
            }
            cmd_run(config).await
        }
        Commands::Locations { backend } => {
            let config = build_config(cli.config.as_deref(), &backend)?;
            cmd_locations(config).await
        }
    }
}

/// Load the config file, if any, and apply backend flags on top
pub fn build_config(path: Option<&Path>, backend: &BackendArgs) -> Result<CyclerConfig> {
    let mut config = match path {
        Some(path) => CyclerConfig::load(path)?,
        None => CyclerConfig::default(),
    };

    if let Some(url) = &backend.token_url {
        config.token_url = url.clone();
    }
    if let Some(token) = &backend.static_token {
        config.static_token = Some(token.clone());
    }
    if let Some(point) = backend.fail_at {
        config.simulator.fail_at = Some(point);
    }

    Ok(config)
}

fn simulated_terminal(config: &CyclerConfig) -> Result<Arc<SimulatedTerminal>> {
    let tokens = config
        .token_provider()
        .context("Failed to set up token provider")?;
    Ok(Arc::new(SimulatedTerminal::new(
        tokens,
        config.simulator.clone(),
    )))
}

async fn cmd_run(config: CyclerConfig) -> Result<()> {
    let terminal = simulated_terminal(&config)?;
    let discovery: Arc<dyn DiscoveryService> = terminal.clone();
    let connection: Arc<dyn ConnectionService> = terminal.clone();

    println!(
        "Cycling readers via {} (simulated={}), limit: {}",
        config.discovery.method,
        config.discovery.simulated,
        config
            .max_cycles
            .map_or_else(|| "none".to_string(), |n| format!("{n} cycle(s)"))
    );

    let mut controller = ReaderLifecycleController::bootstrap(
        terminal.as_ref(),
        discovery,
        connection,
        config.discovery,
    )
    .await?;
    println!("Location: {}", controller.location());

    let outcome = controller.run(config.max_cycles).await;
    print_history(controller.history());
    outcome?;

    println!("Completed {} cycle(s).", controller.history().len());
    Ok(())
}

async fn cmd_locations(config: CyclerConfig) -> Result<()> {
    let terminal = simulated_terminal(&config)?;

    let locations = terminal
        .list_locations()
        .await
        .map_err(|err| CycleError::from_service(err, CycleError::LocationLookup))?;

    if locations.is_empty() {
        println!("No locations found.");
        return Ok(());
    }

    println!("Available locations:");
    for (i, location) in locations.iter().enumerate() {
        println!("  [{i}] {location}");
    }

    Ok(())
}

fn print_history(history: &[CycleRecord]) {
    if history.is_empty() {
        return;
    }

    println!("Cycle history:");
    for record in history {
        let status = if record.discrepancy {
            format!("STILL {} AFTER DISCONNECT", record.status_after_disconnect)
        } else {
            "OK".to_string()
        };
        println!(
            "  [{}] {} {} - {} ({}ms)",
            record.round,
            record.started_at.format("%H:%M:%S"),
            record.reader,
            status,
            record.duration_ms
        );
    }
}
