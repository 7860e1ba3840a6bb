//! Tunnel control tool (tunnelctl)
//!
//! Drives the tunnel registry over the in-process provider: wg-quick files
//! are imported as tunnels, which can then be listed, checked, or taken
//! through a full activate/deactivate cycle.
//!
//! # Usage
//!
//! ```bash
//! # List tunnels imported from wg-quick files
//! tunnelctl list home.conf office.conf
//!
//! # Validate a file and print the normalized configuration
//! tunnelctl check home.conf
//!
//! # Activate one tunnel, wait for it to come up, then stop it
//! tunnelctl -v activate home home.conf office.conf
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use libtunnelmgr::{
    wg_quick, EndpointResolver, InMemoryProvider, ManagerSettings, StartOptions, TunnelEvent,
    TunnelRegistry, TunnelStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "tunnelctl")]
#[command(version)]
#[command(about = "Tunnel control tool - import, list and activate VPN tunnels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: text, json
    #[arg(short = 'o', long, default_value = "text")]
    output: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Settings file (TOML); defaults apply when omitted
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import wg-quick files and list the resulting tunnels
    List {
        /// wg-quick configuration files
        files: Vec<PathBuf>,
    },
    /// Validate a wg-quick file and print it normalized
    Check {
        file: PathBuf,
        /// Print the data-plane (UAPI) configuration instead
        #[arg(long)]
        uapi: bool,
    },
    /// Activate a tunnel, wait until it is active, then deactivate it
    Activate {
        /// Name of the tunnel to activate
        name: String,
        /// wg-quick configuration files
        files: Vec<PathBuf>,
        /// How long to wait for each transition (milliseconds)
        #[arg(long, default_value = "5000")]
        wait_ms: u64,
    },
    /// Print the effective settings as TOML
    Settings,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let settings = match &cli.settings {
        Some(path) => ManagerSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => ManagerSettings::default(),
    };
    debug!("Settings: {:?}", settings);

    match &cli.command {
        Commands::List { files } => {
            let registry = import(&settings, files).await?;
            let tunnels = registry.list().await;
            if cli.output == "json" {
                println!("{}", serde_json::to_string_pretty(&tunnels)?);
            } else {
                for t in tunnels {
                    println!("{:>3}  {:<24} {}", t.index, t.name, t.status);
                }
            }
        }
        Commands::Check { file, uapi } => {
            let config = wg_quick::import_file(file)
                .await
                .with_context(|| format!("Invalid configuration {}", file.display()))?;
            if *uapi {
                let options = StartOptions::generate(&config, &config.endpoints());
                print!("{}", options.uapi_config());
            } else {
                print!("{}", wg_quick::render(&config));
            }
        }
        Commands::Activate { name, files, wait_ms } => {
            let registry = import(&settings, files).await?;
            let wait = Duration::from_millis(*wait_ms);
            activate_cycle(&registry, name, wait).await?;
        }
        Commands::Settings => {
            print!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

async fn import(settings: &ManagerSettings, files: &[PathBuf]) -> Result<TunnelRegistry> {
    let provider = Arc::new(InMemoryProvider::with_capacity(settings.events.channel_capacity));
    let resolver = EndpointResolver::system(settings.resolver.clone());
    let registry = TunnelRegistry::new(provider, resolver, settings.clone());

    let mut configs = Vec::with_capacity(files.len());
    for file in files {
        configs.push(read(file).await?);
    }
    registry.add_batch(configs).await.context("Failed to import tunnels")?;
    Ok(registry)
}

async fn read(file: &Path) -> Result<libtunnelmgr::TunnelConfiguration> {
    wg_quick::import_file(file)
        .await
        .with_context(|| format!("Failed to import {}", file.display()))
}

async fn activate_cycle(registry: &TunnelRegistry, name: &str, wait: Duration) -> Result<()> {
    let Some(tunnel) = registry.find(name).await else {
        bail!("No tunnel named '{}'", name);
    };
    let mut events = registry.subscribe();

    info!("Activating '{}'", name);
    registry.start_activation(tunnel.id).await?;
    wait_for(&mut events, tunnel.id, TunnelStatus::Active, wait).await?;

    info!("Deactivating '{}'", name);
    registry.start_deactivation(tunnel.id).await?;
    wait_for(&mut events, tunnel.id, TunnelStatus::Inactive, wait).await?;
    Ok(())
}

/// Print status changes of one tunnel until it reaches `target`
async fn wait_for(
    events: &mut broadcast::Receiver<TunnelEvent>,
    id: libtunnelmgr::TunnelId,
    target: TunnelStatus,
    wait: Duration,
) -> Result<()> {
    let reached = tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(TunnelEvent::StatusChanged { id: changed, name, status }) if changed == id => {
                    println!("{}: {}", name, status);
                    if status == target {
                        return Ok::<(), anyhow::Error>(());
                    }
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => bail!("Registry closed"),
            }
        }
    })
    .await;

    match reached {
        Ok(result) => result,
        Err(_) => bail!("Timed out waiting for {} after {:?}", target, wait),
    }
}

/// Initialize logging based on command-line arguments
fn init_logging(cli: &Cli) {
    let log_level = if cli.verbose {
        "debug"
    } else {
        &cli.log_level
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!("tunnelctl={},libtunnelmgr={}", log_level, log_level))
        });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();
}
