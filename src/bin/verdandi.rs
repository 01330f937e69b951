//! verdandi: configuration service CLI
//!
//! Resolve configurations and probe the service through the same resilient
//! client applications use.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use verdandi::{BreakerRegistry, ClientConfig, ResolutionClient};

/// Verdandi CLI
#[derive(Parser)]
#[command(name = "verdandi")]
#[command(version)]
#[command(about = "Resilient configuration service client")]
struct Args {
    /// Config file (default: ~/.verdandi/config.toml, then /etc/verdandi/config.toml)
    #[arg(short, long, env = "VERDANDI_CONFIG")]
    config: Option<PathBuf>,

    /// Service base URL, overriding the config file
    #[arg(short, long)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check service health
    Health,

    /// Resolve one or more configuration names
    Resolve {
        /// Configuration names
        #[arg(required = true)]
        names: Vec<String>,
        /// Resolve the extended-reasoning variant
        #[arg(short, long)]
        thinking: bool,
        /// Print cache statistics afterwards
        #[arg(long)]
        stats: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.service.url = url;
        config.validate()?;
    }

    let registry = Arc::new(BreakerRegistry::new());
    let client = ResolutionClient::from_config(&config, registry)?;

    let code = match args.command {
        Command::Health => {
            let healthy = client.health_check().await;
            println!("{}: {}", config.service.url, if healthy { "healthy" } else { "unhealthy" });
            if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }

        Command::Resolve {
            names,
            thinking,
            stats,
        } => {
            let mut code = ExitCode::SUCCESS;
            for name in &names {
                match client.resolve(name, thinking).await {
                    Ok(resolution) => {
                        println!(
                            "{name} ({}, variant: {})",
                            resolution.source.as_str(),
                            resolution.variant_id.as_deref().unwrap_or("none")
                        );
                        println!("{}", serde_json::to_string_pretty(&*resolution.config)?);
                    }
                    Err(e) => {
                        eprintln!("{name}: {e}");
                        code = ExitCode::FAILURE;
                    }
                }
            }
            if stats {
                let stats = client.stats();
                println!(
                    "cache: {} entries, {} hits, {} misses, hit ratio {:.2}, {} refreshing",
                    stats.size,
                    stats.hits,
                    stats.misses,
                    stats.hit_ratio,
                    stats.refreshes_in_progress
                );
            }
            code
        }

        Command::Config => {
            println!("{config:#?}");
            if config.prewarm.keys.is_empty() {
                println!("note: [prewarm] keys is empty; nothing is refreshed on recovery");
            }
            ExitCode::SUCCESS
        }
    };

    client.shutdown().await;
    Ok(code)
}
