//! Gridsync - collaborative spreadsheet synchronization server

use anyhow::Context;
use gridsync::config::load_config;
use gridsync::server::{self, Hub, HubConfig};
use gridsync::{Backend, LocalBackend, ServerError};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Usage: gridsync [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>       Load settings from a TOML file");
    eprintln!("  -b, --bind <ADDR>         Listen address (default: 127.0.0.1:8080)");
    eprintln!("  -h, --help                Print help");
    eprintln!();
    eprintln!("Logging follows RUST_LOG when set, else the config's log_level.");
}

fn init_tracing(level: &str) -> Result<(), ServerError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|_| ServerError::LogFilter(level.to_string()))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut config_file: Option<PathBuf> = None;
    let mut bind_override: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a file path");
                    std::process::exit(1);
                }
                config_file = Some(PathBuf::from(&args[i]));
            }
            "-b" | "--bind" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --bind requires an address");
                    std::process::exit(1);
                }
                bind_override = Some(args[i].to_string());
            }
            arg => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let (config, warnings) = load_config(config_file.as_deref());
    init_tracing(&config.log_level)?;
    for warning in warnings {
        warn!("{}", warning);
    }

    let backend = Arc::new(
        LocalBackend::new(config.default_dimensions(), config.recompute_limit)
            .with_limits(config.limits()),
    );
    if let Some(name) = config.seed_grid.as_deref() {
        let grid = backend
            .create_grid(name)
            .await
            .with_context(|| format!("creating seed grid '{}'", name))?;
        info!(grid = %grid.id, name = %grid.name, "seed grid ready");
    }

    let hub = Hub::new(
        backend,
        HubConfig {
            palette: config.palette.clone(),
            recompute_limit: config.recompute_limit,
            limits: config.limits(),
        },
    );

    let bind = bind_override.unwrap_or_else(|| config.bind.clone());
    let listener = server::bind(&bind).await?;

    tokio::select! {
        result = server::serve(listener, hub) => result.context("accept loop failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}
