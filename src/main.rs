// src/main.rs

//! The main entry point for the xpod control-plane node.

use anyhow::Result;
use std::env;
use std::sync::Arc;
use tracing::error;
use xpod::config::Config;
use xpod::server;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() -> Result<()> {
    run_app().await
}

async fn run_app() -> Result<()> {
    // Define version information.
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    // Collect command-line arguments to decide the execution mode.
    let args: Vec<String> = env::args().collect();

    // Handle the --version flag.
    if args.contains(&"--version".to_string()) {
        println!("xpod version {VERSION}");
        return Ok(());
    }

    // Determine the configuration path.
    // It can be provided via a --config flag; otherwise, it defaults to "config.toml".
    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    // Load the node configuration from the determined path. The node cannot
    // run without a valid configuration.
    let mut config = match Config::from_file(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            std::process::exit(1);
        }
    };

    // Override port if provided as a command-line argument
    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
    }

    // Setup logging with reloading capabilities.
    // Get initial log level from env var or config.
    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());

    // Create a reloadable filter layer.
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_log_level));

    // Initialize the global subscriber with the reload and formatting layers.
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    // Store the handle in an Arc to be used for dynamic log level changes.
    let _reload_handle = Arc::new(reload_handle);

    if let Err(e) = server::run(config).await {
        error!("Node runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
