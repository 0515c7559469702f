//! wshub - serve the expression hub until interrupted
//!
//! Loads configuration, sets up logging, registers the hub service with the
//! lifecycle coordinator and runs it. SIGINT/SIGTERM trigger a coordinated
//! shutdown; the exit code reports whether the stop was intentional.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use wshub::cli::Cli;
use wshub::{Config, ExpressionEvaluator, HubService, Priority, Registry, Server};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    let log_guard = wshub::logging::init(&config);

    info!("Starting wshub {}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", config.listen_addr());
    info!("  History depth: {}", config.max_history);
    info!("  Static document: {:?}", config.static_root);
    info!("  Mode: {:?}", config.mode);

    let hub_service = Arc::new(HubService::new(&config, Arc::new(ExpressionEvaluator::new())));

    let mut registry = Registry::new();
    registry.register("websocket", hub_service, Priority::Low);

    let server = Arc::new(Server::new(registry.into_services()));

    let signal_server = server.clone();
    tokio::spawn(async move {
        let reason = shutdown_signal().await;
        signal_server.shutdown(reason).await;
    });

    let result = server.run().await;
    let code = server.exit_code(&result);

    // flush the file writer before exiting
    drop(log_guard);
    std::process::exit(code);
}

/// Wait for SIGINT or SIGTERM and describe which arrived
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => return "interrupt received",
                    _ = terminate.recv() => return "terminate received",
                }
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for interrupts: {}", e);
        std::future::pending::<()>().await;
    }
    "interrupt received"
}
