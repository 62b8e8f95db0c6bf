//! Stratus API Gateway Server
//!
//! Binary entry point: configures logging, loads and validates the
//! configuration snapshot, starts the gateway, and wires signal handling
//! for graceful shutdown and SIGHUP-triggered hot reload.

use log::{error, info, warn};
use std::sync::Arc;
use stratus_rs::config::settings::{load_settings, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use stratus_rs::config::validation::ConfigValidator;
use stratus_rs::logs::logger::configure_logger;
use stratus_rs::server::Gateway;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("starting Stratus gateway v{}", env!("CARGO_PKG_VERSION"));

    let validation = ConfigValidator::validate_comprehensive(&settings);
    if !validation.is_valid {
        error!("configuration validation failed:");
        for err in &validation.errors {
            error!("  - {}", err);
        }
        std::process::exit(1);
    }
    for warning in &validation.warnings {
        warn!("config warning: {}", warning);
    }

    let gateway = match Gateway::new(settings) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!("failed to build pipeline: {}", e);
            std::process::exit(1);
        }
    };

    // SIGHUP re-reads the config file and hot-swaps the pipeline.
    #[cfg(unix)]
    {
        let reload_gateway = gateway.clone();
        tokio::spawn(async move {
            let mut hup = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::hangup(),
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("SIGHUP handler unavailable: {}", e);
                    return;
                }
            };
            while hup.recv().await.is_some() {
                let path = std::env::var(CONFIG_PATH_ENV)
                    .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
                info!("SIGHUP received, reloading configuration from {}", path);
                match stratus_rs::config::settings::load_settings_from_path(&path) {
                    Ok(new_settings) => match reload_gateway.reload(new_settings).await {
                        Ok(version) => info!("reloaded configuration (generation {})", version),
                        Err(e) => error!("reload rejected, keeping current pipeline: {}", e),
                    },
                    Err(e) => error!("reload skipped, cannot read configuration: {}", e),
                }
            }
        });
    }

    // The server runs on its own task so the shutdown path can drain it
    // through Gateway::stop instead of cancelling it mid-flight.
    let server_gateway = gateway.clone();
    let mut server_task = tokio::spawn(async move { server_gateway.start().await });

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("server loop ended"),
                Ok(Err(e)) => {
                    error!("server error: {}", e);
                    return Err(e);
                }
                Err(e) => error!("server task failed: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, draining connections");
            gateway.stop().await;
            let _ = server_task.await;
        }
    }

    Ok(())
}
