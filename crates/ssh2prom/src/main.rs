// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use ssh2prom_core::config::{parse_listen_addr, DEFAULT_LOG_PATH};
use ssh2prom_core::Config;

/// Exports failed SSH login attempts as Prometheus metrics.
#[derive(Debug, Parser)]
#[command(name = "ssh2prom", version, about)]
struct Args {
    /// Authentication log to follow
    #[arg(short = 'f', long = "file", env = "SSH2PROM_FILE", default_value = DEFAULT_LOG_PATH)]
    file: PathBuf,

    /// Listen address of the metrics endpoint; `:port` listens on all interfaces
    #[arg(short = 'm', long, env = "SSH2PROM_METRICS_ADDR", default_value = ":2112", value_parser = parse_metrics_addr)]
    metrics_addr: SocketAddr,

    /// Resolve the country of each source address
    #[arg(
        short = 'g',
        long,
        env = "SSH2PROM_GEOLOCATE",
        default_value_t = true,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    geolocate: bool,

    /// Verbose logging
    #[arg(
        short = 'd',
        long,
        env = "SSH2PROM_DEBUG",
        default_value_t = false,
        num_args = 0..=1,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    debug: bool,

    /// ipstack access key; enables ipstack as geolocation fallback
    #[arg(long, env = "SSH2PROM_IPSTACK_ACCESSKEY", hide_env_values = true)]
    ipstack_access_key: Option<String>,
}

fn parse_metrics_addr(value: &str) -> Result<SocketAddr, String> {
    parse_listen_addr(value).map_err(|e| e.to_string())
}

impl Args {
    fn into_config(self) -> Config {
        Config {
            log_path: self.file,
            metrics_addr: self.metrics_addr,
            geolocate: self.geolocate,
            debug: self.debug,
            ipstack_access_key: self.ipstack_access_key.filter(|key| !key.trim().is_empty()),
            ..Default::default()
        }
    }
}

fn init_logging(config: &Config) -> Result<(), String> {
    let env_filter = format!(
        "h2=off,hyper=off,hyper_util=off,reqwest=off,rustls=off,{}",
        config.log_level()
    );
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(env_filter).map_err(|e| e.to_string())?)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).map_err(|e| e.to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = Args::parse().into_config();

    if let Err(e) = init_logging(&config) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    debug!("Logging subsystem enabled");

    match ssh2prom_core::run(config, shutdown_signal()).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
