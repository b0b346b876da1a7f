// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod metrics;

use authlog::geolocation::{create_client, GeolocationBackend, IpApi, IpStack};
use authlog::{Enrichment, EnrichmentChain, FileReader, Parser, ReaderConfig};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub use config::Config;
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use error::PipelineError;
pub use metrics::{MetricsServer, PrometheusReporter, Reporter};

/// Builds the enrichment chain selected by `config`: ip-api alone, or ip-api
/// with ipstack as fallback when an access key is configured.
pub fn build_enrichment_chain(config: &Config) -> Result<EnrichmentChain, PipelineError> {
    if !config.geolocate {
        debug!("Geolocation disabled");
        return Ok(EnrichmentChain::default());
    }

    let client = create_client(config.lookup_timeout).map_err(|e| {
        PipelineError::InvalidConfig(format!("Failed to build geolocation client: {e}"))
    })?;
    let ip_api = GeolocationBackend::IpApi(IpApi::new(client.clone()));

    let member = match &config.ipstack_access_key {
        Some(key) => {
            debug!("ipstack enabled as geolocation fallback");
            Enrichment::GeolocateWithFallback(vec![
                ip_api,
                GeolocationBackend::IpStack(IpStack::new(client, key.clone())),
            ])
        }
        None => Enrichment::Geolocate(ip_api),
    };
    Ok(EnrichmentChain::new(vec![member]))
}

/// Runs the pipeline with a fresh Prometheus registry until `shutdown`
/// resolves.
pub async fn run<F>(config: Config, shutdown: F) -> Result<DispatchSummary, PipelineError>
where
    F: Future<Output = ()>,
{
    let reporter = PrometheusReporter::new()?;
    run_with_reporter(config, reporter, shutdown).await
}

/// Runs the pipeline until `shutdown` resolves, reporting into `reporter`.
///
/// Startup failures (invalid configuration, metrics listener, unreadable log
/// file) are returned before anything is consumed.
pub async fn run_with_reporter<F>(
    config: Config,
    reporter: PrometheusReporter,
    shutdown: F,
) -> Result<DispatchSummary, PipelineError>
where
    F: Future<Output = ()>,
{
    config.validate()?;
    let chain = build_enrichment_chain(&config)?;

    let server = MetricsServer::bind(config.metrics_addr, reporter.clone()).await?;
    info!(
        "Serving metrics on http://{}{}",
        server.local_addr()?,
        metrics::METRICS_PATH
    );

    let (events_tx, events_rx) = mpsc::channel(config.queue_capacity);
    let (errors_tx, errors_rx) = mpsc::channel(config.queue_capacity);
    let reader_config = ReaderConfig {
        path: config.log_path.clone(),
        poll_interval: config.poll_interval,
        max_line_len: config.max_line_len,
        backpressure: config.backpressure,
    };
    let reader = FileReader::new(reader_config, Parser::default(), chain, events_tx, errors_tx)
        .start()
        .await?;

    let cancel_token = CancellationToken::new();
    let server_task = tokio::spawn(server.serve(cancel_token.clone()));

    let summary = Dispatcher::new(events_rx, errors_rx, reporter)
        .run(reader, shutdown)
        .await;

    cancel_token.cancel();
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server stopped with an error: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
    }
    info!(
        "Stopped after reporting {} failed connections ({} errors)",
        summary.events, summary.errors
    );
    Ok(summary)
}
