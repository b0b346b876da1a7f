// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Prometheus reporting of failed connections and the HTTP endpoint serving
//! the metrics.

use authlog::FailedConnEvent;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{http, Method, Request, Response, StatusCode};
use prometheus::{Encoder, Gauge, IntCounterVec, Opts, Registry, TextEncoder};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::PipelineError;

pub const METRICS_PATH: &str = "/metrics";
pub const FAILED_CONNECTIONS_METRIC: &str = "ssh2prom_failed_connections_total";
pub const LAST_FAILED_CONNECTION_METRIC: &str = "ssh2prom_last_failed_connection_timestamp_seconds";

/// Sink for enriched events.
pub trait Reporter: Send + Sync {
    fn report(&self, event: &FailedConnEvent);
}

impl<R: Reporter + ?Sized> Reporter for Arc<R> {
    fn report(&self, event: &FailedConnEvent) {
        (**self).report(event)
    }
}

#[derive(Debug, Clone)]
pub struct PrometheusReporter {
    registry: Registry,
    failed_connections: IntCounterVec,
    last_failed_connection: Gauge,
}

impl PrometheusReporter {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let failed_connections = IntCounterVec::new(
            Opts::new(
                FAILED_CONNECTIONS_METRIC,
                "Failed SSH login attempts by country of origin.",
            ),
            &["country"],
        )?;
        let last_failed_connection = Gauge::new(
            LAST_FAILED_CONNECTION_METRIC,
            "Unix time of the most recently reported failed SSH login attempt.",
        )?;
        registry.register(Box::new(failed_connections.clone()))?;
        registry.register(Box::new(last_failed_connection.clone()))?;

        Ok(Self {
            registry,
            failed_connections,
            last_failed_connection,
        })
    }

    /// Renders every registered metric in the Prometheus text format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Reporter for PrometheusReporter {
    fn report(&self, event: &FailedConnEvent) {
        self.failed_connections
            .with_label_values(&[event.country.as_str()])
            .inc();
        self.last_failed_connection
            .set(event.timestamp.timestamp_millis() as f64 / 1000.0);
    }
}

/// HTTP/1 server exposing [`METRICS_PATH`].
pub struct MetricsServer {
    listener: TcpListener,
    reporter: PrometheusReporter,
}

impl MetricsServer {
    pub async fn bind(addr: SocketAddr, reporter: PrometheusReporter) -> Result<Self, PipelineError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, reporter })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PipelineError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until `cancel_token` is cancelled. Open connections
    /// are dropped on return.
    pub async fn serve(self, cancel_token: CancellationToken) -> Result<(), PipelineError> {
        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();
        let reporter = self.reporter;
        let service = service_fn(move |req| metrics_handler(reporter.clone(), req));

        loop {
            let conn = tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!("Metrics server shutting down");
                    return Ok(());
                }
                con_res = self.listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Metrics server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    debug!("Metrics connection error: {e}");
                }
            });
        }
    }
}

async fn metrics_handler(
    reporter: PrometheusReporter,
    req: Request<Incoming>,
) -> http::Result<Response<Full<Bytes>>> {
    if req.uri().path() != METRICS_PATH {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::default());
    }
    if req.method() != Method::GET {
        return Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Full::default());
    }

    match reporter.gather() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, prometheus::TEXT_FORMAT)
            .body(Full::new(Bytes::from(body))),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from(e.to_string())))
        }
    }
}
