// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::PipelineError;
use authlog::geolocation::DEFAULT_LOOKUP_TIMEOUT;
use authlog::reader::DEFAULT_QUEUE_CAPACITY;
use authlog::Backpressure;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LOG_PATH: &str = "/var/log/auth.log";
pub const DEFAULT_METRICS_PORT: u16 = 2112;

/// Configuration of the whole pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    /// Authentication log to follow
    pub log_path: PathBuf,
    /// Listen address of the Prometheus endpoint
    pub metrics_addr: SocketAddr,
    /// Whether to resolve the country of each attacker
    pub geolocate: bool,
    /// Verbose logging
    pub debug: bool,
    /// Enables ipstack as a geolocation fallback
    pub ipstack_access_key: Option<String>,
    /// Capacity of the event and error queues
    pub queue_capacity: usize,
    /// How often the log file is checked for new data once at its end
    pub poll_interval: Duration,
    /// Longest log line kept, in bytes; longer lines are truncated
    pub max_line_len: usize,
    /// Timeout of a single geolocation request
    pub lookup_timeout: Duration,
    /// Behaviour of the reader when a queue is full
    pub backpressure: Backpressure,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            metrics_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_METRICS_PORT),
            geolocate: true,
            debug: false,
            ipstack_access_key: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: authlog::follow::DEFAULT_POLL_INTERVAL,
            max_line_len: authlog::follow::DEFAULT_MAX_LINE_LEN,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            backpressure: Backpressure::default(),
        }
    }
}

impl Config {
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.log_path.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "log file path cannot be empty".to_string(),
            ));
        }

        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "poll interval must be greater than 0".to_string(),
            ));
        }

        if self.max_line_len == 0 {
            return Err(PipelineError::InvalidConfig(
                "max line length must be greater than 0".to_string(),
            ));
        }

        if self
            .ipstack_access_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(PipelineError::InvalidConfig(
                "ipstack access key cannot be blank".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parses a listen address. Besides `host:port` and `[v6]:port`, a bare
/// `:port` listens on all interfaces.
pub fn parse_listen_addr(value: &str) -> Result<SocketAddr, PipelineError> {
    let value = value.trim();
    let invalid = || PipelineError::InvalidConfig(format!("Invalid listen address '{value}'"));

    if let Some(port) = value.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Ok(addr);
    }
    // Host names such as `localhost:2112`.
    value
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .next()
        .ok_or_else(invalid)
}
