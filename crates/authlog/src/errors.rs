// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::geolocation::GeolocationError;

/// Reasons a log line does not produce an event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// The line is not a tracked event. Never surfaced operationally.
    #[error("wrong event format")]
    WrongFormat,
    #[error("log line is not valid UTF-8")]
    InvalidEncoding,
}

/// A single enrichment member could not add its information to an event.
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("{backend} lookup for {address} failed: {source}")]
    Geolocation {
        backend: &'static str,
        address: String,
        #[source]
        source: GeolocationError,
    },
    #[error("no geolocation backend resolved {address}: {}", .errors.join("; "))]
    Exhausted {
        address: String,
        errors: Vec<String>,
    },
    #[error("cannot geolocate unparsed address {0}")]
    UnresolvableAddress(String),
}

/// Errors emitted by the tailing reader, either on its error queue or from
/// startup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),
    #[error("log source {} unavailable: {source}", .path.display())]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed reading {}: {source}", .path.display())]
    Transport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
