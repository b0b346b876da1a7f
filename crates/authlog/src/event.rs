// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The failed login attempt extracted from one authentication log line.

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;

/// Country value of an event that no enrichment has resolved yet.
pub const UNKNOWN_COUNTRY: &str = "unknown";

/// Remote address of a failed attempt as it appeared in the log.
///
/// Tokens that are not valid IP literals are kept verbatim rather than
/// invalidating the whole event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceAddress {
    Ip(IpAddr),
    Unparsed(String),
}

impl SourceAddress {
    pub fn parse(token: &str) -> Self {
        match token.parse::<IpAddr>() {
            Ok(ip) => Self::Ip(ip),
            Err(_) => Self::Unparsed(token.to_string()),
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Ip(ip) => Some(*ip),
            Self::Unparsed(_) => None,
        }
    }
}

impl fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "{ip}"),
            Self::Unparsed(raw) => write!(f, "{raw}"),
        }
    }
}

/// Geographic origin of an event.
///
/// Starts out as [`UNKNOWN_COUNTRY`] and can be resolved at most once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Country(String);

impl Country {
    pub fn unknown() -> Self {
        Self(UNKNOWN_COUNTRY.to_string())
    }

    pub fn is_resolved(&self) -> bool {
        self.0 != UNKNOWN_COUNTRY
    }

    /// Records a resolved country.
    ///
    /// Returns `false` and leaves the value untouched if the country was
    /// already resolved or `value` is blank.
    pub fn resolve(&mut self, value: &str) -> bool {
        let value = value.trim();
        if self.is_resolved() || value.is_empty() {
            return false;
        }
        self.0 = value.to_string();
        true
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Country {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed failed login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedConnEvent {
    pub username: String,
    pub address: SourceAddress,
    pub port: u16,
    pub timestamp: DateTime<Utc>,
    pub country: Country,
}

impl FailedConnEvent {
    pub fn new(
        username: impl Into<String>,
        address: SourceAddress,
        port: u16,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            address,
            port,
            timestamp,
            country: Country::unknown(),
        }
    }
}

impl fmt::Display for FailedConnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = match &self.address {
            SourceAddress::Ip(IpAddr::V6(ip)) => format!("[{ip}]"),
            other => other.to_string(),
        };
        write!(
            f,
            "{}@{}:{} at {} ({})",
            self.username,
            address,
            self.port,
            self.timestamp.to_rfc3339(),
            self.country
        )
    }
}
