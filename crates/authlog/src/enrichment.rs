// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Enrichment of parsed events.
//!
//! An [`EnrichmentChain`] is an ordered list of [`Enrichment`] members built
//! once at startup. Every member runs for every event, in registration order.
//! A member that fails does not stop the chain: its error is collected and the
//! event continues through the remaining members with whatever state it has.

use crate::errors::EnrichmentError;
use crate::event::{FailedConnEvent, SourceAddress};
use crate::geolocation::GeolocationBackend;
use tracing::debug;

/// One member of the enrichment chain.
#[derive(Debug, Clone)]
pub enum Enrichment {
    /// Resolve the country with a single lookup service.
    Geolocate(GeolocationBackend),
    /// Resolve the country with the first lookup service that succeeds, in
    /// priority order. Fails only when every service fails.
    GeolocateWithFallback(Vec<GeolocationBackend>),
}

impl Enrichment {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Geolocate(backend) => backend.name(),
            Self::GeolocateWithFallback(_) => "geolocation-fallback",
        }
    }

    /// Adds this member's information to `event`.
    ///
    /// A country that is already resolved is left as is and no lookup is made.
    pub async fn apply(&self, event: &mut FailedConnEvent) -> Result<(), EnrichmentError> {
        if event.country.is_resolved() {
            return Ok(());
        }
        let ip = match &event.address {
            SourceAddress::Ip(ip) => *ip,
            SourceAddress::Unparsed(raw) => {
                return Err(EnrichmentError::UnresolvableAddress(raw.clone()))
            }
        };

        match self {
            Self::Geolocate(backend) => {
                let country = backend.country(ip).await.map_err(|source| {
                    EnrichmentError::Geolocation {
                        backend: backend.name(),
                        address: ip.to_string(),
                        source,
                    }
                })?;
                event.country.resolve(&country);
                Ok(())
            }
            Self::GeolocateWithFallback(backends) => {
                let mut errors = Vec::with_capacity(backends.len());
                for backend in backends {
                    match backend.country(ip).await {
                        Ok(country) => {
                            event.country.resolve(&country);
                            return Ok(());
                        }
                        Err(e) => {
                            debug!("{} failed for {}, trying next backend: {}", backend.name(), ip, e);
                            errors.push(format!("{}: {}", backend.name(), e));
                        }
                    }
                }
                Err(EnrichmentError::Exhausted {
                    address: ip.to_string(),
                    errors,
                })
            }
        }
    }
}

/// Fixed, ordered sequence of enrichment members.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentChain {
    members: Vec<Enrichment>,
}

impl EnrichmentChain {
    pub fn new(members: Vec<Enrichment>) -> Self {
        Self { members }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Enrichment] {
        &self.members
    }

    /// Runs every member over `event` in order and returns the enriched
    /// event together with the failures of the members that could not apply.
    pub async fn apply(
        &self,
        mut event: FailedConnEvent,
    ) -> (FailedConnEvent, Vec<EnrichmentError>) {
        let mut failures = Vec::new();
        for member in &self.members {
            if let Err(e) = member.apply(&mut event).await {
                debug!("Enrichment {} failed: {}", member.name(), e);
                failures.push(e);
            }
        }
        (event, failures)
    }
}
