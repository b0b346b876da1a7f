// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! IP geolocation lookup services used to resolve the country of an attacker.

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

pub const IP_API_URL: &str = "http://ip-api.com";
pub const IPSTACK_URL: &str = "http://api.ipstack.com";
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum GeolocationError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(StatusCode),
    #[error("service reported an error: {0}")]
    Lookup(String),
    #[error("service returned no country")]
    EmptyCountry,
}

/// Builds the HTTP client shared by the lookup backends.
pub fn create_client(timeout: Duration) -> Result<Client, GeolocationError> {
    Ok(Client::builder().use_rustls_tls().timeout(timeout).build()?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: String,
    message: Option<String>,
    country_code: Option<String>,
}

/// Lookups against the ip-api.com JSON endpoint. Needs no credentials.
#[derive(Debug, Clone)]
pub struct IpApi {
    client: Client,
    base_url: String,
}

impl IpApi {
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, IP_API_URL)
    }

    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn country(&self, ip: IpAddr) -> Result<String, GeolocationError> {
        let url = format!("{}/json/{}", self.base_url, ip);
        let response = self
            .client
            .get(&url)
            .query(&[("fields", "status,message,countryCode")])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeolocationError::Status(response.status()));
        }

        let body: IpApiResponse = response.json().await?;
        if body.status != "success" {
            return Err(GeolocationError::Lookup(
                body.message.unwrap_or_else(|| body.status.clone()),
            ));
        }
        non_empty(body.country_code)
    }
}

#[derive(Debug, Deserialize)]
struct IpStackError {
    info: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpStackResponse {
    country_code: Option<String>,
    error: Option<IpStackError>,
}

/// Lookups against the ipstack API, authenticated by an access key.
#[derive(Clone)]
pub struct IpStack {
    client: Client,
    base_url: String,
    access_key: String,
}

impl IpStack {
    pub fn new(client: Client, access_key: impl Into<String>) -> Self {
        Self::with_base_url(client, IPSTACK_URL, access_key)
    }

    pub fn with_base_url(
        client: Client,
        base_url: impl Into<String>,
        access_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_key: access_key.into(),
        }
    }

    async fn country(&self, ip: IpAddr) -> Result<String, GeolocationError> {
        let url = format!("{}/{}", self.base_url, ip);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("fields", "country_code"),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeolocationError::Status(response.status()));
        }

        // ipstack reports failures with a 200 and an `error` object.
        let body: IpStackResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(GeolocationError::Lookup(
                error
                    .info
                    .or(error.kind)
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        non_empty(body.country_code)
    }
}

// The access key must not end up in logs.
impl std::fmt::Debug for IpStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpStack")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn non_empty(country: Option<String>) -> Result<String, GeolocationError> {
    match country {
        Some(country) if !country.trim().is_empty() => Ok(country),
        _ => Err(GeolocationError::EmptyCountry),
    }
}

/// A geolocation lookup service.
#[derive(Debug, Clone)]
pub enum GeolocationBackend {
    IpApi(IpApi),
    IpStack(IpStack),
}

impl GeolocationBackend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IpApi(_) => "ip-api",
            Self::IpStack(_) => "ipstack",
        }
    }

    /// Resolves the ISO 3166-1 alpha-2 country code of `ip`.
    pub async fn country(&self, ip: IpAddr) -> Result<String, GeolocationError> {
        debug!("Looking up {} with {}", ip, self.name());
        match self {
            Self::IpApi(backend) => backend.country(ip).await,
            Self::IpStack(backend) => backend.country(ip).await,
        }
    }
}
