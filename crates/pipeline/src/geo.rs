//! Client geolocation.
//!
//! [`GeoResolver`] calls an ip-api compatible HTTP service using [`reqwest`].
//! Lookups never fail the caller: any transport error, timeout, or
//! non-success response yields the degraded placeholder record.

use std::net::IpAddr;

use async_trait::async_trait;
use chrono::Utc;
use replay_core::config::GeoConfig;
use replay_core::geo::{is_local_address, parse_public_ip, IpApiResponse};
use replay_core::types::GeoRecord;

/// Resolves a client IP to a [`GeoRecord`].
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Always returns a record; failures produce a degraded one.
    async fn resolve(&self, client_ip: Option<&str>) -> GeoRecord;
}

/// Errors from a single lookup attempt. Only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum GeoLookupError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("geolocation API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

/// HTTP-backed resolver.
pub struct GeoResolver {
    client: reqwest::Client,
    config: GeoConfig,
}

impl GeoResolver {
    /// Build a resolver whose lookups are bounded by `config.timeout()`.
    pub fn new(config: GeoConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client, config })
    }

    /// Ask the configured "what is my IP" services, in order, for this
    /// host's public address. The first syntactically valid public IP wins.
    pub async fn discover_public_ip(&self) -> Option<IpAddr> {
        for service in &self.config.public_ip_services {
            let response = self
                .client
                .get(service)
                .timeout(self.config.public_ip_timeout())
                .send()
                .await;

            let body = match response {
                Ok(r) if r.status().is_success() => r.text().await.ok(),
                Ok(r) => {
                    tracing::debug!(service = %service, status = r.status().as_u16(), "Public IP service refused");
                    None
                }
                Err(e) => {
                    tracing::debug!(service = %service, error = %e, "Public IP service unreachable");
                    None
                }
            };

            if let Some(ip) = body.as_deref().and_then(parse_public_ip) {
                tracing::debug!(service = %service, %ip, "Discovered public IP");
                return Some(ip);
            }
        }
        None
    }

    /// The address to look up for `client_ip`. Anything that is not a
    /// routable client IP (loopback, unspecified, or not an IP at all) is
    /// replaced by the discovered public IP, or the development fallback.
    async fn lookup_target(&self, client_ip: Option<&str>) -> String {
        let parsed = client_ip.and_then(|raw| raw.trim().parse::<IpAddr>().ok());
        match parsed {
            Some(ip) if !ip.is_loopback() && !ip.is_unspecified() => ip.to_string(),
            _ => {
                if let Some(raw) = client_ip.filter(|raw| !is_local_address(raw)) {
                    tracing::debug!(client_ip = %raw, "Client address is not an IP, discovering");
                }
                match self.discover_public_ip().await {
                    Some(ip) => ip.to_string(),
                    None => {
                        tracing::debug!(
                            fallback = %self.config.dev_fallback_ip,
                            "Public IP discovery failed, using fallback"
                        );
                        self.config.dev_fallback_ip.clone()
                    }
                }
            }
        }
    }

    /// `GET {base}/json/{ip}`
    async fn lookup(&self, ip: &str) -> Result<IpApiResponse, GeoLookupError> {
        let response = self
            .client
            .get(format!("{}/json/{ip}", self.config.api_base_url))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeoLookupError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<IpApiResponse>().await?)
    }
}

#[async_trait]
impl GeoLookup for GeoResolver {
    async fn resolve(&self, client_ip: Option<&str>) -> GeoRecord {
        let ip = self.lookup_target(client_ip).await;
        let fetched_at = Utc::now();

        let record = match self.lookup(&ip).await {
            Ok(body) => body.into_record(&ip, fetched_at),
            Err(e) => GeoRecord::degraded(&ip, e.to_string(), fetched_at),
        };
        if let Some(reason) = &record.error {
            tracing::warn!(%ip, reason = %reason, "Geolocation degraded");
        }
        record
    }
}

/// Resolver used when lookups are disabled; always degraded.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineGeoResolver;

#[async_trait]
impl GeoLookup for OfflineGeoResolver {
    async fn resolve(&self, client_ip: Option<&str>) -> GeoRecord {
        GeoRecord::degraded(
            client_ip.unwrap_or("unknown"),
            "geolocation disabled",
            Utc::now(),
        )
    }
}
