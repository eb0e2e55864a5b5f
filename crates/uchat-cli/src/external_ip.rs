//! External address lookup
//!
//! Peers outside the local network reach us through the router's public
//! address. A plain-text lookup service is asked first; a JSON service
//! answering `{"ip": "..."}` is the fallback.

use std::net::Ipv4Addr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::CliConfig;
use crate::error::{CliError, Result};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct IpResponse {
    ip: String,
}

/// Client for the configured lookup services
#[derive(Debug, Clone)]
pub struct IpLookup {
    client: reqwest::Client,
    primary_url: String,
    fallback_url: String,
}

impl IpLookup {
    pub fn new(primary_url: impl Into<String>, fallback_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, primary_url, fallback_url))
    }

    pub fn with_client(
        client: reqwest::Client,
        primary_url: impl Into<String>,
        fallback_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            primary_url: primary_url.into(),
            fallback_url: fallback_url.into(),
        }
    }

    pub fn from_config(config: &CliConfig) -> Result<Self> {
        Self::new(&config.ip_lookup_url, &config.ip_lookup_fallback_url)
    }

    /// Public IPv4 address of this host
    pub async fn external_ip(&self) -> Result<Ipv4Addr> {
        match self.lookup_text().await {
            Ok(ip) => Ok(ip),
            Err(err) => {
                warn!("Lookup via {} failed: {}", self.primary_url, err);
                self.lookup_json().await
            }
        }
    }

    async fn lookup_text(&self) -> Result<Ipv4Addr> {
        let body = self
            .client
            .get(&self.primary_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_ip(&body)
    }

    async fn lookup_json(&self) -> Result<Ipv4Addr> {
        let response: IpResponse = self
            .client
            .get(&self.fallback_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_ip(&response.ip)
    }
}

fn parse_ip(text: &str) -> Result<Ipv4Addr> {
    let text = text.trim();
    debug!("Lookup service answered {:?}", text);
    text.parse()
        .map_err(|_| CliError::Lookup(format!("not an IPv4 address: {:?}", text)))
}
