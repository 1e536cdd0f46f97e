use std::net::IpAddr;
use std::time::Duration;

use engine_logging::engine_warn;
use serde::{Deserialize, Serialize};

use crate::control_plane::{map_reqwest_error, ControlPlaneError, ControlPlaneFailure};

/// "What is my address" services, tried in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressLookupSettings {
    pub urls: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for AddressLookupSettings {
    fn default() -> Self {
        Self {
            urls: vec![
                "http://ifconfig.me/ip".to_string(),
                "http://api.ipify.org".to_string(),
            ],
            request_timeout_secs: 5,
        }
    }
}

/// Resolves the caller's true egress address.
#[async_trait::async_trait]
pub trait AddressLookup: Send + Sync {
    async fn public_address(&self) -> Result<IpAddr, ControlPlaneError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestAddressLookup {
    urls: Vec<String>,
    client: reqwest::Client,
}

impl ReqwestAddressLookup {
    pub fn new(settings: &AddressLookupSettings) -> Result<Self, ControlPlaneError> {
        // Never through the lease's proxy, nor any proxy from the environment.
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|err| ControlPlaneError::new(ControlPlaneFailure::Network, err.to_string()))?;
        Ok(Self {
            urls: settings.urls.clone(),
            client,
        })
    }

    async fn lookup(&self, url: &str) -> Result<IpAddr, ControlPlaneError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        // Not the vendor: a refusal here says nothing about our credentials.
        if !status.is_success() {
            return Err(ControlPlaneError::new(
                ControlPlaneFailure::Network,
                format!("{url} answered {status}"),
            ));
        }
        let text = response.text().await.map_err(map_reqwest_error)?;
        text.trim().parse::<IpAddr>().map_err(|err| {
            ControlPlaneError::new(
                ControlPlaneFailure::Malformed,
                format!("{url} returned {:?}: {err}", text.trim()),
            )
        })
    }
}

#[async_trait::async_trait]
impl AddressLookup for ReqwestAddressLookup {
    async fn public_address(&self) -> Result<IpAddr, ControlPlaneError> {
        let mut last_error = ControlPlaneError::new(
            ControlPlaneFailure::Network,
            "no address lookup urls configured",
        );
        for url in &self.urls {
            match self.lookup(url).await {
                Ok(address) => return Ok(address),
                Err(err) => {
                    engine_warn!("Address lookup via {} failed: {}", url, err);
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}
