use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use harvester_core::{classify_response, Outcome};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::control_plane::ProxyEndpoint;
use crate::lease::NetworkIdentity;
use crate::ConfigError;

/// Queries the target API for one key through the active identity.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    async fn query(&self, key: &str, identity: &NetworkIdentity) -> Outcome;
}

/// Target-API request shape.
///
/// `url_template` may contain `{key}` (URL-encoded) and `{timestamp_ms}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub url_template: String,
    /// JSON pointer to the payload inside a successful response.
    pub result_pointer: String,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for TargetSettings {
    fn default() -> Self {
        let headers = [
            ("accept", "application/json, text/plain, */*"),
            ("origin", "https://shop.m.jd.com/"),
            ("referer", "https://shop.m.jd.com/"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            url_template: "https://api.m.jd.com/client.action?functionId=whx_getMShopOutlineInfo&body=%7B%22venderId%22%3A%22{key}%22%2C%22source%22%3A%22m-shop%22%7D&t={timestamp_ms}&appid=shop_view".to_string(),
            result_pointer: "/data/shopInfo".to_string(),
            user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1".to_string(),
            headers,
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
        }
    }
}

impl TargetSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.url_template.contains("{key}") {
            return Err(ConfigError::invalid(
                "target.url_template",
                "must contain a {key} placeholder",
            ));
        }
        reqwest::Url::parse(&self.render_url("probe", 0))
            .map_err(|err| ConfigError::invalid("target.url_template", err.to_string()))?;
        if !self.result_pointer.is_empty() && !self.result_pointer.starts_with('/') {
            return Err(ConfigError::invalid(
                "target.result_pointer",
                "must be empty or start with '/'",
            ));
        }
        self.header_map()?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "target.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn render_url(&self, key: &str, timestamp_ms: u128) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
        self.url_template
            .replace("{key}", &encoded)
            .replace("{timestamp_ms}", &timestamp_ms.to_string())
    }

    fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ConfigError::invalid("target.headers", err.to_string()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|err| ConfigError::invalid("target.headers", err.to_string()))?;
            headers.insert(name, value);
        }
        if !self.user_agent.is_empty() {
            let agent = HeaderValue::from_str(&self.user_agent)
                .map_err(|err| ConfigError::invalid("target.user_agent", err.to_string()))?;
            headers.insert(USER_AGENT, agent);
        }
        Ok(headers)
    }
}

/// HTTP JSON worker that sends every request through the lease's proxy.
pub struct HttpWorker {
    settings: TargetSettings,
    headers: HeaderMap,
    // One client per proxy; replaced on rotation.
    client: Mutex<Option<(ProxyEndpoint, reqwest::Client)>>,
}

impl HttpWorker {
    pub fn new(settings: TargetSettings) -> Result<Self, ConfigError> {
        let headers = settings.header_map()?;
        Ok(Self {
            settings,
            headers,
            client: Mutex::new(None),
        })
    }

    fn client_for(&self, proxy: &ProxyEndpoint) -> Result<reqwest::Client, String> {
        let mut cached = self
            .client
            .lock()
            .map_err(|_| "worker client cache poisoned".to_string())?;
        if let Some((endpoint, client)) = cached.as_ref() {
            if endpoint == proxy {
                return Ok(client.clone());
            }
        }

        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(proxy.url()).map_err(|err| err.to_string())?)
            .connect_timeout(Duration::from_secs(self.settings.connect_timeout_secs))
            .timeout(Duration::from_secs(self.settings.request_timeout_secs))
            .default_headers(self.headers.clone())
            .build()
            .map_err(|err| err.to_string())?;
        *cached = Some((proxy.clone(), client.clone()));
        Ok(client)
    }
}

#[async_trait::async_trait]
impl Worker for HttpWorker {
    async fn query(&self, key: &str, identity: &NetworkIdentity) -> Outcome {
        let client = match self.client_for(&identity.proxy) {
            Ok(client) => client,
            Err(message) => return Outcome::TransientError(message),
        };
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        let url = self.settings.render_url(key, timestamp_ms);

        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return Outcome::TransientError(format!("timeout: {err}"))
            }
            Err(err) => return Outcome::TransientError(format!("network error: {err}")),
        };
        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) => return Outcome::TransientError(format!("body read failed: {err}")),
        };
        classify_response(status, &body, &self.settings.result_pointer)
    }
}
