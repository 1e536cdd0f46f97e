use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

const ALREADY_PRESENT_MARKER: &str = "已存在";

/// Vendor proxy-service endpoints and credentials.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSettings {
    pub whitelist_url: String,
    pub proxy_url: String,
    pub uid: String,
    pub ukey: String,
    /// Scheme used when turning an issued `{address, port}` into a proxy URL.
    pub proxy_scheme: String,
    /// Plan-specific query parameters appended to the proxy request.
    pub proxy_params: BTreeMap<String, String>,
    pub request_timeout_secs: u64,
}

impl Default for ControlPlaneSettings {
    fn default() -> Self {
        let proxy_params = [
            ("time", "30"),
            ("plat", "0"),
            ("re", "1"),
            ("type", "0"),
            ("so", "1"),
            ("ow", "1"),
            ("spl", "1"),
            ("addr", ""),
            ("db", "1"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            whitelist_url: "http://op.xiequ.cn/IpWhiteList.aspx".to_string(),
            proxy_url: "http://api.xiequ.cn/VAD/GetIp.aspx".to_string(),
            uid: String::new(),
            ukey: String::new(),
            proxy_scheme: "http".to_string(),
            proxy_params,
            request_timeout_secs: 10,
        }
    }
}

impl fmt::Debug for ControlPlaneSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlPlaneSettings")
            .field("whitelist_url", &self.whitelist_url)
            .field("proxy_url", &self.proxy_url)
            .field("uid", &self.uid)
            .field("ukey", &"<redacted>")
            .field("proxy_scheme", &self.proxy_scheme)
            .field("proxy_params", &self.proxy_params)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl ControlPlaneSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Unusable vendor configuration is reported up front instead of
    /// surfacing later as a string of failed rotations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.uid.trim().is_empty() || self.ukey.trim().is_empty() {
            return Err(ConfigError::ControlPlane(
                "vendor uid and key must both be set".to_string(),
            ));
        }
        for (name, raw) in [
            ("whitelist_url", &self.whitelist_url),
            ("proxy_url", &self.proxy_url),
        ] {
            let parsed = url::Url::parse(raw)
                .map_err(|err| ConfigError::ControlPlane(format!("{name} {raw:?}: {err}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::ControlPlane(format!(
                    "{name} must be http(s), got {raw:?}"
                )));
            }
        }
        if !matches!(self.proxy_scheme.as_str(), "http" | "https" | "socks5") {
            return Err(ConfigError::ControlPlane(format!(
                "unsupported proxy scheme {:?}",
                self.proxy_scheme
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "control_plane.request_timeout_secs",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// One proxy issued by the vendor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPlaneError {
    pub kind: ControlPlaneFailure,
    pub message: String,
}

impl ControlPlaneError {
    pub fn new(kind: ControlPlaneFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The vendor refused the caller outright, or the egress address can
    /// never be allow-listed; retrying cannot help.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self.kind,
            ControlPlaneFailure::Rejected
                | ControlPlaneFailure::HttpStatus(401 | 403)
                | ControlPlaneFailure::UnroutableAddress
        )
    }
}

impl fmt::Display for ControlPlaneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ControlPlaneError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneFailure {
    Network,
    Timeout,
    HttpStatus(u16),
    /// Explicit denial in the response body.
    Rejected,
    /// Non-zero status code from the proxy endpoint.
    Refused { code: i64 },
    Malformed,
    NoProxyAvailable,
    UnroutableAddress,
}

impl fmt::Display for ControlPlaneFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlPlaneFailure::Network => write!(f, "network error"),
            ControlPlaneFailure::Timeout => write!(f, "timeout"),
            ControlPlaneFailure::HttpStatus(code) => write!(f, "http status {code}"),
            ControlPlaneFailure::Rejected => write!(f, "rejected"),
            ControlPlaneFailure::Refused { code } => write!(f, "refused with code {code}"),
            ControlPlaneFailure::Malformed => write!(f, "malformed response"),
            ControlPlaneFailure::NoProxyAvailable => write!(f, "no proxy available"),
            ControlPlaneFailure::UnroutableAddress => write!(f, "unroutable address"),
        }
    }
}

/// The vendor's allow-list and proxy issuance API.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Registers `address`. An address that is already present counts as
    /// registered.
    async fn add_whitelist(&self, address: IpAddr) -> Result<(), ControlPlaneError>;

    async fn del_whitelist(&self, address: IpAddr) -> Result<(), ControlPlaneError>;

    async fn get_proxy(&self, count: usize) -> Result<Vec<ProxyEndpoint>, ControlPlaneError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestControlPlane {
    settings: ControlPlaneSettings,
    client: reqwest::Client,
}

impl ReqwestControlPlane {
    pub fn new(settings: ControlPlaneSettings) -> Result<Self, ControlPlaneError> {
        // Vendor calls must leave from the real egress address.
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|err| ControlPlaneError::new(ControlPlaneFailure::Network, err.to_string()))?;
        Ok(Self { settings, client })
    }

    async fn get_text(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<String, ControlPlaneError> {
        let mut target = reqwest::Url::parse(url).map_err(|err| {
            ControlPlaneError::new(ControlPlaneFailure::Malformed, err.to_string())
        })?;
        target.query_pairs_mut().extend_pairs(query.iter().copied());

        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlPlaneError::new(
                ControlPlaneFailure::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }
        response.text().await.map_err(map_reqwest_error)
    }
}

#[async_trait::async_trait]
impl ControlPlane for ReqwestControlPlane {
    async fn add_whitelist(&self, address: IpAddr) -> Result<(), ControlPlaneError> {
        let ip = address.to_string();
        let body = self
            .get_text(
                &self.settings.whitelist_url,
                &[
                    ("uid", self.settings.uid.as_str()),
                    ("ukey", self.settings.ukey.as_str()),
                    ("act", "add"),
                    ("ip", ip.as_str()),
                    ("meno", "1"),
                ],
            )
            .await?;

        if is_whitelist_ack(&body) {
            Ok(())
        } else {
            Err(ControlPlaneError::new(
                ControlPlaneFailure::Rejected,
                body.trim().to_string(),
            ))
        }
    }

    async fn del_whitelist(&self, address: IpAddr) -> Result<(), ControlPlaneError> {
        let ip = address.to_string();
        self.get_text(
            &self.settings.whitelist_url,
            &[
                ("uid", self.settings.uid.as_str()),
                ("ukey", self.settings.ukey.as_str()),
                ("act", "del"),
                ("ip", ip.as_str()),
            ],
        )
        .await
        .map(|_| ())
    }

    async fn get_proxy(&self, count: usize) -> Result<Vec<ProxyEndpoint>, ControlPlaneError> {
        let num = count.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("act", "get"),
            ("uid", self.settings.uid.as_str()),
            ("vkey", self.settings.ukey.as_str()),
            ("num", num.as_str()),
        ];
        query.extend(
            self.settings
                .proxy_params
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );

        let body = self.get_text(&self.settings.proxy_url, &query).await?;
        parse_proxy_response(&body, &self.settings.proxy_scheme)
    }
}

fn is_whitelist_ack(body: &str) -> bool {
    body.to_ascii_lowercase().contains("success") || body.contains(ALREADY_PRESENT_MARKER)
}

#[derive(Debug, Deserialize)]
struct ProxyResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<RawProxy>,
}

#[derive(Debug, Deserialize)]
struct RawProxy {
    #[serde(rename = "IP")]
    ip: String,
    #[serde(rename = "Port")]
    port: PortField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u16),
    Text(String),
}

impl PortField {
    fn value(&self) -> Option<u16> {
        match self {
            PortField::Number(port) => Some(*port),
            PortField::Text(text) => text.trim().parse().ok(),
        }
    }
}

fn parse_proxy_response(body: &str, scheme: &str) -> Result<Vec<ProxyEndpoint>, ControlPlaneError> {
    let response: ProxyResponse = serde_json::from_str(body)
        .map_err(|err| ControlPlaneError::new(ControlPlaneFailure::Malformed, err.to_string()))?;

    if response.code != 0 {
        return Err(ControlPlaneError::new(
            ControlPlaneFailure::Refused {
                code: response.code,
            },
            response.msg.unwrap_or_default(),
        ));
    }

    let proxies = response
        .data
        .iter()
        .map(|raw| {
            let port = raw.port.value().ok_or_else(|| {
                ControlPlaneError::new(
                    ControlPlaneFailure::Malformed,
                    format!("bad port for proxy {}", raw.ip),
                )
            })?;
            Ok(ProxyEndpoint {
                scheme: scheme.to_string(),
                host: raw.ip.trim().to_string(),
                port,
            })
        })
        .collect::<Result<Vec<_>, ControlPlaneError>>()?;

    if proxies.is_empty() {
        return Err(ControlPlaneError::new(
            ControlPlaneFailure::NoProxyAvailable,
            response.msg.unwrap_or_default(),
        ));
    }
    Ok(proxies)
}

pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ControlPlaneError {
    if err.is_timeout() {
        return ControlPlaneError::new(ControlPlaneFailure::Timeout, err.to_string());
    }
    ControlPlaneError::new(ControlPlaneFailure::Network, err.to_string())
}
