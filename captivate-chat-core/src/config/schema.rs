//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration for captivate-chat
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Chat service client configuration
    #[serde(default)]
    pub client: ClientConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Which remote deployment a session talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointMode {
    #[default]
    Production,
    Development,
}

impl EndpointMode {
    /// Select the endpoint base URL for this mode
    pub fn base_url<'a>(&self, endpoints: &'a EndpointsConfig) -> &'a str {
        match self {
            EndpointMode::Production => &endpoints.production,
            EndpointMode::Development => &endpoints.development,
        }
    }
}

impl fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointMode::Production => write!(f, "production"),
            EndpointMode::Development => write!(f, "development"),
        }
    }
}

impl FromStr for EndpointMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Ok(EndpointMode::Production),
            "dev" | "development" => Ok(EndpointMode::Development),
            other => Err(crate::Error::Config(format!(
                "unknown endpoint mode '{}', expected production or development",
                other
            ))),
        }
    }
}

// Parsed through `FromStr` so config files, env vars and flags accept the same spellings.
impl<'de> Deserialize<'de> for EndpointMode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Endpoint base URLs per mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_production_endpoint")]
    pub production: String,
    #[serde(default = "default_development_endpoint")]
    pub development: String,
}

fn default_production_endpoint() -> String {
    "wss://channel.wss.captivatechat.ai".to_string()
}

fn default_development_endpoint() -> String {
    "wss://channel-dev.wss.captivatechat.ai".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            production: default_production_endpoint(),
            development: default_development_endpoint(),
        }
    }
}

/// Chat service client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API key embedded in the connection URL
    #[serde(default)]
    pub api_key: String,
    /// Production or development deployment
    #[serde(default)]
    pub mode: EndpointMode,
    /// Endpoint base URLs
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    /// Seconds to wait for the handshake after opening the connection
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Seconds to wait for the reply to a request (conversation start, transcript)
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            mode: EndpointMode::default(),
            endpoints: EndpointsConfig::default(),
            connect_timeout_secs: default_timeout_secs(),
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientConfig {
    /// Connection URL for the configured mode and API key
    pub fn endpoint_url(&self) -> String {
        endpoint_url(self.mode.base_url(&self.endpoints), &self.api_key)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Build the connection URL: `<base>/dev?apiKey=<api_key>`.
///
/// The key is embedded verbatim.
pub fn endpoint_url(base: &str, api_key: &str) -> String {
    format!("{}/dev?apiKey={}", base.trim_end_matches('/'), api_key)
}
