//! Client configuration loaded from the environment

use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:8000";
const DEFAULT_PAGE_SIZE: u32 = 20;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL in {var}: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("Unsupported URL scheme in {var}: {scheme}")]
    UnsupportedScheme { var: &'static str, scheme: String },
    #[error("Invalid number in {var}: {value}")]
    InvalidNumber { var: &'static str, value: String },
}

/// Log output format for the binary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Settings for the REST collaborator and the push channel
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: Url,
    pub ws_base_url: Url,
    /// Bearer token attached to REST calls
    pub token: Option<String>,
    pub page_size: u32,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_raw = lookup("THREADVIEW_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_base_url = parse_url("THREADVIEW_API_URL", &api_raw)?;

        let ws_base_url = match lookup("THREADVIEW_WS_URL") {
            Some(raw) => parse_url("THREADVIEW_WS_URL", &raw)?,
            None => derive_ws_url(&api_base_url)?,
        };

        let page_size = match lookup("THREADVIEW_PAGE_SIZE") {
            Some(raw) => parse_number("THREADVIEW_PAGE_SIZE", &raw)?,
            None => DEFAULT_PAGE_SIZE,
        };

        let timeout_secs = match lookup("THREADVIEW_REQUEST_TIMEOUT_SECS") {
            Some(raw) => parse_number("THREADVIEW_REQUEST_TIMEOUT_SECS", &raw)?,
            None => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let log_format = match lookup("THREADVIEW_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            api_base_url,
            ws_base_url,
            token: lookup("THREADVIEW_TOKEN").filter(|t| !t.is_empty()),
            page_size,
            request_timeout: Duration::from_secs(timeout_secs),
            log_format,
        })
    }
}

fn parse_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { var, source })
}

fn parse_number<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: raw.to_string(),
    })
}

/// `http` → `ws`, `https` → `wss`, everything else about the URL kept
fn derive_ws_url(api: &Url) -> Result<Url, ConfigError> {
    let scheme = match api.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(ConfigError::UnsupportedScheme {
                var: "THREADVIEW_API_URL",
                scheme: other.to_string(),
            })
        }
    };
    let mut ws = api.clone();
    ws.set_scheme(scheme)
        .map_err(|()| ConfigError::UnsupportedScheme {
            var: "THREADVIEW_API_URL",
            scheme: api.scheme().to_string(),
        })?;
    Ok(ws)
}
