//! Client configuration: where the Admin API lives and how long to wait for it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// URL scheme used for both the Admin API and the imposters it creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    /// Parse a scheme from the leading part of a URL
    pub fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            _ => Err(Error::Config(format!("unsupported scheme: {scheme}"))),
        }
    }
}

/// Liveness probe retry budget
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval_ms: 1000,
        }
    }
}

impl WaitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Location of the Admin API.
///
/// Imposters are reached on the same scheme and host, on the port the server
/// assigns to them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub wait: WaitConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scheme: Scheme::Http,
            host: "mountebank".to_string(),
            port: 2525,
            wait: WaitConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn wait(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.wait = WaitConfig {
            max_attempts,
            interval_ms: u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        };
        self
    }

    /// Build a config from an Admin API URL such as `http://localhost:2525`.
    pub fn from_admin_url(url: &str) -> Result<Self> {
        let url_parts: Vec<&str> = url.splitn(2, "://").collect();
        if url_parts.len() != 2 {
            return Err(Error::Config(format!(
                "invalid URL format (missing scheme): {url}"
            )));
        }
        let scheme = Scheme::from_scheme(url_parts[0])?;

        let authority = url_parts[1].trim_end_matches('/');
        if authority.contains('/') {
            return Err(Error::Config(format!(
                "admin URL must not contain a path: {url}"
            )));
        }

        // Bracketed IPv6 hosts contain colons of their own
        let (host, port) = match authority.strip_prefix('[') {
            Some(rest) => {
                let (addr, tail) = rest.split_once(']').ok_or_else(|| {
                    Error::Config(format!("unterminated IPv6 address in {url}"))
                })?;
                let port = match tail {
                    "" => None,
                    tail => Some(tail.strip_prefix(':').ok_or_else(|| {
                        Error::Config(format!("invalid authority in {url}"))
                    })?),
                };
                (format!("[{addr}]"), port)
            }
            None => match authority.rsplit_once(':') {
                Some((host, port)) => (host.to_string(), Some(port)),
                None => (authority.to_string(), None),
            },
        };
        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|e| Error::Config(format!("invalid port in {url}: {e}")))?,
            None => 2525,
        };

        let config = Self {
            scheme,
            host,
            port,
            wait: WaitConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a YAML (or JSON) file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: ClientConfig = serde_yaml::from_str(&contents)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("admin port must not be 0".to_string()));
        }
        Ok(())
    }

    /// Base URL of the Admin API, without a trailing slash
    pub fn admin_url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// URL an imposter listening on `port` is reachable at
    pub fn imposter_url(&self, port: u16) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, port)
    }
}
