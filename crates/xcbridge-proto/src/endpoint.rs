//! Agent endpoint addressing

use crate::ProtocolError;
use std::fmt;
use url::Url;

/// Path prefix used by WebDriver clients when none is configured
pub const DEFAULT_URL_BASE: &str = "wd/hub";

/// Address and path prefix of a running automation agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// URL scheme, normally `http`
    pub scheme: String,
    /// Host the agent listens on
    pub host: String,
    /// Port the agent listens on
    pub port: u16,
    /// Path prefix callers put in front of `/session/<id>`, without slashes
    pub url_base: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8100,
            url_base: DEFAULT_URL_BASE.to_string(),
        }
    }
}

impl Endpoint {
    /// Create an endpoint with the default url base
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }
    
    /// Replace the url base; leading and trailing slashes are dropped
    pub fn with_url_base(mut self, url_base: &str) -> Self {
        self.url_base = url_base.trim_matches('/').to_string();
        self
    }
    
    /// Build an endpoint from a URL the agent printed in its log
    pub fn from_agent_url(raw: &str) -> Result<Self, ProtocolError> {
        let raw = raw.trim();
        let invalid = |reason: &str| ProtocolError::InvalidEndpoint {
            url: raw.to_string(),
            reason: reason.to_string(),
        };
        
        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        let host = url.host_str().ok_or_else(|| invalid("missing host"))?;
        let port = url.port_or_known_default().ok_or_else(|| invalid("missing port"))?;
        
        Ok(Self::new(url.scheme(), host, port))
    }
    
    /// `scheme://host:port`
    pub fn origin(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
    
    /// Absolute URL for a request path
    pub fn target_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.origin(), path)
        } else {
            format!("{}/{}", self.origin(), path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin())
    }
}
