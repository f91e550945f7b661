//! Session-rewriting request proxy
//!
//! Callers address the session by a local id that stays stable for the
//! lifetime of the proxy. The agent assigns its own id on `POST /session`;
//! the proxy captures it from the first response that carries one and
//! translates between the two from then on.

use crate::{Result, XcBridgeError};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use xcbridge_proto::endpoint::DEFAULT_URL_BASE;
use xcbridge_proto::payload::{normalize_method, request_body, truncate, LOG_BODY_LIMIT};
use xcbridge_proto::{Capture, Endpoint, Payload, SessionIds, SessionScope, CONTENT_TYPE};

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Path prefix in front of `/session/<id>`
    pub url_base: String,
    /// Timeout for each forwarded request
    pub request_timeout: Duration,
    /// Caller-facing session id; generated on first capture when `None`
    pub local_session_id: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            url_base: DEFAULT_URL_BASE.to_string(),
            request_timeout: Duration::from_secs(240),
            local_session_id: None,
        }
    }
}

/// Forwards commands to the agent, translating session ids both ways
pub struct SessionProxy {
    client: reqwest::Client,
    endpoint: Option<Endpoint>,
    scope: SessionScope,
    ids: SessionIds,
}

impl SessionProxy {
    /// Create an unconfigured proxy
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        
        let ids = match config.local_session_id {
            Some(local) => SessionIds::with_local(local),
            None => SessionIds::new(),
        };
        
        Ok(Self {
            client,
            endpoint: None,
            scope: SessionScope::new(&config.url_base),
            ids,
        })
    }
    
    /// Point the proxy at an agent.
    ///
    /// Reconfiguring keeps the local session id; the agent's id is forgotten
    /// and captured again from the next session response.
    pub fn configure(&mut self, endpoint: Endpoint) {
        match &self.endpoint {
            Some(previous) => {
                info!("Proxy moving from {} to {}", previous, endpoint);
                self.ids.forget_remote();
            }
            None => info!("Proxy forwarding to {}", endpoint),
        }
        
        self.scope = SessionScope::new(&endpoint.url_base);
        self.endpoint = Some(endpoint);
    }
    
    /// Drop the agent endpoint and the agent's session id.
    ///
    /// The local session id is kept. `send` fails with `NotConfigured` until
    /// the proxy is configured again.
    pub fn reset(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            info!("Proxy detached from {}", endpoint);
        }
        self.ids.forget_remote();
    }
    
    /// Configured agent endpoint
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }
    
    /// Caller-facing session id
    pub fn local_session_id(&self) -> Option<&str> {
        self.ids.local()
    }
    
    /// Agent-assigned session id
    pub fn remote_session_id(&self) -> Option<&str> {
        self.ids.remote()
    }
    
    /// Forward one command and return the agent's (rewritten) response body.
    ///
    /// Error statuses from the agent are not errors here; WebDriver reports
    /// failures in the body and the caller gets it unchanged apart from the
    /// session id.
    pub async fn send(&mut self, path: &str, method: &str, body: Option<Payload>) -> Result<Value> {
        let endpoint = self.endpoint.as_ref().ok_or(XcBridgeError::NotConfigured)?;
        let method = normalize_method(method);
        let body = request_body(&method, body)?;
        
        let url = endpoint.target_url(&self.ids.rewrite_outbound(&self.scope, path));
        debug!("Proxying {} {} as {}", method, path, url);
        
        let http_method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| XcBridgeError::Protocol(format!("Invalid HTTP method: {}", method)))?;
        let mut request = self.client.request(http_method, &url);
        
        if let Some(body) = body {
            let text = body.to_string();
            debug!("Request body: {}", truncate(&text, LOG_BODY_LIMIT));
            request = request
                .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
                .body(text);
        }
        
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!("Response {} from {}: {}", status, url, truncate(&text, LOG_BODY_LIMIT));
        
        let mut value = parse_response(&text);
        match self.ids.rewrite_inbound(&mut value) {
            Capture::Captured { remote, local } => {
                info!("Agent session {} mapped to local session {}", remote, local);
            }
            Capture::Foreign(other) => {
                warn!("Response carries unknown session {}; left unchanged", other);
            }
            Capture::Rewritten | Capture::Untouched => {}
        }
        
        Ok(value)
    }
}

/// Empty bodies become `null`, non-JSON bodies a JSON string
fn parse_response(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
