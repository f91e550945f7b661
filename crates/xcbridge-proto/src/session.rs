//! Local/remote session id translation
//!
//! The agent assigns its own session id on `POST /session`. Callers keep using
//! a stable local id; outbound paths are rewritten to the agent's id and
//! inbound bodies are rewritten back.

use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use uuid::Uuid;

/// Body field carrying the session id
pub const SESSION_ID_FIELD: &str = "sessionId";

/// Matches the `/<url_base>/session/<id>` prefix of a request path
#[derive(Debug, Clone)]
pub struct SessionScope {
    pattern: Regex,
}

impl SessionScope {
    /// Build the scope for a url base such as `wd/hub` (empty means `/session/<id>`)
    pub fn new(url_base: &str) -> Self {
        let base = url_base.trim_matches('/');
        let prefix = if base.is_empty() {
            String::new()
        } else {
            format!("/{}", regex::escape(base))
        };
        let pattern = Regex::new(&format!(r"^{}/session/([^/?#]+)", prefix))
            .expect("escaped url base always forms a valid pattern");
        Self { pattern }
    }
    
    /// Session id segment of `path`, if the path lives under the url base
    pub fn session_id<'a>(&self, path: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(path)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
    
    /// Replace the session segment with `to` when it currently equals `from`
    pub fn replace_id<'a>(&self, path: &'a str, from: &str, to: &str) -> Cow<'a, str> {
        match self.pattern.captures(path).and_then(|caps| caps.get(1)) {
            Some(m) if m.as_str() == from => {
                Cow::Owned(format!("{}{}{}", &path[..m.start()], to, &path[m.end()..]))
            }
            _ => Cow::Borrowed(path),
        }
    }
}

/// What [`SessionIds::rewrite_inbound`] did to a response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capture {
    /// No session id field present
    Untouched,
    /// First session id seen; recorded as the remote id
    Captured {
        /// Id the agent assigned
        remote: String,
        /// Id handed back to the caller
        local: String,
    },
    /// The known remote id was replaced with the local id
    Rewritten,
    /// A session id that is not ours; left as is
    Foreign(String),
}

/// Caller-facing and agent-facing session ids for one proxied session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionIds {
    local: Option<String>,
    remote: Option<String>,
}

impl SessionIds {
    /// No ids known yet
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Use a caller-supplied local id instead of generating one
    pub fn with_local(local: impl Into<String>) -> Self {
        Self {
            local: Some(local.into()),
            remote: None,
        }
    }
    
    /// Caller-facing id
    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }
    
    /// Agent-facing id
    pub fn remote(&self) -> Option<&str> {
        self.remote.as_deref()
    }
    
    /// True once the agent's id has been captured
    pub fn is_established(&self) -> bool {
        self.remote.is_some()
    }
    
    /// Drop the agent's id, keeping the caller-facing one
    pub fn forget_remote(&mut self) {
        self.remote = None;
    }
    
    /// Rewrite the caller's session segment in `path` to the agent's id
    pub fn rewrite_outbound<'a>(&self, scope: &SessionScope, path: &'a str) -> Cow<'a, str> {
        match (&self.local, &self.remote) {
            (Some(local), Some(remote)) => scope.replace_id(path, local, remote),
            _ => Cow::Borrowed(path),
        }
    }
    
    /// Capture the agent's id on first sight and rewrite it to the local id
    pub fn rewrite_inbound(&mut self, body: &mut Value) -> Capture {
        let mut outcome = Capture::Untouched;
        
        for slot in session_id_slots(body) {
            let Some(found) = slot.as_str().map(str::to_string) else {
                continue;
            };
            
            if self.remote.is_none() {
                let local = self
                    .local
                    .get_or_insert_with(|| Uuid::new_v4().to_string())
                    .clone();
                self.remote = Some(found.clone());
                outcome = Capture::Captured {
                    remote: found.clone(),
                    local,
                };
            }
            
            if self.remote.as_deref() == Some(found.as_str()) {
                if let Some(local) = &self.local {
                    *slot = Value::String(local.clone());
                }
                if outcome == Capture::Untouched {
                    outcome = Capture::Rewritten;
                }
            } else if outcome == Capture::Untouched {
                outcome = Capture::Foreign(found);
            }
        }
        
        outcome
    }
}

/// Top-level `sessionId` and the W3C `value.sessionId`
fn session_id_slots(body: &mut Value) -> Vec<&mut Value> {
    let mut slots = Vec::new();
    if let Value::Object(map) = body {
        for (key, value) in map.iter_mut() {
            if key == SESSION_ID_FIELD {
                slots.push(value);
            } else if key == "value" {
                if let Some(inner) = value.get_mut(SESSION_ID_FIELD) {
                    slots.push(inner);
                }
            }
        }
    }
    slots
}
