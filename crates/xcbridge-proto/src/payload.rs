//! Request payload normalization

use crate::ProtocolError;
use serde_json::{Map, Value};
use std::borrow::Cow;

/// Content type sent with every JSON request body
pub const CONTENT_TYPE: &str = "application/json; charset=UTF-8";

/// Maximum number of characters of a body that ends up in the log
pub const LOG_BODY_LIMIT: usize = 200;

/// Body of a proxied command, either already structured or raw JSON text
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Structured JSON
    Json(Value),
    /// JSON text still to be parsed
    Text(String),
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl Payload {
    /// Parse if needed and require a JSON object
    pub fn into_object(self) -> Result<Value, ProtocolError> {
        let value = match self {
            Self::Json(value) => value,
            Self::Text(text) if text.trim().is_empty() => Value::Object(Map::new()),
            Self::Text(text) => serde_json::from_str(&text)?,
        };
        
        if value.is_object() {
            Ok(value)
        } else {
            Err(ProtocolError::MalformedBody(format!(
                "expected a JSON object, got {}",
                json_kind(&value)
            )))
        }
    }
}

/// Uppercase an HTTP method name
pub fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

/// Whether a (normalized) method sends a JSON body
pub fn carries_body(method: &str) -> bool {
    matches!(method, "POST" | "PUT")
}

/// JSON body to send for `method`, `None` when the method has no body.
/// A missing POST/PUT body becomes `{}`.
pub fn request_body(method: &str, body: Option<Payload>) -> Result<Option<Value>, ProtocolError> {
    if !carries_body(method) {
        return Ok(None);
    }
    
    match body {
        Some(payload) => payload.into_object().map(Some),
        None => Ok(Some(Value::Object(Map::new()))),
    }
}

/// Cut `text` to at most `limit` characters for logging
pub fn truncate(text: &str, limit: usize) -> Cow<'_, str> {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => Cow::Owned(format!("{}...", &text[..idx])),
        None => Cow::Borrowed(text),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    
    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("post"), "POST");
        assert_eq!(normalize_method(" Get "), "GET");
        assert!(carries_body("POST"));
        assert!(carries_body("PUT"));
        assert!(!carries_body("GET"));
        assert!(!carries_body("DELETE"));
    }
    
    #[test]
    fn test_text_body_parsed() {
        let body = request_body("POST", Some(r#"{"url":"http://example.com"}"#.into())).unwrap();
        assert_eq!(body, Some(json!({ "url": "http://example.com" })));
    }
    
    #[test]
    fn test_json_body_passed_through() {
        let value = json!({ "using": "id", "value": "login" });
        let body = request_body("PUT", Some(value.clone().into())).unwrap();
        assert_eq!(body, Some(value));
    }
    
    #[test]
    fn test_missing_post_body_is_empty_object() {
        assert_eq!(request_body("POST", None).unwrap(), Some(json!({})));
        assert_eq!(request_body("POST", Some("  ".into())).unwrap(), Some(json!({})));
    }
    
    #[test]
    fn test_get_drops_body() {
        assert_eq!(request_body("GET", Some("not json".into())).unwrap(), None);
    }
    
    #[test]
    fn test_malformed_body() {
        let err = request_body("POST", Some("{not json".into())).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedBody(_)));
        
        let err = request_body("POST", Some(json!([1, 2, 3]).into())).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }
    
    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 200), "short");
        assert_eq!(truncate("abcdef", 3), "abc...");
        // multi-byte characters are never split
        assert_eq!(truncate("ééééé", 2), "éé...");
    }
}
