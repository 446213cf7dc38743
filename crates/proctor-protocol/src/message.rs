//! Frame payload types
//!
//! Both relay legs carry the same JSON shapes. A request is
//! `{"request": <name>, "requestID": <int>, "args": <list|dict>}`; a
//! response is `{"requestID": <int>, "request"|"response": <name>,
//! "data": <any>, "error": <string>}` where an empty error means success.
//!
//! Request IDs are plain integers correlating responses to requests; on one
//! connection responses may arrive in any order. Three IDs are reserved on
//! the agent leg and never used for ordinary calls.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Reserved ID: hello response sent by an agent right after its service
/// starts. Carries the same payload as an info push.
pub const HELLO_ID: i64 = 0;

/// Reserved ID: unsolicited user-list push from an agent.
pub const USERS_PUSH_ID: i64 = -1;

/// Reserved ID: unsolicited periodic info push from an agent.
pub const INFO_PUSH_ID: i64 = -2;

/// A request frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request name (matched case-insensitively by the receiver)
    pub request: String,
    /// Correlation ID echoed back in the response. Front ends may omit it;
    /// the relay assigns its own per-connection IDs in arrival order.
    #[serde(rename = "requestID", default)]
    pub request_id: i64,
    /// Request arguments; a list on the client leg, list or object on the
    /// agent leg
    pub args: Value,
}

impl Request {
    pub fn new(request: impl Into<String>, request_id: i64, args: Value) -> Self {
        Self {
            request: request.into(),
            request_id,
            args,
        }
    }

    /// Serialize into a frame payload
    pub fn to_payload(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }
}

/// A response frame
///
/// Agents send the request name under the key `response`; the relay sends it
/// to front ends under `request`. Deserialization accepts either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Correlation ID of the request this answers
    #[serde(rename = "requestID")]
    pub request_id: i64,
    /// Name of the request being answered
    #[serde(rename = "request", alias = "response", default)]
    pub request: String,
    /// Result payload; absent data is a malformed response
    #[serde(default)]
    pub data: Option<Value>,
    /// Error string, empty on success
    #[serde(default)]
    pub error: String,
}

impl Response {
    pub fn new(request: impl Into<String>, request_id: i64, data: Value) -> Self {
        Self {
            request_id,
            request: request.into(),
            data: Some(data),
            error: String::new(),
        }
    }

    /// Build an error response
    pub fn with_error(
        request: impl Into<String>,
        request_id: i64,
        data: Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            request: request.into(),
            data: Some(data),
            error: error.into(),
        }
    }

    /// Serialize into a frame payload
    pub fn to_payload(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn is_success(&self) -> bool {
        self.error.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let req = Request::new("listUsers", 7, json!([]));
        let payload = req.to_payload().unwrap();
        let parsed: Request = serde_json::from_slice(&payload).unwrap();
        assert_eq!(parsed.request, "listUsers");
        assert_eq!(parsed.request_id, 7);
        assert_eq!(parsed.args, json!([]));
    }

    #[test]
    fn test_request_id_key_is_camel_case() {
        let req = Request::new("users", 3, json!([]));
        let v: Value = serde_json::from_slice(&req.to_payload().unwrap()).unwrap();
        assert_eq!(v["requestID"], json!(3));
    }

    #[test]
    fn test_request_id_optional_on_parse() {
        let parsed: Request =
            serde_json::from_str(r#"{"request": "listUsers", "args": []}"#).unwrap();
        assert_eq!(parsed.request_id, 0);
    }

    #[test]
    fn test_response_accepts_agent_key() {
        // Agents answer with "response" rather than "request"
        let parsed: Response = serde_json::from_str(
            r#"{"requestID": -2, "response": "info", "data": {"uptime": 1}, "error": ""}"#,
        )
        .unwrap();
        assert_eq!(parsed.request_id, INFO_PUSH_ID);
        assert_eq!(parsed.request, "info");
        assert!(parsed.is_success());
    }

    #[test]
    fn test_response_missing_data_is_none() {
        let parsed: Response =
            serde_json::from_str(r#"{"requestID": 1, "response": "users"}"#).unwrap();
        assert!(parsed.data.is_none());
        assert!(parsed.error.is_empty());
    }

    #[test]
    fn test_response_serializes_request_key() {
        let resp = Response::new("hello", HELLO_ID, json!(""));
        let v: Value = serde_json::from_slice(&resp.to_payload().unwrap()).unwrap();
        assert!(v.get("request").is_some());
        assert!(v.get("response").is_none());
        assert_eq!(v["error"], json!(""));
    }
}
