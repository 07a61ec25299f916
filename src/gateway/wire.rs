//! Wire framing for the gateway.
//!
//! Messages are discrete JSON objects discriminated by `type`: requests,
//! responses, and events. Request ids are opaque to the server and echoed
//! verbatim; every request yields exactly one response with the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::DomainError;

/// Close code: normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code: server going away.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Close code: authentication failure or timeout.
pub const CLOSE_AUTH_FAILURE: u16 = 4003;
/// Close code: per-IP connection cap exceeded.
pub const CLOSE_CONNECTION_CAP: u16 = 4006;

pub const ERR_INVALID_FRAME: i32 = -32600;
pub const ERR_METHOD_NOT_FOUND: i32 = -32601;
pub const ERR_INVALID_PARAMS: i32 = -32602;
pub const ERR_UNAUTHORIZED: i32 = -32003;
pub const ERR_FORBIDDEN: i32 = -32004;
pub const ERR_INTERNAL: i32 = -32000;
pub const ERR_NOT_FOUND: i32 = -32001;
pub const ERR_CONFLICT: i32 = -32002;

/// One inbound or outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "req")]
    Request {
        id: Value,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    #[serde(rename = "res")]
    Response {
        id: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcError>,
    },
    #[serde(rename = "event")]
    Event { event: String, data: Value },
}

impl Frame {
    pub fn response_ok(id: Value, result: Value) -> Self {
        Self::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn response_err(id: Value, error: RpcError) -> Self {
        Self::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self::Event {
            event: event.into(),
            data,
        }
    }

    /// Serialize for the wire. Frames are plain data; serialization cannot
    /// fail in practice, but a failure is mapped to an internal-error frame
    /// rather than a panic.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"res","id":null,"error":{"code":-32000,"message":"serialization failure"}}"#
                .to_string()
        })
    }
}

/// A normalized RPC error. Never carries stack traces or internal detail;
/// `data` may hold a stable reason string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn invalid_frame() -> Self {
        Self::new(ERR_INVALID_FRAME, "invalid frame")
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ERR_METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(ERR_INVALID_PARAMS, detail)
    }

    pub fn unauthorized() -> Self {
        Self::new(ERR_UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(ERR_FORBIDDEN, "forbidden")
    }

    pub fn internal() -> Self {
        Self::new(ERR_INTERNAL, "internal error")
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(ERR_NOT_FOUND, what)
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::new(ERR_CONFLICT, what)
    }
}

impl From<DomainError> for RpcError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::GoalNotFound(_)
            | DomainError::WorkItemNotFound(_)
            | DomainError::RunNotFound(_)
            | DomainError::EscalationNotFound(_)
            | DomainError::ApprovalNotFound(_)
            | DomainError::ArtifactNotFound(_) => Self::not_found(err.to_string()),
            DomainError::Conflict { .. } | DomainError::InvalidStateTransition { .. } => {
                Self::conflict(err.to_string())
            }
            DomainError::ValidationFailed(detail) => Self::invalid_params(detail),
            // Storage/serialization/execution detail stays in local logs.
            _ => Self::internal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_request_round_trip() {
        let json = r#"{"type":"req","id":"42","method":"goal.list","params":{"limit":5}}"#;
        let frame: Frame = serde_json::from_str(json).unwrap();
        match frame {
            Frame::Request { id, method, params } => {
                assert_eq!(id, serde_json::json!("42"));
                assert_eq!(method, "goal.list");
                assert_eq!(params.unwrap()["limit"], 5);
            }
            _ => panic!("expected request"),
        }
    }

    #[test]
    fn test_unknown_frame_type_fails_to_parse() {
        let json = r#"{"type":"mystery","id":1}"#;
        assert!(serde_json::from_str::<Frame>(json).is_err());
    }

    #[test]
    fn test_response_echoes_client_id_shape() {
        // Ids are opaque: numbers survive as numbers, strings as strings.
        let frame = Frame::response_ok(serde_json::json!(7), serde_json::json!({"ok": true}));
        let json = frame.to_json();
        assert!(json.contains("\"id\":7"));

        let frame = Frame::response_err(serde_json::json!("abc"), RpcError::unauthorized());
        let json = frame.to_json();
        assert!(json.contains("\"id\":\"abc\""));
        assert!(json.contains("-32003"));
    }

    #[test]
    fn test_domain_error_mapping() {
        let err: RpcError = DomainError::GoalNotFound(Uuid::new_v4()).into();
        assert_eq!(err.code, ERR_NOT_FOUND);

        let err: RpcError = DomainError::Conflict {
            entity: "goal".into(),
            id: "x".into(),
        }
        .into();
        assert_eq!(err.code, ERR_CONFLICT);

        // Internal classes never leak detail.
        let err: RpcError = DomainError::StorageError("connection refused".into()).into();
        assert_eq!(err.code, ERR_INTERNAL);
        assert_eq!(err.message, "internal error");
    }
}
