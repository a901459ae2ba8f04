use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RpcError;

pub const JSONRPC_VERSION: &str = "2.0";

/// Request correlation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl RequestId {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            Value::String(s) => Some(RequestId::String(s.clone())),
            _ => None,
        }
    }
}

/// One decoded wire unit. `id == None` marks a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<RequestId>,
    pub method: String,
    pub params: Value,
}

impl Message {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Outcome of decoding a JSON value that was syntactically valid.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(Message),
    /// Structurally invalid envelope; `id` is set when one could be read.
    Invalid { id: Option<RequestId>, reason: String },
}

pub fn decode_message(value: Value) -> Decoded {
    let Value::Object(mut map) = value else {
        return Decoded::Invalid {
            id: None,
            reason: "message must be a JSON object".to_string(),
        };
    };

    let id = match map.get("id") {
        None | Some(Value::Null) => None,
        Some(raw) => match RequestId::from_value(raw) {
            Some(id) => Some(id),
            None => {
                return Decoded::Invalid {
                    id: None,
                    reason: "id must be an integer or a string".to_string(),
                }
            }
        },
    };

    if let Some(version) = map.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Decoded::Invalid {
                id,
                reason: format!("unsupported jsonrpc version {version}"),
            };
        }
    }

    let method = match map.remove("method") {
        Some(Value::String(method)) if !method.trim().is_empty() => method,
        Some(_) => {
            return Decoded::Invalid {
                id,
                reason: "method must be a non-empty string".to_string(),
            }
        }
        None => {
            return Decoded::Invalid {
                id,
                reason: "missing method".to_string(),
            }
        }
    };

    let params = match map.remove("params") {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(params @ (Value::Object(_) | Value::Array(_))) => params,
        Some(_) => {
            return Decoded::Invalid {
                id,
                reason: "params must be an object or an array".to_string(),
            }
        }
    };

    Decoded::Message(Message { id, method, params })
}

/// Response envelope. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<RequestId>, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Server-to-client notification (used for partial results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}
