use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First code of the server-defined block. The block is contiguous and ends at
/// [`SERVER_ERROR_LAST`].
pub const SERVER_ERROR_FIRST: i32 = -32601;
pub const SERVER_ERROR_LAST: i32 = -32608;

/// Failure taxonomy shared by every layer of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    InvalidState,
    NotFound,
    StorageError,
    ProviderTimeout,
    ProviderFailure,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 10] = [
        ErrorKind::ParseError,
        ErrorKind::InvalidRequest,
        ErrorKind::MethodNotFound,
        ErrorKind::InvalidParams,
        ErrorKind::InternalError,
        ErrorKind::InvalidState,
        ErrorKind::NotFound,
        ErrorKind::StorageError,
        ErrorKind::ProviderTimeout,
        ErrorKind::ProviderFailure,
    ];

    pub const fn code(self) -> i32 {
        match self {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::InternalError => -32603,
            ErrorKind::InvalidState => -32604,
            ErrorKind::NotFound => -32605,
            ErrorKind::StorageError => -32606,
            ErrorKind::ProviderTimeout => -32607,
            ErrorKind::ProviderFailure => -32608,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ParseError => "parse_error",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::MethodNotFound => "method_not_found",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::NotFound => "not_found",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::ProviderTimeout => "provider_timeout",
            ErrorKind::ProviderFailure => "provider_failure",
        }
    }

    /// Transport-level kinds sit outside the server-defined block.
    pub const fn is_transport_level(self) -> bool {
        matches!(self, ErrorKind::ParseError | ErrorKind::InvalidRequest)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON-RPC `error` member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Builds an error whose `data` always names the kind, merged with any object details.
    pub fn new(kind: ErrorKind, message: impl Into<String>, details: Option<Value>) -> Self {
        let mut data = serde_json::Map::new();
        data.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
        match details {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    if key != "kind" {
                        data.insert(key, value);
                    }
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                data.insert("details".to_string(), other);
            }
        }
        Self {
            code: kind.code(),
            message: message.into(),
            data: Some(Value::Object(data)),
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }
}
