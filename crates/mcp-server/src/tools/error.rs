use colloquy_context::ContextError;
use colloquy_protocol::{ErrorKind, RpcError, SchemaViolation};
use colloquy_session::SessionError;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::provider::ProviderError;

/// Every way a tool call can fail, each mapping to exactly one [`ErrorKind`].
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{message}")]
    InvalidParams { message: String, details: Value },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error("{source}")]
    Provider {
        #[source]
        source: ProviderError,
        /// Set when the call had already created or reached a session.
        session_id: Option<String>,
    },

    #[error("{0}")]
    Internal(String),
}

impl From<SchemaViolation> for ToolError {
    fn from(violation: SchemaViolation) -> Self {
        let details = match violation.parameter() {
            Some(parameter) => json!({ "parameter": parameter }),
            None => Value::Null,
        };
        ToolError::InvalidParams {
            message: violation.to_string(),
            details,
        }
    }
}

impl ToolError {
    pub fn invalid_params(parameter: &str, message: impl Into<String>) -> Self {
        ToolError::InvalidParams {
            message: message.into(),
            details: json!({ "parameter": parameter }),
        }
    }

    pub fn provider(source: ProviderError, session_id: Option<&str>) -> Self {
        ToolError::Provider {
            source,
            session_id: session_id.map(str::to_string),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::InvalidParams { .. } | ToolError::Context(_) => ErrorKind::InvalidParams,
            ToolError::Session(err) => match err {
                SessionError::Validation(_) => ErrorKind::InvalidParams,
                SessionError::NotFound(_) => ErrorKind::NotFound,
                SessionError::InvalidState { .. } | SessionError::Busy(_) => {
                    ErrorKind::InvalidState
                }
                SessionError::Storage { .. } => ErrorKind::StorageError,
                SessionError::Internal { .. } => ErrorKind::InternalError,
            },
            ToolError::Provider { source, .. } => match source {
                ProviderError::Timeout(_) => ErrorKind::ProviderTimeout,
                _ => ErrorKind::ProviderFailure,
            },
            ToolError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Client-facing error. Messages are composed here; source errors stay in the log.
    pub fn to_rpc(&self) -> RpcError {
        let kind = self.kind();
        let mut data = Map::new();
        let message = match self {
            ToolError::InvalidParams { message, details } => {
                if let Value::Object(map) = details {
                    data.extend(map.clone());
                }
                message.clone()
            }
            ToolError::Context(err) => {
                data.insert("parameter".into(), json!("context_files"));
                data.insert("index".into(), json!(err.spec_index()));
                err.to_string()
            }
            ToolError::Session(err) => {
                if let Some(id) = err.session_id().filter(|id| *id != "*") {
                    data.insert("session_id".into(), json!(id));
                }
                match err {
                    SessionError::Validation(reason) => reason.clone(),
                    SessionError::NotFound(id) => format!("session {id} not found"),
                    SessionError::InvalidState {
                        id,
                        state,
                        operation,
                    } => {
                        data.insert("state".into(), json!(state.as_str()));
                        data.insert("operation".into(), json!(operation));
                        format!("session {id} is {state}; cannot {operation}")
                    }
                    SessionError::Busy(id) => {
                        data.insert("reason".into(), json!("busy"));
                        format!("session {id} is busy with another turn; retry when it finishes")
                    }
                    SessionError::Storage { id, .. } => {
                        if id == "*" {
                            "session store query failed".to_string()
                        } else {
                            format!(
                                "checkpoint write for session {id} failed; the session is \
                                 unchanged and the call can be retried"
                            )
                        }
                    }
                    SessionError::Internal { id, .. } => {
                        format!("session {id} failed an internal consistency check")
                    }
                }
            }
            ToolError::Provider { source, session_id } => {
                data.insert("reason".into(), json!(source.reason()));
                let tail = match session_id {
                    Some(id) => {
                        data.insert("session_id".into(), json!(id));
                        format!("; session {id} is unchanged and can be continued")
                    }
                    None => String::new(),
                };
                match source {
                    ProviderError::Timeout(after) => format!(
                        "completion provider did not answer within {} ms{tail}",
                        after.as_millis()
                    ),
                    other => format!("completion provider failed ({}){tail}", other.reason()),
                }
            }
            ToolError::Internal(_) => "internal error".to_string(),
        };

        if kind == ErrorKind::InternalError {
            log::error!("Internal error surfaced to client: {self}");
        } else {
            log::debug!("Tool error ({kind}): {self}");
        }
        RpcError::new(kind, message, Some(Value::Object(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colloquy_session::{SessionState, StoreError};
    use std::time::Duration;

    #[test]
    fn storage_errors_hide_io_detail() {
        let err = ToolError::Session(SessionError::Storage {
            id: "discuss_1_0000abcd".into(),
            source: StoreError::Io {
                op: "write checkpoint",
                path: "/secret/path".into(),
                source: std::io::Error::other("disk full"),
            },
        });
        let rpc = err.to_rpc();
        assert_eq!(rpc.code, ErrorKind::StorageError.code());
        assert!(!rpc.message.contains("/secret/path"));
        assert!(!rpc.message.contains("disk full"));
        let data = rpc.data.expect("data");
        assert_eq!(data["kind"], "storage_error");
        assert_eq!(data["session_id"], "discuss_1_0000abcd");
    }

    #[test]
    fn busy_maps_to_invalid_state() {
        let rpc = ToolError::Session(SessionError::Busy("ask_1_00000001".into())).to_rpc();
        assert_eq!(rpc.kind(), Some(ErrorKind::InvalidState));
        assert_eq!(rpc.data.expect("data")["reason"], "busy");
    }

    #[test]
    fn invalid_state_reports_the_state() {
        let rpc = ToolError::Session(SessionError::InvalidState {
            id: "s".into(),
            state: SessionState::Completed,
            operation: "advance",
        })
        .to_rpc();
        let data = rpc.data.expect("data");
        assert_eq!(data["state"], "completed");
        assert_eq!(data["operation"], "advance");
    }

    #[test]
    fn provider_timeout_carries_the_session() {
        let rpc = ToolError::provider(
            ProviderError::Timeout(Duration::from_millis(250)),
            Some("ask_1_00000002"),
        )
        .to_rpc();
        assert_eq!(rpc.kind(), Some(ErrorKind::ProviderTimeout));
        assert!(rpc.message.contains("250 ms"));
        assert_eq!(rpc.data.expect("data")["session_id"], "ask_1_00000002");
    }

    #[test]
    fn schema_violation_names_the_parameter() {
        let rpc = ToolError::from(SchemaViolation::Missing("question".into())).to_rpc();
        assert_eq!(rpc.kind(), Some(ErrorKind::InvalidParams));
        assert_eq!(rpc.data.expect("data")["parameter"], "question");
    }
}
