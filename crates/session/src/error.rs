use std::path::PathBuf;
use thiserror::Error;

use crate::model::SessionState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt checkpoint {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("checkpoint {sequence} for {session_id} is not after {latest}")]
    SequenceRegression {
        session_id: String,
        sequence: u64,
        latest: u64,
    },

    #[error("session store {0} is locked by another process")]
    Locked(PathBuf),

    #[error("invalid session id {0:?}")]
    InvalidId(String),

    #[error("store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("session {0} not found")]
    NotFound(String),

    #[error("session {id} is {state}; cannot {operation}")]
    InvalidState {
        id: String,
        state: SessionState,
        operation: &'static str,
    },

    #[error("session {0} is busy")]
    Busy(String),

    #[error("checkpoint for session {id} failed: {source}")]
    Storage {
        id: String,
        #[source]
        source: StoreError,
    },

    #[error("session {id}: {reason}")]
    Internal { id: String, reason: String },
}

impl SessionError {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionError::Validation(_) => None,
            SessionError::NotFound(id)
            | SessionError::Busy(id)
            | SessionError::InvalidState { id, .. }
            | SessionError::Storage { id, .. }
            | SessionError::Internal { id, .. } => Some(id),
        }
    }

    pub(crate) fn storage(id: &str, source: StoreError) -> Self {
        log::error!("Checkpoint write for session {id} failed: {source}");
        SessionError::Storage {
            id: id.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
