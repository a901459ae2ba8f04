use thiserror::Error;

/// Request-level failures. Per-file problems are warnings, not errors.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("context spec #{index}: {reason}")]
    InvalidSpec { index: usize, reason: String },

    #[error("context spec #{index}: invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        index: usize,
        pattern: String,
        reason: String,
    },
}

impl ContextError {
    pub fn spec_index(&self) -> usize {
        match self {
            ContextError::InvalidSpec { index, .. } | ContextError::InvalidPattern { index, .. } => {
                *index
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
