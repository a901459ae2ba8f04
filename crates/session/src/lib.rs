//! Durable multi-turn sessions.
//!
//! [`SessionManager`] owns the state machine and serialises mutation per session id;
//! [`SessionStore`] implementations only persist and return checkpoints.

pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod model;
pub mod store;

pub use error::{Result, SessionError, StoreError};
pub use lifecycle::{
    CloseOutcome, ManagerConfig, NewSession, SessionManager, TurnGuard, TurnInput,
    DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_TURNS,
};
pub use model::{
    now_ms, unix_ms, Checkpoint, ContextRef, Session, SessionFilter, SessionKind, SessionState,
    SessionStats, SessionSummary, TurnRecord,
};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore};
