//! Session state machine.
//!
//! Every mutation builds the next snapshot on a clone, writes it to the store, and only then
//! publishes it. A failed write therefore leaves the published session exactly at its last
//! durable checkpoint.

use lru::LruCache;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::error::{Result, SessionError};
use crate::ids;
use crate::model::{
    now_ms, Checkpoint, ContextRef, Session, SessionFilter, SessionKind, SessionState,
    SessionSummary, TurnRecord,
};
use crate::store::SessionStore;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;
pub const DEFAULT_MAX_TURNS: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub cache_capacity: usize,
    pub max_turns: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }
}

/// Parameters of `start_session`.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub kind: SessionKind,
    pub turns_limit: u32,
    pub topic: String,
    pub context: Vec<ContextRef>,
    pub baseline: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl NewSession {
    pub fn new(kind: SessionKind, turns_limit: u32, topic: impl Into<String>) -> Self {
        Self {
            kind,
            turns_limit,
            topic: topic.into(),
            context: Vec::new(),
            baseline: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, context: Vec<ContextRef>) -> Self {
        self.context = context;
        self
    }

    pub fn with_baseline(mut self, baseline: Option<String>) -> Self {
        self.baseline = baseline;
        self
    }
}

/// The outcome of one provider exchange, ready to be appended.
#[derive(Debug, Clone)]
pub struct TurnInput {
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub quality: f64,
    pub context: Vec<ContextRef>,
    pub started_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Completed,
    Failed,
}

struct SessionSlot {
    turn: Arc<tokio::sync::Mutex<()>>,
    current: RwLock<Session>,
}

impl SessionSlot {
    fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            turn: Arc::new(tokio::sync::Mutex::new(())),
            current: RwLock::new(session),
        })
    }

    fn snapshot(&self) -> Session {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, session: Session) {
        match self.current.write() {
            Ok(mut guard) => *guard = session,
            Err(poisoned) => *poisoned.into_inner() = session,
        }
    }
}

/// Owns every session's state machine. Handlers reach sessions only through this type.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    cache: Mutex<LruCache<String, Arc<SessionSlot>>>,
    config: ManagerConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: ManagerConfig) -> Self {
        Self {
            store,
            cache: Mutex::new(LruCache::unbounded()),
            config,
        }
    }

    pub fn config(&self) -> ManagerConfig {
        self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn cache(&self) -> MutexGuard<'_, LruCache<String, Arc<SessionSlot>>> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cached_sessions(&self) -> usize {
        self.cache().len()
    }

    /// Inserts and evicts least-recently-used slots that nobody holds.
    fn insert_slot(&self, id: &str, slot: Arc<SessionSlot>) -> Arc<SessionSlot> {
        let mut cache = self.cache();
        if let Some(existing) = cache.get(id) {
            return Arc::clone(existing);
        }
        cache.put(id.to_string(), Arc::clone(&slot));
        while cache.len() > self.config.cache_capacity.max(1) {
            let victim = cache
                .iter()
                .rev()
                .find(|(key, slot)| key.as_str() != id && Arc::strong_count(slot) == 1)
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    cache.pop(&key);
                    log::debug!("Evicted session {key} from cache");
                }
                None => break,
            }
        }
        slot
    }

    async fn slot(&self, id: &str) -> Result<Arc<SessionSlot>> {
        if !ids::is_valid(id) {
            return Err(SessionError::Validation(format!("invalid session id {id:?}")));
        }
        if let Some(slot) = self.cache().get(id) {
            return Ok(Arc::clone(slot));
        }
        let checkpoint = self
            .store
            .get_latest(id)
            .await
            .map_err(|e| SessionError::storage(id, e))?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        log::debug!(
            "Loaded session {id} from checkpoint {}",
            checkpoint.sequence
        );
        Ok(self.insert_slot(id, SessionSlot::new(checkpoint.session)))
    }

    fn lock_slot(slot: &Arc<SessionSlot>, id: &str) -> Result<OwnedMutexGuard<()>> {
        Arc::clone(&slot.turn)
            .try_lock_owned()
            .map_err(|_| SessionError::Busy(id.to_string()))
    }

    async fn persist(&self, next: &Session) -> Result<()> {
        self.store
            .put(&Checkpoint::of(next))
            .await
            .map_err(|e| SessionError::storage(&next.id, e))
    }

    /// Allocates an id, writes checkpoint 1 and returns the `Active` session.
    pub async fn start_session(&self, request: NewSession) -> Result<Session> {
        if request.turns_limit == 0 {
            return Err(SessionError::Validation(
                "turns limit must be at least 1".to_string(),
            ));
        }
        if request.turns_limit > self.config.max_turns {
            return Err(SessionError::Validation(format!(
                "turns limit {} exceeds maximum {}",
                request.turns_limit, self.config.max_turns
            )));
        }

        let now = now_ms();
        let mut session = Session {
            id: ids::generate(request.kind, now),
            kind: request.kind,
            state: SessionState::Active,
            topic: request.topic,
            turns_completed: 0,
            turns_limit: request.turns_limit,
            created_at_ms: now,
            updated_at_ms: now,
            checkpoint_seq: 1,
            total_tokens: 0,
            baseline: request.baseline,
            context_digest: Vec::new(),
            transcript: Vec::new(),
            close_reason: None,
            metadata: request.metadata,
        };
        session.merge_context(&request.context);

        self.persist(&session).await?;
        self.insert_slot(&session.id, SessionSlot::new(session.clone()));
        log::info!(
            "Session {} started ({}, {} turns)",
            session.id,
            session.kind.as_str(),
            session.turns_limit
        );
        Ok(session)
    }

    /// Takes the per-session advancement lock without waiting.
    ///
    /// A second caller for the same id gets [`SessionError::Busy`]. The returned guard holds
    /// only that lock, so the provider call can happen while it is alive.
    pub async fn begin_turn(&self, id: &str) -> Result<TurnGuard<'_>> {
        let slot = self.slot(id).await?;
        let permit = Self::lock_slot(&slot, id)?;
        let snapshot = slot.snapshot();
        if !snapshot.state.accepts_turns() {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                state: snapshot.state,
                operation: "advance",
            });
        }
        Ok(TurnGuard {
            manager: self,
            slot,
            snapshot,
            _permit: permit,
        })
    }

    /// `begin_turn` + `commit` for callers that already have the turn's content.
    pub async fn advance_session(&self, id: &str, input: TurnInput) -> Result<Session> {
        self.begin_turn(id).await?.commit(input).await
    }

    /// Reloads the latest durable checkpoint and walks it through `Recovering` to `Active`.
    pub async fn recover_session(&self, id: &str) -> Result<Session> {
        let slot = self.slot(id).await?;
        let _permit = Self::lock_slot(&slot, id)?;
        // Re-read under the lock: a turn may have committed while the slot was loading.
        let checkpoint = self
            .store
            .get_latest(id)
            .await
            .map_err(|e| SessionError::storage(id, e))?
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        let durable = checkpoint.session;
        if durable.state == SessionState::Completed {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                state: durable.state,
                operation: "recover",
            });
        }
        if let Err(reason) = durable.check_invariants() {
            log::error!("Session {id} failed recovery validation: {reason}");
            return Err(SessionError::Internal {
                id: id.to_string(),
                reason,
            });
        }

        let mut next = durable;
        next.close_reason = None;
        if next.state != SessionState::Recovering {
            next.state = SessionState::Recovering;
            next.checkpoint_seq += 1;
            next.updated_at_ms = now_ms();
            self.persist(&next).await?;
        }
        slot.publish(next.clone());

        next.state = if next.turns_completed == next.turns_limit {
            SessionState::Completed
        } else {
            SessionState::Active
        };
        next.checkpoint_seq += 1;
        next.updated_at_ms = now_ms();
        self.persist(&next).await?;
        slot.publish(next.clone());

        log::info!(
            "Session {id} recovered at turn {}/{} (checkpoint {})",
            next.turns_completed,
            next.turns_limit,
            next.checkpoint_seq
        );
        Ok(next)
    }

    /// Explicit completion or failure.
    pub async fn close_session(
        &self,
        id: &str,
        outcome: CloseOutcome,
        reason: Option<String>,
    ) -> Result<Session> {
        let slot = self.slot(id).await?;
        let _permit = Self::lock_slot(&slot, id)?;
        let mut next = slot.snapshot();
        if next.state.is_terminal() {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                state: next.state,
                operation: "close",
            });
        }

        next.state = match outcome {
            CloseOutcome::Completed => SessionState::Completed,
            CloseOutcome::Failed => SessionState::Failed,
        };
        next.close_reason = reason;
        next.checkpoint_seq += 1;
        next.updated_at_ms = now_ms();
        self.persist(&next).await?;
        slot.publish(next.clone());
        log::info!("Session {id} closed as {}", next.state);
        Ok(next)
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        Ok(self.slot(id).await?.snapshot())
    }

    /// Store query only; cached sessions are not consulted.
    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<SessionSummary>> {
        let checkpoints = self
            .store
            .list(filter)
            .await
            .map_err(|e| SessionError::storage("*", e))?;
        Ok(checkpoints.iter().map(|c| c.session.summary()).collect())
    }

    /// Deletes `Completed` and `Failed` sessions last updated more than `max_age` ago.
    ///
    /// Sessions with a turn or recovery in flight are skipped. Returns the removed ids.
    pub async fn sweep_closed(&self, max_age: Duration) -> Result<Vec<String>> {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let cutoff = now_ms().saturating_sub(max_age_ms);
        let expired = |session: &Session| {
            session.state.is_terminal() && session.updated_at_ms < cutoff
        };

        let candidates = self
            .store
            .list(&SessionFilter::default())
            .await
            .map_err(|e| SessionError::storage("*", e))?;
        let mut removed = Vec::new();
        for checkpoint in candidates.iter().filter(|c| expired(&c.session)) {
            let id = checkpoint.session_id.as_str();
            let slot = self.slot(id).await?;
            let Ok(_permit) = Self::lock_slot(&slot, id) else {
                log::debug!("Retention sweep skipped busy session {id}");
                continue;
            };
            if !expired(&slot.snapshot()) {
                continue;
            }
            self.store
                .remove(id)
                .await
                .map_err(|e| SessionError::storage(id, e))?;
            self.cache().pop(id);
            removed.push(id.to_string());
        }
        if !removed.is_empty() {
            log::info!(
                "Removed {} closed sessions older than {max_age:?}",
                removed.len()
            );
        }
        Ok(removed)
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.store
            .flush()
            .await
            .map_err(|e| SessionError::storage("*", e))?;
        self.store
            .close()
            .await
            .map_err(|e| SessionError::storage("*", e))
    }
}

/// Exclusive right to append the next turn to one session.
///
/// Dropping the guard without calling [`TurnGuard::commit`] leaves the session untouched.
pub struct TurnGuard<'a> {
    manager: &'a SessionManager,
    slot: Arc<SessionSlot>,
    snapshot: Session,
    _permit: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for TurnGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnGuard")
            .field("session", &self.snapshot.id)
            .field("turns_completed", &self.snapshot.turns_completed)
            .finish()
    }
}

impl TurnGuard<'_> {
    /// The session as of its last durable checkpoint.
    pub fn session(&self) -> &Session {
        &self.snapshot
    }

    /// Appends the turn, checkpoints, then publishes. On a store failure nothing is published.
    pub async fn commit(self, input: TurnInput) -> Result<Session> {
        let mut next = self.snapshot.clone();
        let now = now_ms();
        next.turns_completed += 1;
        next.transcript.push(TurnRecord {
            index: next.turns_completed,
            prompt: input.prompt,
            response: input.response,
            prompt_tokens: input.prompt_tokens,
            completion_tokens: input.completion_tokens,
            quality: input.quality.clamp(0.0, 1.0),
            context: input.context.clone(),
            started_at_ms: input.started_at_ms,
            completed_at_ms: now,
        });
        next.total_tokens += input.prompt_tokens + input.completion_tokens;
        next.merge_context(&input.context);
        next.state = if next.turns_completed >= next.turns_limit {
            SessionState::Completed
        } else {
            SessionState::Checkpointed
        };
        next.checkpoint_seq += 1;
        next.updated_at_ms = now;

        self.manager.persist(&next).await?;
        self.slot.publish(next.clone());
        if next.state == SessionState::Completed {
            log::info!(
                "Session {} completed after {} turns",
                next.id,
                next.turns_completed
            );
        } else {
            log::debug!(
                "Session {} advanced to turn {}/{}",
                next.id,
                next.turns_completed,
                next.turns_limit
            );
        }
        Ok(next)
    }
}
