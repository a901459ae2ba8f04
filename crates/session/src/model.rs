use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_ms(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn now_ms() -> u64 {
    unix_ms(SystemTime::now())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    SingleTurn,
    Iterative,
}

impl SessionKind {
    pub const NAMES: &'static [&'static str] = &["single_turn", "iterative"];

    /// Leading segment of generated ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            SessionKind::SingleTurn => "ask",
            SessionKind::Iterative => "discuss",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::SingleTurn => "single_turn",
            SessionKind::Iterative => "iterative",
        }
    }
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single_turn" => Ok(SessionKind::SingleTurn),
            "iterative" => Ok(SessionKind::Iterative),
            other => Err(format!("unknown session kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Checkpointed,
    Completed,
    Failed,
    Recovering,
}

impl SessionState {
    pub const NAMES: &'static [&'static str] =
        &["active", "checkpointed", "completed", "failed", "recovering"];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Checkpointed => "checkpointed",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Recovering => "recovering",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    pub fn accepts_turns(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Checkpointed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionState::Active),
            "checkpointed" => Ok(SessionState::Checkpointed),
            "completed" => Ok(SessionState::Completed),
            "failed" => Ok(SessionState::Failed),
            "recovering" => Ok(SessionState::Recovering),
            other => Err(format!("unknown session state `{other}`")),
        }
    }
}

/// Provenance of one context fragment, enough to re-resolve it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextRef {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TurnRecord {
    /// 1-based.
    pub index: u32,
    pub prompt: String,
    pub response: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Heuristic response quality in `0.0..=1.0`.
    pub quality: f64,
    #[serde(default)]
    pub context: Vec<ContextRef>,
    pub started_at_ms: u64,
    pub completed_at_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub kind: SessionKind,
    pub state: SessionState,
    pub topic: String,
    pub turns_completed: u32,
    pub turns_limit: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    /// Sequence number of the last durable checkpoint.
    pub checkpoint_seq: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(default)]
    pub context_digest: Vec<ContextRef>,
    #[serde(default)]
    pub transcript: Vec<TurnRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Session {
    /// Checks the counters a recovered snapshot must satisfy.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.turns_limit == 0 {
            return Err("turns limit is zero".to_string());
        }
        if self.turns_completed as usize != self.transcript.len() {
            return Err(format!(
                "turns completed {} does not match transcript length {}",
                self.turns_completed,
                self.transcript.len()
            ));
        }
        if self.turns_completed > self.turns_limit {
            return Err(format!(
                "turns completed {} exceeds limit {}",
                self.turns_completed, self.turns_limit
            ));
        }
        Ok(())
    }

    pub fn remaining_turns(&self) -> u32 {
        self.turns_limit.saturating_sub(self.turns_completed)
    }

    pub fn last_turn(&self) -> Option<&TurnRecord> {
        self.transcript.last()
    }

    /// Appends refs not already present, keeping first-seen order.
    pub fn merge_context(&mut self, refs: &[ContextRef]) {
        for item in refs {
            if !self.context_digest.contains(item) {
                self.context_digest.push(item.clone());
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            kind: self.kind,
            state: self.state,
            topic: self.topic.clone(),
            turns_completed: self.turns_completed,
            turns_limit: self.turns_limit,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
            total_tokens: self.total_tokens,
        }
    }

    pub fn stats(&self) -> SessionStats {
        let average_quality = if self.transcript.is_empty() {
            None
        } else {
            let sum: f64 = self.transcript.iter().map(|t| t.quality).sum();
            Some(sum / self.transcript.len() as f64)
        };
        SessionStats {
            turns: format!("{}/{}", self.turns_completed, self.turns_limit),
            total_tokens: self.total_tokens,
            checkpoint_seq: self.checkpoint_seq,
            average_quality,
            duration_ms: self.updated_at_ms.saturating_sub(self.created_at_ms),
        }
    }
}

/// Immutable durable snapshot keyed by `(session_id, sequence)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub session_id: String,
    pub sequence: u64,
    pub written_at_ms: u64,
    pub session: Session,
}

impl Checkpoint {
    pub fn of(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
            sequence: session.checkpoint_seq,
            written_at_ms: now_ms(),
            session: session.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub kind: SessionKind,
    pub state: SessionState,
    pub topic: String,
    pub turns_completed: u32,
    pub turns_limit: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// `completed/limit`.
    pub turns: String,
    pub total_tokens: u64,
    pub checkpoint_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_quality: Option<f64>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub state: Option<SessionState>,
    pub kind: Option<SessionKind>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn matches(&self, session: &Session) -> bool {
        self.state.map_or(true, |state| state == session.state)
            && self.kind.map_or(true, |kind| kind == session.kind)
    }
}

#[cfg(test)]
pub(crate) fn sample_session(id: &str) -> Session {
    Session {
        id: id.to_string(),
        kind: SessionKind::Iterative,
        state: SessionState::Active,
        topic: "retry policy".to_string(),
        turns_completed: 0,
        turns_limit: 3,
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
        checkpoint_seq: 1,
        total_tokens: 0,
        baseline: None,
        context_digest: Vec::new(),
        transcript: Vec::new(),
        close_reason: None,
        metadata: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Session {
        sample_session("discuss_1_deadbeef")
    }

    #[test]
    fn invariants_catch_counter_drift() {
        let mut session = sample();
        assert!(session.check_invariants().is_ok());
        session.turns_completed = 1;
        assert!(session.check_invariants().is_err());
    }

    #[test]
    fn stats_report_turns_and_average_quality() {
        let mut session = sample();
        for (i, quality) in [0.4, 0.8].into_iter().enumerate() {
            session.transcript.push(TurnRecord {
                index: i as u32 + 1,
                prompt: "q".to_string(),
                response: "a".to_string(),
                prompt_tokens: 1,
                completion_tokens: 1,
                quality,
                context: Vec::new(),
                started_at_ms: 1_000,
                completed_at_ms: 1_500,
            });
        }
        session.turns_completed = 2;
        session.updated_at_ms = 4_000;
        let stats = session.stats();
        assert_eq!(stats.turns, "2/3");
        assert_eq!(stats.duration_ms, 3_000);
        let avg = stats.average_quality.expect("average");
        assert!((avg - 0.6).abs() < 1e-9);
    }

    #[test]
    fn merge_context_keeps_first_seen_order() {
        let mut session = sample();
        let a = ContextRef {
            path: "a.rs".to_string(),
            line_start: None,
            line_end: None,
        };
        let b = ContextRef {
            path: "b.rs".to_string(),
            line_start: Some(1),
            line_end: Some(4),
        };
        session.merge_context(&[a.clone(), b.clone()]);
        session.merge_context(&[b.clone(), a.clone()]);
        assert_eq!(session.context_digest, vec![a, b]);
    }

    #[test]
    fn session_serializes_camel_case() {
        let value = serde_json::to_value(sample()).expect("serialize");
        assert_eq!(value["turnsLimit"], 3);
        assert_eq!(value["state"], "active");
        assert!(value.get("baseline").is_none());
    }
}
