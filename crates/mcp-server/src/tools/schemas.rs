//! Typed tool arguments and results.
//!
//! Arguments are deserialized only after the declared parameter schema accepted them and filled
//! its defaults; the serde defaults here only matter for callers that bypass the registry.

use colloquy_context::{ContextFragment, ContextSpecInput, ResolveWarning};
use colloquy_session::{ContextRef, SessionState, SessionStats, SessionSummary, TurnRecord};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub context_files: Vec<ContextSpecInput>,
    pub context_type: Option<String>,
    pub max_context_bytes: Option<usize>,
    pub focus: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscussRequest {
    pub topic: String,
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub context_files: Vec<ContextSpecInput>,
    pub context_type: Option<String>,
    #[serde(default = "default_true")]
    pub use_baseline: bool,
    pub max_context_bytes: Option<usize>,
    pub focus: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContinueRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub context_files: Vec<ContextSpecInput>,
    #[serde(default)]
    pub refresh_context: bool,
    pub max_context_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloseSessionRequest {
    pub session_id: String,
    pub outcome: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionIdRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportSessionRequest {
    pub session_id: String,
    #[serde(default)]
    pub include_prompts: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ListSessionsRequest {
    pub status: Option<String>,
    pub kind: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionStatusRequest {
    pub session_id: String,
    #[serde(default)]
    pub include_transcript: bool,
    pub turn: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveContextRequest {
    pub context_files: Vec<ContextSpecInput>,
    pub context_type: Option<String>,
    pub max_context_bytes: Option<usize>,
    pub focus: Option<String>,
    #[serde(default = "default_true")]
    pub include_content: bool,
}

fn default_true() -> bool {
    true
}

/// Provenance of the context attached to one turn.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContextReport {
    pub fragments: Vec<FragmentReport>,
    pub total_bytes: usize,
    pub budget_bytes: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ResolveWarning>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FragmentReport {
    pub source_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    pub size_bytes: usize,
    pub truncated: bool,
}

impl From<&ContextFragment> for FragmentReport {
    fn from(fragment: &ContextFragment) -> Self {
        Self {
            source_path: fragment.source_path.clone(),
            line_start: fragment.line_start,
            line_end: fragment.line_end,
            size_bytes: fragment.size_bytes,
            truncated: fragment.truncated,
        }
    }
}

/// Result of `ask`, `discuss` and `continue`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub session_id: String,
    pub state: SessionState,
    /// 1-based index of the turn just completed.
    pub turn: u32,
    pub turns_limit: u32,
    pub remaining_turns: u32,
    pub response: String,
    pub quality: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub context: ContextReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    /// Number of partial-result notifications sent before this response.
    pub partials: u64,
}

/// Result of `close_session` and `recover_session`.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionChangeResult {
    pub session: SessionSummary,
    pub stats: SessionStats,
    pub checkpoint_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListSessionsResult {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResult {
    pub session: SessionSummary,
    pub stats: SessionStats,
    pub context_digest: Vec<ContextRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TurnRecord>>,
}

/// Result of `export_session`; `document` is also the text content.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportSessionResult {
    pub session_id: String,
    pub format: String,
    pub turns: u32,
    pub bytes: usize,
    pub document: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResolveContextResult {
    pub fragments: Vec<ContextFragment>,
    pub warnings: Vec<ResolveWarning>,
    pub total_bytes: usize,
    pub budget_bytes: usize,
    pub truncated: bool,
    pub include_content: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub name: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoreHealth {
    pub sessions_dir: String,
    pub cached_sessions: usize,
    pub reachable: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub status: String,
    pub version: String,
    pub uptime_ms: u64,
    pub streaming: bool,
    pub tools: usize,
    pub provider: ProviderHealth,
    pub store: StoreHealth,
}
