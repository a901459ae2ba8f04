use colloquy_context::ContextCategory;
use colloquy_protocol::{ParamSpec, ParamType, ParameterSchema, ToolInfo};
use colloquy_session::{SessionKind, SessionState};
use schemars::{schema_for, JsonSchema};
use serde_json::{json, Value};

use super::schemas::{
    ExportSessionResult, HealthResult, ListSessionsResult, ResolveContextResult, SessionChangeResult,
    SessionStatusResult, TurnResult,
};
use crate::config::Config;

const OUTCOMES: &[&str] = &["completed", "failed"];
pub(crate) const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: i64 = 100;

/// The closed set of tools; dispatch matches on this, never on strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Ask,
    Discuss,
    Continue,
    CloseSession,
    RecoverSession,
    ListSessions,
    SessionStatus,
    ExportSession,
    ResolveContext,
    Health,
}

impl ToolKind {
    pub const ALL: [ToolKind; 10] = [
        ToolKind::Ask,
        ToolKind::Discuss,
        ToolKind::Continue,
        ToolKind::CloseSession,
        ToolKind::RecoverSession,
        ToolKind::ListSessions,
        ToolKind::SessionStatus,
        ToolKind::ExportSession,
        ToolKind::ResolveContext,
        ToolKind::Health,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Ask => "ask",
            ToolKind::Discuss => "discuss",
            ToolKind::Continue => "continue",
            ToolKind::CloseSession => "close_session",
            ToolKind::RecoverSession => "recover_session",
            ToolKind::ListSessions => "list_sessions",
            ToolKind::SessionStatus => "session_status",
            ToolKind::ExportSession => "export_session",
            ToolKind::ResolveContext => "resolve_context",
            ToolKind::Health => "health",
        }
    }

    fn summary(self) -> &'static str {
        match self {
            ToolKind::Ask => "Single question with optional file context; one-turn session.",
            ToolKind::Discuss => {
                "Start an iterative discussion (baseline document + opening turn)."
            }
            ToolKind::Continue => "Advance an iterative discussion by one turn.",
            ToolKind::CloseSession => "Mark a session completed or failed.",
            ToolKind::RecoverSession => {
                "Resume a session from its latest durable checkpoint (after a restart or failure)."
            }
            ToolKind::ListSessions => "Recently updated sessions, newest first.",
            ToolKind::SessionStatus => "Session details, stats and optionally the transcript.",
            ToolKind::ExportSession => "Render a session and its transcript as a Markdown document.",
            ToolKind::ResolveContext => {
                "Preview how file/directory/glob specs resolve under a byte budget."
            }
            ToolKind::Health => "Server, provider and session store status.",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub kind: ToolKind,
    pub schema: ParameterSchema,
    pub output_schema: Option<Value>,
}

impl ToolDescriptor {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.kind.name().to_string(),
            description: self.kind.summary().to_string(),
            input_schema: self.schema.to_json_schema(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// Drops keys strict clients reject or that only bloat `tools/list`.
fn compact_schema(schema: &mut Value) {
    match schema {
        Value::Array(items) => items.iter_mut().for_each(compact_schema),
        Value::Object(map) => {
            map.remove("$schema");
            // A property named `title` holds an object, not a string.
            if matches!(map.get("title"), Some(Value::String(_))) {
                map.remove("title");
            }
            for value in map.values_mut() {
                compact_schema(value);
            }
        }
        _ => {}
    }
}

fn output_schema<T: JsonSchema>() -> Option<Value> {
    let mut schema = serde_json::to_value(schema_for!(T)).ok()?;
    compact_schema(&mut schema);
    Some(schema)
}

fn context_files(required: bool) -> ParamSpec {
    let ty = ParamType::array_of(ParamType::OneOf(vec![ParamType::String, ParamType::Object]));
    let description = "Files, directories or globs; strings or {path, from, to, recursive, \
                       extensions, exclude, pattern, gitignore} objects";
    if required {
        ParamSpec::required("context_files", ty, description)
    } else {
        ParamSpec::optional("context_files", ty, description)
    }
}

fn context_type(default: Option<ContextCategory>) -> ParamSpec {
    let spec = ParamSpec::optional(
        "context_type",
        ParamType::String,
        "Category selecting default extensions for directory specs",
    )
    .allowed(ContextCategory::NAMES);
    match default {
        Some(category) => spec.with_default(json!(category.as_str())),
        None => spec,
    }
}

fn max_context_bytes() -> ParamSpec {
    ParamSpec::optional(
        "max_context_bytes",
        ParamType::Integer,
        "Byte budget for attached context (defaults to the server setting)",
    )
    .range(Some(1), None)
}

fn focus() -> ParamSpec {
    ParamSpec::optional(
        "focus",
        ParamType::String,
        "Keywords; when set, context is packed by relevance instead of input order",
    )
}

fn session_id() -> ParamSpec {
    ParamSpec::required("session_id", ParamType::String, "Session identifier")
}

fn schema_for_kind(kind: ToolKind, config: &Config) -> ParameterSchema {
    let max_turns = i64::from(config.sessions.max_turns);
    let params = match kind {
        ToolKind::Ask => vec![
            ParamSpec::required("question", ParamType::String, "The question to answer"),
            context_files(false),
            context_type(Some(ContextCategory::General)),
            max_context_bytes(),
            focus(),
        ],
        ToolKind::Discuss => vec![
            ParamSpec::required("topic", ParamType::String, "Discussion topic"),
            ParamSpec::optional("max_turns", ParamType::Integer, "Turn limit for the session")
                .with_default(json!(config.sessions.default_turns))
                .range(Some(1), Some(max_turns)),
            context_files(false),
            context_type(Some(ContextCategory::Code)),
            ParamSpec::optional(
                "use_baseline",
                ParamType::Boolean,
                "Generate a baseline document to open the discussion",
            )
            .with_default(json!(true)),
            max_context_bytes(),
            focus(),
        ],
        ToolKind::Continue => vec![
            session_id(),
            ParamSpec::required("message", ParamType::String, "Follow-up message"),
            context_files(false),
            ParamSpec::optional(
                "refresh_context",
                ParamType::Boolean,
                "Re-read the files already attached to the session",
            )
            .with_default(json!(false)),
            max_context_bytes(),
        ],
        ToolKind::CloseSession => vec![
            session_id(),
            ParamSpec::optional("outcome", ParamType::String, "Terminal state to record")
                .with_default(json!("completed"))
                .allowed(OUTCOMES),
            ParamSpec::optional("reason", ParamType::String, "Free-form note kept on the session"),
        ],
        ToolKind::RecoverSession => vec![session_id()],
        ToolKind::ListSessions => vec![
            ParamSpec::optional("status", ParamType::String, "Only sessions in this state")
                .allowed(SessionState::NAMES),
            ParamSpec::optional("kind", ParamType::String, "Only sessions of this kind")
                .allowed(SessionKind::NAMES),
            ParamSpec::optional("limit", ParamType::Integer, "Maximum number of sessions")
                .with_default(json!(DEFAULT_LIST_LIMIT))
                .range(Some(1), Some(MAX_LIST_LIMIT)),
        ],
        ToolKind::SessionStatus => vec![
            session_id(),
            ParamSpec::optional(
                "include_transcript",
                ParamType::Boolean,
                "Include every turn's prompt and response",
            )
            .with_default(json!(false)),
            ParamSpec::optional("turn", ParamType::Integer, "Include only this 1-based turn")
                .range(Some(1), None),
        ],
        ToolKind::ExportSession => vec![
            session_id(),
            ParamSpec::optional(
                "include_prompts",
                ParamType::Boolean,
                "Include each turn's full prompt, attached context included",
            )
            .with_default(json!(false)),
        ],
        ToolKind::ResolveContext => vec![
            context_files(true),
            context_type(None),
            max_context_bytes(),
            focus(),
            ParamSpec::optional(
                "include_content",
                ParamType::Boolean,
                "Return fragment text, not only provenance",
            )
            .with_default(json!(true)),
        ],
        ToolKind::Health => Vec::new(),
    };
    ParameterSchema::new(params)
}

fn output_schema_for_kind(kind: ToolKind) -> Option<Value> {
    match kind {
        ToolKind::Ask | ToolKind::Discuss | ToolKind::Continue => output_schema::<TurnResult>(),
        ToolKind::CloseSession | ToolKind::RecoverSession => {
            output_schema::<SessionChangeResult>()
        }
        ToolKind::ListSessions => output_schema::<ListSessionsResult>(),
        ToolKind::SessionStatus => output_schema::<SessionStatusResult>(),
        ToolKind::ExportSession => output_schema::<ExportSessionResult>(),
        ToolKind::ResolveContext => output_schema::<ResolveContextResult>(),
        ToolKind::Health => output_schema::<HealthResult>(),
    }
}

/// Built once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new(config: &Config) -> Self {
        let tools = ToolKind::ALL
            .iter()
            .map(|&kind| ToolDescriptor {
                kind,
                schema: schema_for_kind(kind, config),
                output_schema: output_schema_for_kind(kind),
            })
            .collect();
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.iter().map(ToolDescriptor::info).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tool_has_an_object_schema_and_output_schema() {
        let registry = ToolRegistry::new(&Config::default());
        assert_eq!(registry.len(), ToolKind::ALL.len());
        for info in registry.infos() {
            assert_eq!(info.input_schema["type"], "object", "{}", info.name);
            assert!(info.output_schema.is_some(), "{}", info.name);
        }
    }

    #[test]
    fn discuss_defaults_follow_config() {
        let mut config = Config::default();
        config.sessions.default_turns = 4;
        config.sessions.max_turns = 6;
        let registry = ToolRegistry::new(&config);
        let discuss = registry.get("discuss").expect("discuss");

        let args = discuss.schema.validate(&json!({ "topic": "t" })).expect("valid");
        assert_eq!(args["max_turns"], 4);
        assert_eq!(args["context_type"], "code");
        assert_eq!(args["use_baseline"], true);

        assert!(discuss
            .schema
            .validate(&json!({ "topic": "t", "max_turns": 7 }))
            .is_err());
    }

    #[test]
    fn unknown_names_are_not_registered() {
        let registry = ToolRegistry::new(&Config::default());
        assert!(registry.get("summarize").is_none());
        assert!(registry.get("ask").is_some());
    }
}
