//! Sessions as read-only MCP resources.
//!
//! `colloquy://sessions/{id}` is the session as JSON; appending `/transcript` gives the same
//! Markdown document as the `export_session` tool.

use colloquy_protocol::{ListResourcesResult, ReadResourceResult, ResourceContents, ResourceInfo};
use colloquy_session::{SessionFilter, SessionSummary};
use serde_json::Value;

use crate::tools::export::render_markdown;
use crate::tools::{check_session_id, ToolContext, ToolError};

pub const SESSION_URI_PREFIX: &str = "colloquy://sessions/";
const TRANSCRIPT_SUFFIX: &str = "/transcript";
const JSON_MIME: &str = "application/json";
const MARKDOWN_MIME: &str = "text/markdown";
const LIST_LIMIT: usize = 50;

pub fn session_uri(id: &str) -> String {
    format!("{SESSION_URI_PREFIX}{id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionView<'a> {
    Json(&'a str),
    Transcript(&'a str),
}

fn parse_uri(uri: &str) -> Option<SessionView<'_>> {
    let rest = uri.strip_prefix(SESSION_URI_PREFIX)?;
    match rest.strip_suffix(TRANSCRIPT_SUFFIX) {
        Some(id) => Some(SessionView::Transcript(id)),
        None => Some(SessionView::Json(rest)),
    }
}

fn describe(summary: &SessionSummary) -> ResourceInfo {
    ResourceInfo {
        uri: session_uri(&summary.id),
        name: format!("Session: {}", summary.topic),
        description: Some(format!(
            "{} {}, turns {}/{}",
            summary.kind.as_str(),
            summary.state,
            summary.turns_completed,
            summary.turns_limit
        )),
        mime_type: JSON_MIME.to_string(),
    }
}

/// The most recently updated sessions.
pub async fn list(ctx: &ToolContext) -> Result<ListResourcesResult, ToolError> {
    let filter = SessionFilter {
        limit: Some(LIST_LIMIT),
        ..SessionFilter::default()
    };
    let sessions = ctx.sessions.list_sessions(&filter).await?;
    Ok(ListResourcesResult {
        resources: sessions.iter().map(describe).collect(),
    })
}

pub async fn read(ctx: &ToolContext, params: &Value) -> Result<ReadResourceResult, ToolError> {
    let Some(uri) = params.get("uri").and_then(Value::as_str) else {
        return Err(ToolError::invalid_params(
            "uri",
            "resources/read requires a string `uri`",
        ));
    };
    let view = parse_uri(uri).ok_or_else(|| {
        ToolError::invalid_params("uri", format!("unknown resource uri `{uri}`"))
    })?;
    let (SessionView::Json(id) | SessionView::Transcript(id)) = view;
    check_session_id(id)?;
    let session = ctx.sessions.get_session(id).await?;

    let (mime_type, text) = match view {
        SessionView::Json(_) => (
            JSON_MIME,
            serde_json::to_string_pretty(&session)
                .map_err(|err| ToolError::Internal(format!("session serialization failed: {err}")))?,
        ),
        SessionView::Transcript(_) => (MARKDOWN_MIME, render_markdown(&session, false)),
    };
    Ok(ReadResourceResult {
        contents: vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: mime_type.to_string(),
            text,
        }],
    })
}
