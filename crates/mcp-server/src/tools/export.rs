//! Markdown rendering of a whole session, for `export_session` and the transcript resource.

use std::fmt::Write as _;

use colloquy_protocol::CallToolResult;
use colloquy_session::{ContextRef, Session};

use super::error::ToolError;
use super::schemas::{ExportSessionRequest, ExportSessionResult};
use super::{turn, ToolContext};

pub(crate) const MARKDOWN: &str = "markdown";

fn describe_ref(item: &ContextRef) -> String {
    match (item.line_start, item.line_end) {
        (Some(start), Some(end)) => format!("`{}` (lines {start}-{end})", item.path),
        (Some(start), None) => format!("`{}` (from line {start})", item.path),
        (None, Some(end)) => format!("`{}` (to line {end})", item.path),
        (None, None) => format!("`{}`", item.path),
    }
}

/// Longest backtick run in `text` plus one, at least three, so fenced text cannot close early.
fn fence_for(text: &str) -> String {
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat((longest + 1).max(3))
}

pub(crate) fn render_markdown(session: &Session, include_prompts: bool) -> String {
    let stats = session.stats();
    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", session.topic.trim());
    let _ = writeln!(out, "- Session: `{}` ({})", session.id, session.kind.as_str());
    let _ = writeln!(out, "- State: {}", session.state);
    let _ = writeln!(out, "- Turns: {}", stats.turns);
    let _ = writeln!(out, "- Tokens: {}", stats.total_tokens);
    if let Some(quality) = stats.average_quality {
        let _ = writeln!(out, "- Average quality: {quality:.2}");
    }
    let _ = writeln!(
        out,
        "- Created: {} ms, updated: {} ms (unix)",
        session.created_at_ms, session.updated_at_ms
    );
    if let Some(reason) = &session.close_reason {
        let _ = writeln!(out, "- Close reason: {reason}");
    }

    if let Some(baseline) = session.baseline.as_deref().filter(|b| !b.trim().is_empty()) {
        let _ = writeln!(out, "\n## Baseline\n\n{}", baseline.trim_end());
    }

    if !session.context_digest.is_empty() {
        out.push_str("\n## Context\n\n");
        for item in &session.context_digest {
            let _ = writeln!(out, "- {}", describe_ref(item));
        }
    }

    for record in &session.transcript {
        let _ = writeln!(out, "\n## Turn {}\n", record.index);
        if !record.context.is_empty() {
            let refs: Vec<String> = record.context.iter().map(describe_ref).collect();
            let _ = writeln!(out, "_Context: {}_\n", refs.join(", "));
        }
        if include_prompts {
            let fence = fence_for(&record.prompt);
            let _ = writeln!(
                out,
                "### Prompt\n\n{fence}text\n{}\n{fence}\n",
                record.prompt.trim_end()
            );
        }
        let _ = writeln!(out, "### Response\n\n{}", record.response.trim_end());
    }
    if session.transcript.is_empty() {
        out.push_str("\n_No completed turns._\n");
    }
    out
}

pub(super) async fn run(
    ctx: &ToolContext,
    request: ExportSessionRequest,
) -> Result<CallToolResult, ToolError> {
    turn::check_session_id(&request.session_id)?;
    let session = ctx.sessions.get_session(&request.session_id).await?;
    let document = render_markdown(&session, request.include_prompts);
    log::debug!(
        "Exported session {} ({} bytes)",
        session.id,
        document.len()
    );
    let result = ExportSessionResult {
        session_id: session.id.clone(),
        format: MARKDOWN.to_string(),
        bytes: document.len(),
        turns: session.turns_completed,
        document: document.clone(),
    };
    turn::respond(document, &result)
}
