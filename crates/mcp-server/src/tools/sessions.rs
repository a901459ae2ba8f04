//! Session administration: close, recover, list, status.

use colloquy_protocol::CallToolResult;
use colloquy_session::{CloseOutcome, Session, SessionFilter, SessionKind, SessionState};

use super::catalog::DEFAULT_LIST_LIMIT;
use super::error::ToolError;
use super::schemas::{
    CloseSessionRequest, ListSessionsRequest, ListSessionsResult, SessionChangeResult,
    SessionIdRequest, SessionStatusRequest, SessionStatusResult,
};
use super::{turn, ToolContext};

fn change_result(session: &Session) -> SessionChangeResult {
    SessionChangeResult {
        session: session.summary(),
        stats: session.stats(),
        checkpoint_seq: session.checkpoint_seq,
        close_reason: session.close_reason.clone(),
    }
}

pub(super) async fn close(
    ctx: &ToolContext,
    request: CloseSessionRequest,
) -> Result<CallToolResult, ToolError> {
    turn::check_session_id(&request.session_id)?;
    let outcome = match request.outcome.as_deref().unwrap_or("completed") {
        "completed" => CloseOutcome::Completed,
        "failed" => CloseOutcome::Failed,
        other => {
            return Err(ToolError::invalid_params(
                "outcome",
                format!("unknown outcome `{other}`; expected completed or failed"),
            ))
        }
    };
    let reason = request.reason.filter(|r| !r.trim().is_empty());
    let session = ctx
        .sessions
        .close_session(&request.session_id, outcome, reason)
        .await?;
    let text = format!(
        "Session {} closed as {} after {}/{} turns",
        session.id, session.state, session.turns_completed, session.turns_limit
    );
    turn::respond(text, &change_result(&session))
}

pub(super) async fn recover(
    ctx: &ToolContext,
    request: SessionIdRequest,
) -> Result<CallToolResult, ToolError> {
    turn::check_session_id(&request.session_id)?;
    let session = ctx.sessions.recover_session(&request.session_id).await?;
    let text = format!(
        "Session {} recovered: {} at turn {}/{} (checkpoint {})",
        session.id,
        session.state,
        session.turns_completed,
        session.turns_limit,
        session.checkpoint_seq
    );
    turn::respond(text, &change_result(&session))
}

pub(super) async fn list(
    ctx: &ToolContext,
    request: ListSessionsRequest,
) -> Result<CallToolResult, ToolError> {
    let state = request
        .status
        .as_deref()
        .map(str::parse::<SessionState>)
        .transpose()
        .map_err(|reason| ToolError::invalid_params("status", reason))?;
    let kind = request
        .kind
        .as_deref()
        .map(str::parse::<SessionKind>)
        .transpose()
        .map_err(|reason| ToolError::invalid_params("kind", reason))?;
    let filter = SessionFilter {
        state,
        kind,
        limit: Some(request.limit.unwrap_or(DEFAULT_LIST_LIMIT)),
    };
    let sessions = ctx.sessions.list_sessions(&filter).await?;

    let text = if sessions.is_empty() {
        "No sessions.".to_string()
    } else {
        sessions
            .iter()
            .map(|s| {
                format!(
                    "{} [{}] {}/{} {}",
                    s.id, s.state, s.turns_completed, s.turns_limit, s.topic
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let result = ListSessionsResult {
        count: sessions.len(),
        sessions,
    };
    turn::respond(text, &result)
}

pub(super) async fn status(
    ctx: &ToolContext,
    request: SessionStatusRequest,
) -> Result<CallToolResult, ToolError> {
    turn::check_session_id(&request.session_id)?;
    let session = ctx.sessions.get_session(&request.session_id).await?;

    let transcript = match request.turn {
        Some(index) => {
            let record = index
                .checked_sub(1)
                .and_then(|i| session.transcript.get(i as usize))
                .ok_or_else(|| {
                    ToolError::invalid_params(
                        "turn",
                        format!(
                            "turn {index} does not exist; session has {} completed turns",
                            session.turns_completed
                        ),
                    )
                })?;
            Some(vec![record.clone()])
        }
        None if request.include_transcript => Some(session.transcript.clone()),
        None => None,
    };

    let stats = session.stats();
    let mut text = format!(
        "Session {} ({}): {}, turns {}, {} tokens",
        session.id,
        session.kind.as_str(),
        session.state,
        stats.turns,
        stats.total_tokens
    );
    if let Some(reason) = &session.close_reason {
        text.push_str(&format!("\nClose reason: {reason}"));
    }

    let result = SessionStatusResult {
        session: session.summary(),
        stats,
        context_digest: session.context_digest.clone(),
        baseline: session.baseline.clone(),
        close_reason: session.close_reason.clone(),
        last_response: session.last_turn().map(|t| t.response.clone()),
        transcript,
    };
    turn::respond(text, &result)
}
