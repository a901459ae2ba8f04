use colloquy_context::ContextCategory;
use colloquy_protocol::CallToolResult;
use colloquy_session::{NewSession, SessionKind};

use super::error::ToolError;
use super::schemas::AskRequest;
use super::{prompt, turn, ToolContext};
use crate::progress::ProgressReporter;

/// One question, one turn: start (limit 1), call the provider, commit.
pub(super) async fn run(
    ctx: &ToolContext,
    request: AskRequest,
    progress: &ProgressReporter,
) -> Result<CallToolResult, ToolError> {
    let question = turn::non_empty("question", &request.question)?;
    let category =
        turn::parse_category(request.context_type.as_deref(), ContextCategory::General)?;
    let resolution = turn::resolve_context(
        ctx,
        request.context_files,
        category,
        request.max_context_bytes,
        request.focus,
    )
    .await?;
    let refs = turn::context_refs(&resolution);

    let mut new = NewSession::new(SessionKind::SingleTurn, 1, question).with_context(refs.clone());
    new.metadata
        .insert("context_type".to_string(), category.as_str().to_string());
    let session = ctx.sessions.start_session(new).await?;

    let guard = ctx.sessions.begin_turn(&session.id).await?;
    let outcome = turn::run_turn(
        ctx,
        guard,
        prompt::ask(question, &resolution, category),
        question.to_string(),
        refs,
        progress,
    )
    .await?;

    let result = turn::turn_result(outcome, &resolution, None, progress.sent());
    turn::respond(turn::turn_text(&result), &result)
}
