use colloquy_context::ContextCategory;
use colloquy_protocol::CallToolResult;

use super::error::ToolError;
use super::schemas::ContinueRequest;
use super::{prompt, turn, ToolContext};
use crate::progress::ProgressReporter;

/// One `AdvanceSession` under the session's advancement lock.
pub(super) async fn run(
    ctx: &ToolContext,
    request: ContinueRequest,
    progress: &ProgressReporter,
) -> Result<CallToolResult, ToolError> {
    turn::check_session_id(&request.session_id)?;
    let message = turn::non_empty("message", &request.message)?;

    let guard = ctx.sessions.begin_turn(&request.session_id).await?;
    let session = guard.session().clone();

    let mut specs = Vec::new();
    if request.refresh_context {
        specs = turn::specs_from_refs(&session.context_digest);
    }
    let offset = specs.len();
    specs.extend(request.context_files);

    let category = session
        .metadata
        .get("context_type")
        .and_then(|raw| raw.parse::<ContextCategory>().ok())
        .unwrap_or_default();
    let resolution = turn::resolve_context(
        ctx,
        specs,
        category,
        request.max_context_bytes,
        None,
    )
    .await
    .map_err(|err| turn::rebase_spec_index(err, offset))?;
    let refs = turn::context_refs(&resolution);

    let outcome = turn::run_turn(
        ctx,
        guard,
        prompt::follow_up(&session, message, &resolution),
        message.to_string(),
        refs,
        progress,
    )
    .await?;

    let result = turn::turn_result(outcome, &resolution, None, progress.sent());
    turn::respond(turn::turn_text(&result), &result)
}
