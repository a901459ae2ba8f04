use std::sync::Arc;

use colloquy_context::ContextCategory;
use colloquy_protocol::CallToolResult;
use colloquy_session::{NewSession, SessionKind};

use super::error::ToolError;
use super::schemas::DiscussRequest;
use super::{prompt, turn, ToolContext};
use crate::progress::ProgressReporter;

/// Starts an iterative session, optionally seeded with a baseline document, and runs the
/// opening turn.
pub(super) async fn run(
    ctx: &ToolContext,
    request: DiscussRequest,
    progress: &ProgressReporter,
) -> Result<CallToolResult, ToolError> {
    let topic = turn::non_empty("topic", &request.topic)?;
    let max_turns = request
        .max_turns
        .unwrap_or(ctx.config.sessions.default_turns);
    let category = turn::parse_category(request.context_type.as_deref(), ContextCategory::Code)?;
    let resolution = turn::resolve_context(
        ctx,
        request.context_files,
        category,
        request.max_context_bytes,
        request.focus,
    )
    .await?;
    let refs = turn::context_refs(&resolution);

    let baseline = if request.use_baseline {
        let documents = Arc::clone(&ctx.documents);
        let owned_topic = topic.to_string();
        let fragments = resolution.fragments.clone();
        let document =
            tokio::task::spawn_blocking(move || documents.generate(&owned_topic, &fragments))
                .await
                .map_err(|err| ToolError::Internal(format!("baseline task failed: {err}")))?;
        Some(document)
    } else {
        None
    };

    let mut new = NewSession::new(SessionKind::Iterative, max_turns, topic)
        .with_context(refs.clone())
        .with_baseline(baseline.clone());
    new.metadata
        .insert("context_type".to_string(), category.as_str().to_string());
    let session = ctx.sessions.start_session(new).await?;

    let guard = ctx.sessions.begin_turn(&session.id).await?;
    let opening = prompt::discuss_opening(topic, baseline.as_deref(), &resolution, category);
    let outcome = turn::run_turn(
        ctx,
        guard,
        opening,
        topic.to_string(),
        refs,
        progress,
    )
    .await?;

    let result = turn::turn_result(outcome, &resolution, baseline, progress.sent());
    turn::respond(turn::turn_text(&result), &result)
}
