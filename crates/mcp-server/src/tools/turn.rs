//! Plumbing shared by the handlers: argument decoding, context resolution and the provider turn.

use colloquy_context::{ContextCategory, ContextError, ContextSpec, ContextSpecInput, Resolution};
use colloquy_protocol::CallToolResult;
use colloquy_session::{ids, now_ms, ContextRef, Session, TurnGuard, TurnInput};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use super::error::ToolError;
use super::prompt::SYSTEM_PROMPT;
use super::schemas::{ContextReport, FragmentReport, TurnResult};
use super::scoring::{estimate_tokens, quality};
use super::ToolContext;
use crate::progress::ProgressReporter;
use crate::provider::{Completion, CompletionRequest, ProviderError};

pub(crate) fn parse_args<T: DeserializeOwned>(args: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|err| ToolError::InvalidParams {
        message: format!("invalid arguments: {err}"),
        details: Value::Null,
    })
}

pub(crate) fn non_empty<'a>(parameter: &str, value: &'a str) -> Result<&'a str, ToolError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ToolError::invalid_params(
            parameter,
            format!("parameter `{parameter}` must not be empty"),
        ));
    }
    Ok(trimmed)
}

/// Rejects malformed ids before the store is touched.
pub(crate) fn check_session_id(id: &str) -> Result<(), ToolError> {
    if ids::is_valid(id) {
        Ok(())
    } else {
        Err(ToolError::invalid_params(
            "session_id",
            format!("invalid session id {id:?}"),
        ))
    }
}

pub(crate) fn parse_category(
    raw: Option<&str>,
    default: ContextCategory,
) -> Result<ContextCategory, ToolError> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|reason: String| ToolError::invalid_params("context_type", reason)),
        None => Ok(default),
    }
}

/// Runs the resolver on the blocking pool.
pub(crate) async fn resolve_context(
    ctx: &ToolContext,
    specs: Vec<ContextSpecInput>,
    category: ContextCategory,
    budget: Option<usize>,
    focus: Option<String>,
) -> Result<Resolution, ToolError> {
    let mut options = ctx
        .config
        .resolve_options()
        .with_category(category)
        .with_focus(focus);
    if let Some(budget) = budget {
        options = options.with_budget(budget);
    }
    if specs.is_empty() {
        return Ok(Resolution {
            budget_bytes: options.budget_bytes,
            ..Resolution::default()
        });
    }
    tokio::task::spawn_blocking(move || colloquy_context::resolve(&specs, &options))
        .await
        .map_err(|err| ToolError::Internal(format!("context resolution task failed: {err}")))?
        .map_err(ToolError::from)
}

/// Turns recorded provenance back into specs, so a refresh re-reads the same ranges.
pub(crate) fn specs_from_refs(refs: &[ContextRef]) -> Vec<ContextSpecInput> {
    refs.iter()
        .map(|item| {
            ContextSpecInput::Detailed(ContextSpec {
                path: item.path.clone(),
                line_start: item.line_start,
                line_end: item.line_end,
                ..ContextSpec::default()
            })
        })
        .collect()
}

/// Maps a resolver error back to the caller's own list after `offset` recorded specs were
/// prepended. Failures inside the recorded prefix are reported against `refresh_context`.
pub(crate) fn rebase_spec_index(err: ToolError, offset: usize) -> ToolError {
    let ToolError::Context(context) = err else {
        return err;
    };
    let index = context.spec_index();
    if index < offset {
        return ToolError::InvalidParams {
            message: format!("cannot refresh recorded context: {context}"),
            details: json!({ "parameter": "refresh_context", "recorded_index": index }),
        };
    }
    ToolError::Context(match context {
        ContextError::InvalidSpec { index, reason } => ContextError::InvalidSpec {
            index: index - offset,
            reason,
        },
        ContextError::InvalidPattern {
            index,
            pattern,
            reason,
        } => ContextError::InvalidPattern {
            index: index - offset,
            pattern,
            reason,
        },
    })
}

pub(crate) fn context_refs(resolution: &Resolution) -> Vec<ContextRef> {
    resolution
        .fragments
        .iter()
        .map(|fragment| ContextRef {
            path: fragment.source_path.clone(),
            line_start: fragment.line_start,
            line_end: fragment.line_end,
        })
        .collect()
}

pub(crate) fn context_report(resolution: &Resolution) -> ContextReport {
    ContextReport {
        fragments: resolution.fragments.iter().map(FragmentReport::from).collect(),
        total_bytes: resolution.total_bytes,
        budget_bytes: resolution.budget_bytes,
        truncated: resolution.truncated,
        warnings: resolution.warnings.clone(),
    }
}

/// Calls the provider under the configured timeout, forwarding partials when the client asked.
async fn complete(
    ctx: &ToolContext,
    request: &CompletionRequest,
    progress: &ProgressReporter,
) -> Result<Completion, ProviderError> {
    let limit = ctx.config.provider.timeout();
    let call = async {
        if !progress.is_enabled() {
            return ctx.provider.complete(request).await;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let forward = async {
            while let Some(chunk) = rx.recv().await {
                progress.report(&chunk).await;
            }
        };
        let (result, ()) = tokio::join!(ctx.provider.complete_streaming(request, tx), forward);
        result
    };
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!(
                "Provider {} timed out after {} ms",
                ctx.provider.name(),
                limit.as_millis()
            );
            Err(ProviderError::Timeout(limit))
        }
    }
}

pub(crate) struct TurnOutcome {
    pub session: Session,
    pub response: String,
    pub quality: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Provider call + commit while `guard` holds the session's advancement lock.
///
/// A provider failure drops the guard, leaving the session at its last checkpoint.
pub(crate) async fn run_turn(
    ctx: &ToolContext,
    guard: TurnGuard<'_>,
    prompt: String,
    input: String,
    context: Vec<ContextRef>,
    progress: &ProgressReporter,
) -> Result<TurnOutcome, ToolError> {
    let session_id = guard.session().id.clone();
    let request = CompletionRequest {
        prompt,
        input,
        system: Some(SYSTEM_PROMPT.to_string()),
        max_tokens: ctx.config.provider.max_tokens,
        session_id: Some(session_id.clone()),
    };
    let started_at_ms = now_ms();
    let completion = complete(ctx, &request, progress)
        .await
        .map_err(|err| ToolError::provider(err, Some(&session_id)))?;

    let prompt_tokens = completion
        .prompt_tokens
        .unwrap_or_else(|| estimate_tokens(&request.prompt));
    let completion_tokens = completion
        .completion_tokens
        .unwrap_or_else(|| estimate_tokens(&completion.text));
    let score = quality(&completion.text);
    let session = guard
        .commit(TurnInput {
            prompt: request.prompt,
            response: completion.text.clone(),
            prompt_tokens,
            completion_tokens,
            quality: score,
            context,
            started_at_ms,
        })
        .await?;
    Ok(TurnOutcome {
        session,
        response: completion.text,
        quality: score,
        prompt_tokens,
        completion_tokens,
    })
}

pub(crate) fn turn_result(
    outcome: TurnOutcome,
    resolution: &Resolution,
    baseline: Option<String>,
    partials: u64,
) -> TurnResult {
    let session = &outcome.session;
    TurnResult {
        session_id: session.id.clone(),
        state: session.state,
        turn: session.turns_completed,
        turns_limit: session.turns_limit,
        remaining_turns: session.remaining_turns(),
        response: outcome.response,
        quality: outcome.quality,
        prompt_tokens: outcome.prompt_tokens,
        completion_tokens: outcome.completion_tokens,
        total_tokens: session.total_tokens,
        context: context_report(resolution),
        baseline,
        partials,
    }
}

pub(crate) fn turn_text(result: &TurnResult) -> String {
    format!(
        "{}\n\n[session {}: turn {}/{}, {}]",
        result.response.trim_end(),
        result.session_id,
        result.turn,
        result.turns_limit,
        result.state
    )
}

pub(crate) fn respond<T: Serialize>(text: String, result: &T) -> Result<CallToolResult, ToolError> {
    let structured = serde_json::to_value(result)
        .map_err(|err| ToolError::Internal(format!("result serialization failed: {err}")))?;
    Ok(CallToolResult::success(text, structured))
}
