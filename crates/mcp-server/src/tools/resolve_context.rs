use colloquy_context::ContextCategory;
use colloquy_protocol::CallToolResult;

use super::error::ToolError;
use super::schemas::{ResolveContextRequest, ResolveContextResult};
use super::{turn, ToolContext};

pub(super) async fn run(
    ctx: &ToolContext,
    request: ResolveContextRequest,
) -> Result<CallToolResult, ToolError> {
    let category =
        turn::parse_category(request.context_type.as_deref(), ContextCategory::General)?;
    let mut resolution = turn::resolve_context(
        ctx,
        request.context_files,
        category,
        request.max_context_bytes,
        request.focus,
    )
    .await?;
    if !request.include_content {
        for fragment in &mut resolution.fragments {
            fragment.content.clear();
        }
    }

    let mut text = format!(
        "{} fragment(s), {} of {} bytes{}",
        resolution.fragments.len(),
        resolution.total_bytes,
        resolution.budget_bytes,
        if resolution.truncated { ", truncated" } else { "" }
    );
    for fragment in &resolution.fragments {
        text.push_str(&format!(
            "\n{} ({} bytes{})",
            fragment.label(),
            fragment.size_bytes,
            if fragment.truncated { ", truncated" } else { "" }
        ));
    }
    for warning in &resolution.warnings {
        text.push_str(&format!(
            "\nwarning: {} ({})",
            warning.path,
            warning.reason.as_str()
        ));
    }

    let result = ResolveContextResult {
        fragments: resolution.fragments,
        warnings: resolution.warnings,
        total_bytes: resolution.total_bytes,
        budget_bytes: resolution.budget_bytes,
        truncated: resolution.truncated,
        include_content: request.include_content,
    };
    turn::respond(text, &result)
}
