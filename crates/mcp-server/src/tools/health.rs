use colloquy_protocol::CallToolResult;
use colloquy_session::SessionFilter;

use super::catalog::ToolKind;
use super::error::ToolError;
use super::schemas::{HealthResult, ProviderHealth, StoreHealth};
use super::{turn, ToolContext};

pub(super) async fn run(ctx: &ToolContext) -> Result<CallToolResult, ToolError> {
    let sample = SessionFilter {
        limit: Some(1),
        ..SessionFilter::default()
    };
    let reachable = match ctx.sessions.list_sessions(&sample).await {
        Ok(_) => true,
        Err(err) => {
            log::warn!("Health check could not query the session store: {err}");
            false
        }
    };

    let result = HealthResult {
        status: if reachable { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_ms: u64::try_from(ctx.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        streaming: ctx.config.streaming,
        tools: ToolKind::ALL.len(),
        provider: ProviderHealth {
            name: ctx.provider.name().to_string(),
            timeout_ms: ctx.config.provider.timeout_ms,
        },
        store: StoreHealth {
            sessions_dir: ctx.config.sessions_dir.display().to_string(),
            cached_sessions: ctx.sessions.cached_sessions(),
            reachable,
        },
    };
    let text = format!(
        "{} (v{}), provider {}, store {}",
        result.status,
        result.version,
        result.provider.name,
        if reachable { "reachable" } else { "unreachable" }
    );
    turn::respond(text, &result)
}
