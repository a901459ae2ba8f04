//! Tool surface: the closed registry, per-tool handlers and their shared plumbing.
//!
//! Handlers reach sessions only through [`SessionManager`]; the provider and the document
//! generator are injected so tests can script them.

mod ask;
pub mod catalog;
mod continue_session;
mod discuss;
pub mod error;
pub(crate) mod export;
mod health;
mod prompt;
mod resolve_context;
pub mod schemas;
pub mod scoring;
mod sessions;
mod turn;

use std::sync::Arc;
use std::time::Instant;

use colloquy_protocol::CallToolResult;
use colloquy_session::SessionManager;
use serde_json::Value;

pub use catalog::{ToolDescriptor, ToolKind, ToolRegistry};
pub use error::ToolError;
pub(crate) use turn::check_session_id;

use crate::baseline::DocumentGenerator;
use crate::config::Config;
use crate::progress::ProgressReporter;
use crate::provider::CompletionProvider;

/// Everything a handler may touch.
pub struct ToolContext {
    pub sessions: SessionManager,
    pub provider: Arc<dyn CompletionProvider>,
    pub documents: Arc<dyn DocumentGenerator>,
    pub config: Config,
    pub started_at: Instant,
}

impl ToolContext {
    pub fn new(
        sessions: SessionManager,
        provider: Arc<dyn CompletionProvider>,
        documents: Arc<dyn DocumentGenerator>,
        config: Config,
    ) -> Self {
        Self {
            sessions,
            provider,
            documents,
            config,
            started_at: Instant::now(),
        }
    }
}

/// Validates `arguments` against the tool's declared schema, then runs its handler.
///
/// Nothing observable happens before validation succeeds.
pub async fn invoke(
    tool: &ToolDescriptor,
    arguments: &Value,
    ctx: &ToolContext,
    progress: &ProgressReporter,
) -> Result<CallToolResult, ToolError> {
    let args = tool.schema.validate(arguments)?;
    log::debug!("Invoking tool {}", tool.name());
    match tool.kind {
        ToolKind::Ask => ask::run(ctx, turn::parse_args(args)?, progress).await,
        ToolKind::Discuss => discuss::run(ctx, turn::parse_args(args)?, progress).await,
        ToolKind::Continue => continue_session::run(ctx, turn::parse_args(args)?, progress).await,
        ToolKind::CloseSession => sessions::close(ctx, turn::parse_args(args)?).await,
        ToolKind::RecoverSession => sessions::recover(ctx, turn::parse_args(args)?).await,
        ToolKind::ListSessions => sessions::list(ctx, turn::parse_args(args)?).await,
        ToolKind::SessionStatus => sessions::status(ctx, turn::parse_args(args)?).await,
        ToolKind::ExportSession => export::run(ctx, turn::parse_args(args)?).await,
        ToolKind::ResolveContext => resolve_context::run(ctx, turn::parse_args(args)?).await,
        ToolKind::Health => health::run(ctx).await,
    }
}
