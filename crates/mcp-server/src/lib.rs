//! Colloquy MCP server.
//!
//! Consultation tools (`ask`, `discuss`, `continue`, ...) over JSON-RPC on stdio, with
//! durable multi-turn sessions and file context attached under a byte budget.
//!
//! ## Usage
//!
//! Add to your MCP client configuration:
//! ```json
//! {
//!   "mcpServers": {
//!     "colloquy": {
//!       "command": "colloquy-mcp",
//!       "args": ["--provider-cmd", "my-llm-wrapper --json"]
//!     }
//!   }
//! }
//! ```

pub mod baseline;
pub mod config;
pub mod dispatcher;
pub mod progress;
pub mod provider;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::Parser;
use colloquy_session::{FileSessionStore, SessionManager};

use crate::baseline::BaselineGenerator;
use crate::config::{Cli, Config};
use crate::dispatcher::Dispatcher;
use crate::provider::{CommandProvider, CompletionProvider, EchoProvider};
use crate::tools::ToolContext;

fn init_logging(config: &Config) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if let Some(filter) = config.log_filter.as_deref() {
        builder.parse_filters(filter);
    }
    // stdout carries protocol frames.
    builder.target(env_logger::Target::Stderr);
    let _ = builder.try_init();
}

fn build_provider(config: &Config) -> Arc<dyn CompletionProvider> {
    match CommandProvider::new(&config.provider.command) {
        Some(provider) => Arc::new(provider.with_retry(config.provider.retry_policy())),
        None => {
            log::warn!("No provider command configured; answering with the offline echo provider");
            Arc::new(EchoProvider)
        }
    }
}

/// Builds the server from CLI, environment and config file, then serves stdio until EOF.
pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(&cli).context("load configuration")?;
    init_logging(&config);
    log::info!("Starting colloquy-mcp {}", env!("CARGO_PKG_VERSION"));

    let store = FileSessionStore::open(&config.sessions_dir, config.sessions.retain_checkpoints)
        .with_context(|| format!("open session store {}", config.sessions_dir.display()))?;
    let sessions = SessionManager::new(Arc::new(store), config.manager_config());
    if let Some(max_age) = config.sessions.closed_retention() {
        if let Err(err) = sessions.sweep_closed(max_age).await {
            log::warn!("Retention sweep failed: {err}");
        }
    }
    let provider = build_provider(&config);
    log::info!(
        "Sessions in {}, provider {}",
        config.sessions_dir.display(),
        provider.name()
    );

    let ctx = ToolContext::new(
        sessions,
        provider,
        Arc::new(BaselineGenerator::default()),
        config,
    );
    let dispatcher = Arc::new(Dispatcher::new(ctx));
    server::serve(dispatcher, tokio::io::stdin(), tokio::io::stdout()).await
}
