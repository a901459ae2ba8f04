use clap::Parser;
use colloquy_context::{ResolveOptions, DEFAULT_BUDGET_BYTES, DEFAULT_MAX_FILE_BYTES};
use colloquy_session::{ManagerConfig, DEFAULT_CACHE_CAPACITY, DEFAULT_MAX_TURNS};

use crate::provider::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "COLLOQUY_CONFIG";
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_TURNS: u32 = 3;
pub const DEFAULT_RETAIN_CHECKPOINTS: usize = 16;
pub const DEFAULT_PROVIDER_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const MAX_RETRY_BACKOFF_MS: u64 = 30_000;
pub const DEFAULT_RETAIN_CLOSED_DAYS: u32 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Command-line flags. Every flag overrides the file and environment layers.
#[derive(Debug, Default, Parser)]
#[command(name = "colloquy-mcp")]
#[command(about = "MCP server for durable multi-turn consultations over stdio", long_about = None)]
#[command(version)]
pub struct Cli {
    /// TOML configuration file (overrides COLLOQUY_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding session checkpoints
    #[arg(long)]
    pub sessions_dir: Option<PathBuf>,

    /// env_logger filter, e.g. `info` or `colloquy_session=debug`
    #[arg(long)]
    pub log_filter: Option<String>,

    /// Completion command line, split on whitespace
    #[arg(long)]
    pub provider_cmd: Option<String>,

    /// Provider call timeout in milliseconds
    #[arg(long)]
    pub provider_timeout_ms: Option<u64>,

    /// Base directory for relative context paths
    #[arg(long)]
    pub context_root: Option<PathBuf>,

    /// Default byte budget for resolved context
    #[arg(long)]
    pub context_max_bytes: Option<usize>,

    /// Never emit partial-result notifications
    #[arg(long)]
    pub no_streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderConfig {
    /// Program followed by its arguments. Empty selects the offline echo provider.
    pub command: Vec<String>,
    pub timeout_ms: u64,
    pub max_tokens: Option<u32>,
    /// Extra attempts after the command reports itself unavailable. Zero disables retries.
    pub max_retries: u32,
    /// First backoff; doubles per attempt up to thirty seconds.
    pub retry_backoff_ms: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            max_backoff: Duration::from_millis(MAX_RETRY_BACKOFF_MS.max(self.retry_backoff_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextConfig {
    pub max_bytes: usize,
    pub max_file_bytes: u64,
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionsConfig {
    pub default_turns: u32,
    pub max_turns: u32,
    pub cache_capacity: usize,
    pub retain_checkpoints: usize,
    /// Completed and failed sessions older than this are deleted at startup. Zero keeps them.
    pub retain_closed_days: u32,
}

impl SessionsConfig {
    pub fn closed_retention(&self) -> Option<Duration> {
        (self.retain_closed_days > 0)
            .then(|| Duration::from_secs(u64::from(self.retain_closed_days) * 24 * 60 * 60))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub sessions_dir: PathBuf,
    pub log_filter: Option<String>,
    pub streaming: bool,
    pub provider: ProviderConfig,
    pub context: ContextConfig,
    pub sessions: SessionsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            log_filter: None,
            streaming: true,
            provider: ProviderConfig {
                command: Vec::new(),
                timeout_ms: DEFAULT_PROVIDER_TIMEOUT_MS,
                max_tokens: None,
                max_retries: DEFAULT_PROVIDER_RETRIES,
                retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            },
            context: ContextConfig {
                max_bytes: DEFAULT_BUDGET_BYTES,
                max_file_bytes: DEFAULT_MAX_FILE_BYTES,
                root: PathBuf::from("."),
            },
            sessions: SessionsConfig {
                default_turns: DEFAULT_TURNS,
                max_turns: DEFAULT_MAX_TURNS,
                cache_capacity: DEFAULT_CACHE_CAPACITY,
                retain_checkpoints: DEFAULT_RETAIN_CHECKPOINTS,
                retain_closed_days: DEFAULT_RETAIN_CLOSED_DAYS,
            },
        }
    }
}

fn default_sessions_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".colloquy")
        .join("sessions")
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    sessions_dir: Option<PathBuf>,
    log_filter: Option<String>,
    streaming: Option<bool>,
    provider: Option<RawProvider>,
    context: Option<RawContext>,
    sessions: Option<RawSessions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProvider {
    command: Option<Vec<String>>,
    timeout_ms: Option<u64>,
    max_tokens: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContext {
    max_bytes: Option<usize>,
    max_file_bytes: Option<u64>,
    root: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSessions {
    default_turns: Option<u32>,
    max_turns: Option<u32>,
    cache_capacity: Option<usize>,
    retain_checkpoints: Option<usize>,
    retain_closed_days: Option<u32>,
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}")))
}

fn parse_bool_env(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("{raw:?} is not a boolean"))),
    }
}

fn split_command(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

impl Config {
    /// Defaults, then the TOML file, then `COLLOQUY_*` variables, then `cli`.
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        Self::load_with(cli, |key| std::env::var(key).ok())
    }

    pub fn load_with(
        cli: &Cli,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let file = cli
            .config
            .clone()
            .or_else(|| env(CONFIG_ENV).filter(|v| !v.trim().is_empty()).map(PathBuf::from));
        if let Some(path) = file {
            config.apply_file(&path)?;
        }
        config.apply_env(&env)?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_raw(parse_raw(Path::new("<inline>"), text)?);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw = parse_raw(path, &text)?;
        self.apply_raw(raw);
        log::debug!("Loaded configuration from {}", path.display());
        Ok(())
    }

    fn apply_raw(&mut self, raw: RawConfig) {
        if let Some(dir) = raw.sessions_dir {
            self.sessions_dir = dir;
        }
        if raw.log_filter.is_some() {
            self.log_filter = raw.log_filter;
        }
        if let Some(streaming) = raw.streaming {
            self.streaming = streaming;
        }
        if let Some(provider) = raw.provider {
            if let Some(command) = provider.command {
                self.provider.command = command;
            }
            if let Some(timeout_ms) = provider.timeout_ms {
                self.provider.timeout_ms = timeout_ms;
            }
            if provider.max_tokens.is_some() {
                self.provider.max_tokens = provider.max_tokens;
            }
            if let Some(v) = provider.max_retries {
                self.provider.max_retries = v;
            }
            if let Some(v) = provider.retry_backoff_ms {
                self.provider.retry_backoff_ms = v;
            }
        }
        if let Some(context) = raw.context {
            if let Some(max_bytes) = context.max_bytes {
                self.context.max_bytes = max_bytes;
            }
            if let Some(max_file_bytes) = context.max_file_bytes {
                self.context.max_file_bytes = max_file_bytes;
            }
            if let Some(root) = context.root {
                self.context.root = root;
            }
        }
        if let Some(sessions) = raw.sessions {
            if let Some(v) = sessions.default_turns {
                self.sessions.default_turns = v;
            }
            if let Some(v) = sessions.max_turns {
                self.sessions.max_turns = v;
            }
            if let Some(v) = sessions.cache_capacity {
                self.sessions.cache_capacity = v;
            }
            if let Some(v) = sessions.retain_checkpoints {
                self.sessions.retain_checkpoints = v;
            }
            if let Some(v) = sessions.retain_closed_days {
                self.sessions.retain_closed_days = v;
            }
        }
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var("COLLOQUY_SESSIONS_DIR") {
            self.sessions_dir = PathBuf::from(dir.trim());
        }
        if let Some(filter) = var("COLLOQUY_LOG") {
            self.log_filter = Some(filter);
        }
        if let Some(raw) = var("COLLOQUY_STREAMING") {
            self.streaming = parse_bool_env("COLLOQUY_STREAMING", &raw)?;
        }
        if let Some(raw) = var("COLLOQUY_PROVIDER_CMD") {
            self.provider.command = split_command(&raw);
        }
        if let Some(raw) = var("COLLOQUY_PROVIDER_TIMEOUT_MS") {
            self.provider.timeout_ms = parse_env("COLLOQUY_PROVIDER_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = var("COLLOQUY_PROVIDER_RETRIES") {
            self.provider.max_retries = parse_env("COLLOQUY_PROVIDER_RETRIES", &raw)?;
        }
        if let Some(raw) = var("COLLOQUY_RETAIN_CLOSED_DAYS") {
            self.sessions.retain_closed_days = parse_env("COLLOQUY_RETAIN_CLOSED_DAYS", &raw)?;
        }
        if let Some(raw) = var("COLLOQUY_CONTEXT_MAX_BYTES") {
            self.context.max_bytes = parse_env("COLLOQUY_CONTEXT_MAX_BYTES", &raw)?;
        }
        if let Some(root) = var("COLLOQUY_CONTEXT_ROOT") {
            self.context.root = PathBuf::from(root.trim());
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.sessions_dir {
            self.sessions_dir = dir.clone();
        }
        if let Some(filter) = &cli.log_filter {
            self.log_filter = Some(filter.clone());
        }
        if let Some(cmd) = &cli.provider_cmd {
            self.provider.command = split_command(cmd);
        }
        if let Some(timeout_ms) = cli.provider_timeout_ms {
            self.provider.timeout_ms = timeout_ms;
        }
        if let Some(root) = &cli.context_root {
            self.context.root = root.clone();
        }
        if let Some(max_bytes) = cli.context_max_bytes {
            self.context.max_bytes = max_bytes;
        }
        if cli.no_streaming {
            self.streaming = false;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("provider.timeout_ms", self.provider.timeout_ms == 0),
            (
                "provider.retry_backoff_ms",
                self.provider.max_retries > 0 && self.provider.retry_backoff_ms == 0,
            ),
            ("context.max_bytes", self.context.max_bytes == 0),
            ("context.max_file_bytes", self.context.max_file_bytes == 0),
            ("sessions.default_turns", self.sessions.default_turns == 0),
            ("sessions.max_turns", self.sessions.max_turns == 0),
            ("sessions.cache_capacity", self.sessions.cache_capacity == 0),
            ("sessions.retain_checkpoints", self.sessions.retain_checkpoints == 0),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::invalid(key, "must be greater than zero"));
        }
        if self.sessions.default_turns > self.sessions.max_turns {
            return Err(ConfigError::invalid(
                "sessions.default_turns",
                format!(
                    "{} exceeds sessions.max_turns ({})",
                    self.sessions.default_turns, self.sessions.max_turns
                ),
            ));
        }
        if self.provider.command.iter().any(|part| part.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "provider.command",
                "entries must be non-empty strings",
            ));
        }
        if self.sessions_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("sessions_dir", "must not be empty"));
        }
        Ok(())
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            cache_capacity: self.sessions.cache_capacity,
            max_turns: self.sessions.max_turns,
        }
    }

    /// Base resolver options; tools override budget, category and focus per call.
    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            budget_bytes: self.context.max_bytes,
            max_file_bytes: self.context.max_file_bytes,
            root: self.context.root.clone(),
            ..ResolveOptions::default()
        }
    }
}

fn parse_raw(path: &Path, text: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str::<RawConfig>(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn layers_apply_in_precedence_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("colloquy.toml");
        std::fs::write(
            &file,
            r#"
sessions_dir = "/from/file"
log_filter = "debug"

[provider]
command = ["my-llm", "--json"]
timeout_ms = 5000

[sessions]
max_turns = 8
"#,
        )
        .expect("write");

        let cli = Cli {
            config: Some(file),
            provider_timeout_ms: Some(9000),
            ..Cli::default()
        };
        let env = env_of(&[
            ("COLLOQUY_SESSIONS_DIR", "/from/env"),
            ("COLLOQUY_PROVIDER_TIMEOUT_MS", "7000"),
        ]);
        let config = Config::load_with(&cli, env).expect("load");

        assert_eq!(config.sessions_dir, PathBuf::from("/from/env"));
        assert_eq!(config.log_filter.as_deref(), Some("debug"));
        assert_eq!(config.provider.command, vec!["my-llm", "--json"]);
        assert_eq!(config.provider.timeout_ms, 9000);
        assert_eq!(config.sessions.max_turns, 8);
        assert_eq!(config.sessions.default_turns, DEFAULT_TURNS);
    }

    #[test]
    fn non_numeric_env_value_names_the_variable() {
        let err = Config::load_with(
            &Cli::default(),
            env_of(&[("COLLOQUY_CONTEXT_MAX_BYTES", "lots")]),
        )
        .expect_err("invalid");
        assert!(err.to_string().contains("COLLOQUY_CONTEXT_MAX_BYTES"), "{err}");
    }

    #[test]
    fn zero_limits_are_rejected() {
        let err = Config::from_toml_str("[sessions]\ncache_capacity = 0\n").expect_err("zero");
        assert!(
            matches!(&err, ConfigError::Invalid { key, .. } if key == "sessions.cache_capacity"),
            "{err}"
        );
    }

    #[test]
    fn unknown_keys_fail_to_parse() {
        let err = Config::from_toml_str("[provider]\ncomand = [\"x\"]\n").expect_err("typo");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_command_is_split_on_whitespace() {
        let config = Config::load_with(
            &Cli::default(),
            env_of(&[("COLLOQUY_PROVIDER_CMD", "python3  bridge.py --fast")]),
        )
        .expect("load");
        assert_eq!(config.provider.command, vec!["python3", "bridge.py", "--fast"]);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Cli::default()
        };
        let err = Config::load_with(&cli, env_of(&[])).expect_err("missing");
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn retry_and_retention_keys_layer_like_the_rest() {
        let config = Config::from_toml_str(
            "[provider]\nmax_retries = 4\nretry_backoff_ms = 250\n\n[sessions]\nretain_closed_days = 7\n",
        )
        .expect("parse");
        assert_eq!(
            config.provider.retry_policy(),
            RetryPolicy {
                max_retries: 4,
                initial_backoff: Duration::from_millis(250),
                max_backoff: Duration::from_millis(MAX_RETRY_BACKOFF_MS),
            }
        );
        assert_eq!(
            config.sessions.closed_retention(),
            Some(Duration::from_secs(7 * 24 * 60 * 60))
        );

        let env = env_of(&[
            ("COLLOQUY_PROVIDER_RETRIES", "0"),
            ("COLLOQUY_RETAIN_CLOSED_DAYS", "0"),
        ]);
        let config = Config::load_with(&Cli::default(), env).expect("load");
        assert_eq!(config.provider.retry_policy().delay(0), None);
        assert_eq!(config.sessions.closed_retention(), None);
    }
}
