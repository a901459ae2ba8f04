//! Completion provider collaborators.
//!
//! The server only needs `prompt -> text`; concrete backends live behind [`CompletionProvider`].

use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// `EX_TEMPFAIL` from sysexits.h.
const EXIT_RATE_LIMITED: i32 = 75;
/// `EX_UNAVAILABLE`.
const EXIT_UNAVAILABLE: i32 = 69;
/// `EX_DATAERR`.
const EXIT_INVALID_REQUEST: i32 = 65;
const STDERR_TAIL_CHARS: usize = 400;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Fully rendered prompt, context included.
    pub prompt: String,
    /// The caller's own words (question, topic or message) without context.
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Reported by the backend; estimated by the caller when absent.
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            prompt_tokens: None,
            completion_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("provider is rate limited: {0}")]
    RateLimited(String),

    #[error("provider did not answer within {0:?}")]
    Timeout(Duration),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider rejected the request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    pub fn reason(&self) -> &'static str {
        match self {
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Unavailable(_) => "unavailable",
            ProviderError::InvalidRequest(_) => "invalid_request",
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Sends partial output to `partials` as it arrives, then returns the full completion.
    ///
    /// The default implementation reports the whole answer as a single chunk.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        partials: mpsc::UnboundedSender<String>,
    ) -> Result<Completion, ProviderError> {
        let completion = self.complete(request).await?;
        let _ = partials.send(completion.text.clone());
        Ok(completion)
    }
}

/// Exponential backoff between attempts after [`ProviderError::Unavailable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry `attempt` (zero based), or `None` once retries are spent.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt);
        Some(
            self.initial_backoff
                .saturating_mul(factor)
                .min(self.max_backoff),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

/// Runs an external command per request.
///
/// The request is written to stdin as one JSON object; stdout is the answer text and is
/// streamed line by line. The child is killed if the call is dropped (for example on timeout).
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    retry: RetryPolicy,
}

impl CommandProvider {
    pub fn new(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            retry: RetryPolicy::none(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reruns the command while it reports `Unavailable`, unless output was already streamed.
    async fn run_with_retry(
        &self,
        request: &CompletionRequest,
        partials: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<Completion, ProviderError> {
        let mut attempt = 0;
        loop {
            let mut streamed = false;
            let outcome = self.run(request, partials, &mut streamed).await;
            let err = match outcome {
                Err(err @ ProviderError::Unavailable(_)) if !streamed => err,
                other => return other,
            };
            let Some(delay) = self.retry.delay(attempt) else {
                return Err(err);
            };
            attempt += 1;
            log::warn!(
                "Provider {} unavailable, retry {attempt}/{} in {delay:?}: {err}",
                self.program,
                self.retry.max_retries
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn run(
        &self,
        request: &CompletionRequest,
        partials: Option<&mpsc::UnboundedSender<String>>,
        streamed: &mut bool,
    ) -> Result<Completion, ProviderError> {
        let payload = serde_json::to_vec(request)
            .map_err(|e| ProviderError::InvalidRequest(format!("encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Unavailable(format!("spawn {}: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Unavailable("provider stdout unavailable".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::Unavailable("provider stderr unavailable".into()))?;

        // The three pipes are driven concurrently.
        let write_stdin = async move {
            if let Some(mut stdin) = stdin {
                // A provider that exits without reading stdin is judged by its exit status below.
                if let Err(err) = stdin.write_all(&payload).await {
                    log::debug!("Provider stdin closed early: {err}");
                }
            }
        };
        let read_stdout = async {
            let mut reader = BufReader::new(stdout);
            let mut text = String::new();
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line).await {
                    Ok(0) => return Ok(text),
                    Ok(_) => {
                        let chunk = String::from_utf8_lossy(&line);
                        if let Some(partials) = partials {
                            *streamed = true;
                            let _ = partials.send(chunk.to_string());
                        }
                        text.push_str(&chunk);
                    }
                    Err(err) => {
                        return Err(ProviderError::Unavailable(format!(
                            "read provider output: {err}"
                        )))
                    }
                }
            }
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        };
        let ((), text, err_text) = tokio::join!(write_stdin, read_stdout, read_stderr);
        let text = text?;

        let status = child
            .wait()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("wait for provider: {e}")))?;
        if status.success() {
            return Ok(Completion::text(text.trim_end().to_string()));
        }

        let detail = stderr_tail(&err_text);
        log::warn!("Provider {} exited with {status}: {detail}", self.program);
        Err(match status.code() {
            Some(EXIT_RATE_LIMITED) => ProviderError::RateLimited(detail),
            Some(EXIT_INVALID_REQUEST) => ProviderError::InvalidRequest(detail),
            Some(EXIT_UNAVAILABLE) => ProviderError::Unavailable(detail),
            Some(code) => ProviderError::Unavailable(format!("exit code {code}: {detail}")),
            None => ProviderError::Unavailable(format!("terminated by signal: {detail}")),
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect()
}

#[async_trait]
impl CompletionProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.program
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.run_with_retry(request, None).await
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        partials: mpsc::UnboundedSender<String>,
    ) -> Result<Completion, ProviderError> {
        self.run_with_retry(request, Some(&partials)).await
    }
}

/// Offline provider: answers deterministically from the request itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProvider;

impl EchoProvider {
    fn answer(request: &CompletionRequest) -> String {
        let input = request.input.trim();
        let mut out = String::from("## Echo\n\n");
        for line in input.lines() {
            out.push_str("> ");
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&format!(
            "\n- prompt: {} chars\n- context: {}\n",
            request.prompt.chars().count(),
            if request.prompt.contains("--- File: ") {
                "attached"
            } else {
                "none"
            }
        ));
        out
    }
}

#[async_trait]
impl CompletionProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        Ok(Completion::text(Self::answer(request)))
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        partials: mpsc::UnboundedSender<String>,
    ) -> Result<Completion, ProviderError> {
        let text = Self::answer(request);
        for line in text.split_inclusive('\n') {
            let _ = partials.send(line.to_string());
        }
        Ok(Completion::text(text))
    }
}

/// Provider that replays queued outcomes, for handler tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    pub(crate) outcomes:
        std::sync::Mutex<std::collections::VecDeque<Result<Completion, ProviderError>>>,
    pub(crate) delay: Option<Duration>,
    pub(crate) calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl ScriptedProvider {
    pub(crate) fn push(&self, outcome: Result<Completion, ProviderError>) {
        self.outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(outcome);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self
            .outcomes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(Completion::text(format!("answer to {}", request.input))))
    }
}
