#![allow(dead_code)]

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

pub const IO_TIMEOUT: Duration = Duration::from_secs(10);

pub fn locate_colloquy_mcp_bin() -> Result<PathBuf> {
    if let Some(path) = option_env!("CARGO_BIN_EXE_colloquy-mcp") {
        return Ok(PathBuf::from(path));
    }

    // Try to resolve from the current test executable location.
    if let Ok(exe) = std::env::current_exe() {
        if let Some(target_profile_dir) = exe.parent().and_then(|p| p.parent()) {
            let candidate = target_profile_dir.join("colloquy-mcp");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let repo_root = manifest_dir
        .ancestors()
        .nth(2)
        .context("failed to resolve repo root from CARGO_MANIFEST_DIR")?;
    for rel in ["target/debug/colloquy-mcp", "target/release/colloquy-mcp"] {
        let candidate = repo_root.join(rel);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    anyhow::bail!("failed to locate colloquy-mcp binary; build with: cargo build -p colloquy-mcp")
}

/// A server process speaking newline-delimited JSON-RPC.
pub struct McpProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl McpProcess {
    /// Spawns with an isolated sessions directory and no inherited `COLLOQUY_*` settings.
    pub fn spawn(sessions_dir: &Path, args: &[&str]) -> Result<Self> {
        let bin = locate_colloquy_mcp_bin()?;
        let mut cmd = Command::new(bin);
        cmd.args(args)
            .env("COLLOQUY_SESSIONS_DIR", sessions_dir)
            .env("RUST_LOG", "warn")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for key in [
            "COLLOQUY_CONFIG",
            "COLLOQUY_LOG",
            "COLLOQUY_STREAMING",
            "COLLOQUY_PROVIDER_CMD",
            "COLLOQUY_PROVIDER_TIMEOUT_MS",
            "COLLOQUY_CONTEXT_MAX_BYTES",
            "COLLOQUY_CONTEXT_ROOT",
            "COLLOQUY_DUMP_FRAMES",
            "COLLOQUY_PROVIDER_RETRIES",
            "COLLOQUY_RETAIN_CLOSED_DAYS",
        ] {
            cmd.env_remove(key);
        }

        let mut child = cmd.spawn().context("spawn colloquy-mcp")?;
        let stdin = child.stdin.take().context("stdin")?;
        let stdout = child.stdout.take().context("stdout")?;
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().context("stdin already closed")?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    pub async fn send(&mut self, msg: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.send_raw(&line).await
    }

    pub async fn recv(&mut self) -> Result<Value> {
        let mut line = String::new();
        let n = tokio::time::timeout(IO_TIMEOUT, self.stdout.read_line(&mut line))
            .await
            .context("timeout reading line")??;
        anyhow::ensure!(n > 0, "EOF while reading line");
        serde_json::from_str(line.trim_end()).with_context(|| format!("parse line: {line}"))
    }

    /// Reads until the response carrying `id`, returning it with every notification seen first.
    pub async fn recv_response(&mut self, id: i64) -> Result<(Value, Vec<Value>)> {
        let mut notifications = Vec::new();
        loop {
            let msg = self.recv().await?;
            if msg.get("id") == Some(&json!(id)) {
                return Ok((msg, notifications));
            }
            notifications.push(msg);
        }
    }

    pub async fn request(&mut self, id: i64, method: &str, params: Value) -> Result<Value> {
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;
        Ok(self.recv_response(id).await?.0)
    }

    pub async fn initialize(&mut self) -> Result<Value> {
        let reply = self
            .request(
                1,
                "initialize",
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": { "name": "colloquy-tests", "version": "0.0.0" }
                }),
            )
            .await?;
        self.send(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await?;
        Ok(reply)
    }

    pub async fn call_tool(&mut self, id: i64, name: &str, arguments: Value) -> Result<Value> {
        self.request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }

    /// `structuredContent` of a successful tool call.
    pub async fn call_ok(&mut self, id: i64, name: &str, arguments: Value) -> Result<Value> {
        let reply = self.call_tool(id, name, arguments).await?;
        anyhow::ensure!(reply.get("error").is_none(), "{name} failed: {reply}");
        reply["result"]["structuredContent"]
            .as_object()
            .map(|obj| Value::Object(obj.clone()))
            .with_context(|| format!("{name} returned no structured content: {reply}"))
    }

    /// Sends one `Content-Length` framed message.
    pub async fn send_framed(&mut self, msg: &Value) -> Result<()> {
        let stdin = self.stdin.as_mut().context("stdin already closed")?;
        send_frame(stdin, msg).await
    }

    pub async fn recv_framed(&mut self) -> Result<Value> {
        read_frame(&mut self.stdout).await
    }

    pub fn close_stdin(&mut self) {
        self.stdin.take();
    }

    pub async fn wait(mut self) -> Result<ExitStatus> {
        self.close_stdin();
        tokio::time::timeout(IO_TIMEOUT, self.child.wait())
            .await
            .context("timeout waiting for server exit")?
            .context("wait for server")
    }
}

pub async fn send_frame<W: AsyncWrite + Unpin>(stdin: &mut W, msg: &Value) -> Result<()> {
    let body = serde_json::to_vec(msg)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    stdin.write_all(header.as_bytes()).await?;
    stdin.write_all(&body).await?;
    stdin.flush().await?;
    Ok(())
}

pub async fn read_frame<R: AsyncBufRead + Unpin>(stdout: &mut R) -> Result<Value> {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = tokio::time::timeout(IO_TIMEOUT, stdout.read_line(&mut line))
            .await
            .context("timeout reading header")??;
        anyhow::ensure!(n > 0, "EOF while reading headers");
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = Some(value.trim().parse()?);
            }
        }
    }
    let len = content_length.context("missing Content-Length header")?;
    let mut body = vec![0u8; len];
    tokio::time::timeout(IO_TIMEOUT, stdout.read_exact(&mut body))
        .await
        .context("timeout reading body")??;
    Ok(serde_json::from_slice(&body)?)
}
