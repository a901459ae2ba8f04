//! JSON-RPC dispatch: decode, route, validate, invoke, wrap.
//!
//! The dispatcher holds no mutable state of its own; the registry is fixed at construction and
//! all session mutation goes through the [`ToolContext`].

use std::sync::{Arc, OnceLock};

use colloquy_protocol::{
    decode_message, methods, Decoded, ErrorKind, InitializeResult, Message, RequestId, Response,
    RpcError, ServerCapabilities, ServerInfo, DEFAULT_PROTOCOL_VERSION,
};
use regex::Regex;
use serde_json::{json, Value};

use crate::progress::{NotificationSink, ProgressReporter};
use crate::resources;
use crate::tools::{self, ToolContext, ToolRegistry};
use crate::transport::Inbound;

pub const SERVER_NAME: &str = "colloquy-mcp";

const INSTRUCTIONS: &str = "Use `ask` for one-off questions and `discuss` + `continue` for \
multi-turn work. Attach files with `context_files` (paths, directories or globs, optionally \
with line ranges). Sessions are checkpointed after every turn; after a restart use \
`recover_session` or simply `continue`. Sessions are also readable as resources under \
`colloquy://sessions/{id}`.";

fn id_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#""id"\s*:\s*(-?\d+|"(?:[^"\\]|\\.)*")"#).ok())
        .as_ref()
}

/// Best-effort id recovery from a frame that is not valid JSON.
fn recover_id(raw: &[u8]) -> Option<RequestId> {
    let text = String::from_utf8_lossy(raw);
    let captures = id_pattern()?.captures(&text)?;
    serde_json::from_str(captures.get(1)?.as_str()).ok()
}

pub struct Dispatcher {
    registry: ToolRegistry,
    ctx: ToolContext,
    server_info: ServerInfo,
}

impl Dispatcher {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            registry: ToolRegistry::new(&ctx.config),
            ctx,
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.ctx
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Handles one inbound frame. `None` means nothing is sent back.
    pub async fn handle(
        &self,
        inbound: Inbound,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Option<Value> {
        match inbound {
            Inbound::Malformed(raw) => self.malformed(&raw),
            Inbound::Json(Value::Array(items)) => self.batch(items, sink).await,
            Inbound::Json(value) => self.single(value, sink).await,
        }
    }

    /// Byte-level entry point for callers without a transport.
    pub async fn dispatch(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let inbound = match serde_json::from_slice::<Value>(raw) {
            Ok(value) => Inbound::Json(value),
            Err(_) => Inbound::Malformed(raw.to_vec()),
        };
        let reply = self.handle(inbound, None).await?;
        serde_json::to_vec(&reply).ok()
    }

    fn malformed(&self, raw: &[u8]) -> Option<Value> {
        match recover_id(raw) {
            Some(id) => {
                log::warn!("Malformed frame ({} bytes) for request {id}", raw.len());
                let error = RpcError::new(ErrorKind::ParseError, "parse error", None);
                encode(Response::failure(Some(id), error))
            }
            None => {
                log::warn!(
                    "Dropping malformed frame ({} bytes) without a recoverable id",
                    raw.len()
                );
                None
            }
        }
    }

    async fn batch(
        &self,
        items: Vec<Value>,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Option<Value> {
        if items.is_empty() {
            let error = RpcError::new(ErrorKind::InvalidRequest, "empty batch", None);
            return encode(Response::failure(None, error));
        }
        log::debug!("Batch of {} messages", items.len());
        let mut replies = Vec::new();
        for item in items {
            if let Some(reply) = self.single(item, sink.clone()).await {
                replies.push(reply);
            }
        }
        if replies.is_empty() {
            None
        } else {
            Some(Value::Array(replies))
        }
    }

    async fn single(
        &self,
        value: Value,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Option<Value> {
        match decode_message(value) {
            Decoded::Invalid { id, reason } => {
                log::warn!("Invalid request: {reason}");
                let id = id?;
                let error = RpcError::new(ErrorKind::InvalidRequest, reason, None);
                encode(Response::failure(Some(id), error))
            }
            Decoded::Message(message) => self.message(message, sink).await,
        }
    }

    async fn message(
        &self,
        message: Message,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Option<Value> {
        let Some(id) = message.id.clone() else {
            log::debug!("Notification {}", message.method);
            return None;
        };
        if message.method.starts_with(methods::NOTIFICATION_PREFIX) {
            log::debug!("Ignoring {} sent with id {id}", message.method);
            return None;
        }
        log::debug!("Request {id}: {}", message.method);

        let outcome = match message.method.as_str() {
            methods::INITIALIZE => self.initialize(&message.params),
            methods::TOOLS_LIST => Ok(json!({ "tools": self.registry.infos() })),
            methods::PING => Ok(json!({})),
            methods::TOOLS_CALL => self.tools_call(&message.params, sink).await,
            methods::RESOURCES_LIST => match resources::list(&self.ctx).await {
                Ok(result) => serde_json::to_value(result).map_err(internal),
                Err(err) => Err(err.to_rpc()),
            },
            methods::RESOURCES_READ => match resources::read(&self.ctx, &message.params).await {
                Ok(result) => serde_json::to_value(result).map_err(internal),
                Err(err) => Err(err.to_rpc()),
            },
            other => Err(RpcError::new(
                ErrorKind::MethodNotFound,
                format!("method `{other}` not found"),
                Some(json!({ "method": other })),
            )),
        };
        let response = match outcome {
            Ok(result) => Response::success(id, result),
            Err(error) => Response::failure(Some(id), error),
        };
        encode(response)
    }

    fn initialize(&self, params: &Value) -> Result<Value, RpcError> {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION)
            .to_string();
        if let Some(client) = params.get("clientInfo").and_then(|c| c.get("name")) {
            log::info!("Client {client} connected (protocol {protocol_version})");
        }
        let result = InitializeResult {
            protocol_version,
            server_info: self.server_info.clone(),
            capabilities: ServerCapabilities::new(self.ctx.config.streaming),
            instructions: INSTRUCTIONS.to_string(),
            tools: self.registry.infos(),
        };
        serde_json::to_value(result).map_err(internal)
    }

    async fn tools_call(
        &self,
        params: &Value,
        sink: Option<Arc<dyn NotificationSink>>,
    ) -> Result<Value, RpcError> {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return Err(RpcError::new(
                ErrorKind::InvalidParams,
                "tools/call requires a tool `name`",
                Some(json!({ "parameter": "name" })),
            ));
        };
        let Some(tool) = self.registry.get(name) else {
            return Err(RpcError::new(
                ErrorKind::MethodNotFound,
                format!("unknown tool `{name}`"),
                Some(json!({ "tool": name })),
            ));
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let token = params
            .get("_meta")
            .and_then(|meta| meta.get("progressToken"))
            .filter(|token| !token.is_null());
        let progress = match (sink, token) {
            (Some(sink), Some(token)) if self.ctx.config.streaming => {
                ProgressReporter::new(sink, token.clone())
            }
            _ => ProgressReporter::disabled(),
        };

        match tools::invoke(tool, &arguments, &self.ctx, &progress).await {
            Ok(result) => serde_json::to_value(result).map_err(internal),
            Err(err) => Err(err.to_rpc()),
        }
    }
}

fn internal(err: serde_json::Error) -> RpcError {
    log::error!("Failed to encode result: {err}");
    RpcError::new(ErrorKind::InternalError, "internal error", None)
}

fn encode(response: Response) -> Option<Value> {
    match serde_json::to_value(response) {
        Ok(value) => Some(value),
        Err(err) => {
            log::error!("Failed to encode response: {err}");
            None
        }
    }
}
