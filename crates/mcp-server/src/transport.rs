use async_trait::async_trait;
use base64::Engine as _;
use colloquy_protocol::Notification;
use serde::Serialize;
use serde_json::Value;
use std::io;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::progress::NotificationSink;

pub const DUMP_FRAMES_ENV: &str = "COLLOQUY_DUMP_FRAMES";

const MAX_BUFFER_BYTES: usize = if cfg!(test) { 4096 } else { 32 * 1024 * 1024 };
const MAX_MESSAGE_BYTES: usize = if cfg!(test) { 1024 } else { 16 * 1024 * 1024 };
const CONTENT_LENGTH_PREFIX: &[u8] = b"content-length:";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Framing {
    Unknown,
    NewlineJson,
    ContentLength,
}

impl Framing {
    const fn to_u8(self) -> u8 {
        match self {
            Framing::Unknown => 0,
            Framing::NewlineJson => 1,
            Framing::ContentLength => 2,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Framing::NewlineJson,
            2 => Framing::ContentLength,
            _ => Framing::Unknown,
        }
    }
}

/// Framing detected by the reader, shared with every writer handle.
#[derive(Clone, Debug, Default)]
struct SharedFraming(Arc<AtomicU8>);

impl SharedFraming {
    fn get(&self) -> Framing {
        Framing::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, framing: Framing) {
        self.0.store(framing.to_u8(), Ordering::Release);
    }
}

/// One inbound unit as seen by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Syntactically valid JSON (an object, a batch array, or anything else).
    Json(Value),
    /// Bytes that did not parse; the dispatcher decides whether an id can be salvaged.
    Malformed(Vec<u8>),
}

const fn is_ascii_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn now_unix_ms() -> u64 {
    colloquy_session::now_ms()
}

#[derive(Debug)]
struct FrameDump {
    file: std::fs::File,
}

#[derive(Serialize)]
struct FrameDumpLine<'a> {
    ts_ms: u64,
    dir: &'a str,
    len: usize,
    b64: String,
}

type SharedDump = Arc<Mutex<FrameDump>>;

fn frame_dump_from_env() -> Option<SharedDump> {
    let raw_path = std::env::var(DUMP_FRAMES_ENV).ok()?;
    let trimmed = raw_path.trim();
    if trimmed.is_empty() {
        return None;
    }

    let path = PathBuf::from(trimmed);
    let final_path = if path.is_dir() {
        path.join(format!("colloquy_frames_{}.jsonl", std::process::id()))
    } else {
        path
    };
    if let Some(parent) = final_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&final_path)
    {
        Ok(file) => file,
        Err(err) => {
            log::warn!("Frame dump disabled: {}: {err}", final_path.display());
            return None;
        }
    };

    let mut dump = FrameDump { file };
    let _ = writeln!(
        dump.file,
        "{}",
        serde_json::json!({
            "ts_ms": now_unix_ms(),
            "event": "start",
            "pid": std::process::id(),
        })
    );
    Some(Arc::new(Mutex::new(dump)))
}

fn dump_frame(dump: Option<&SharedDump>, dir: &str, bytes: &[u8]) {
    let Some(dump) = dump else {
        return;
    };
    let Ok(mut guard) = dump.lock() else {
        return;
    };
    let line = FrameDumpLine {
        ts_ms: now_unix_ms(),
        dir,
        len: bytes.len(),
        b64: base64::engine::general_purpose::STANDARD.encode(bytes),
    };
    if let Ok(payload) = serde_json::to_string(&line) {
        let _ = writeln!(guard.file, "{payload}");
    }
}

fn strip_utf8_bom(buf: &mut Vec<u8>) {
    const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
    if buf.starts_with(BOM) {
        buf.drain(..BOM.len());
    }
}

fn starts_with_content_length(buf: &[u8]) -> bool {
    buf.len() >= CONTENT_LENGTH_PREFIX.len()
        && buf[..CONTENT_LENGTH_PREFIX.len()].eq_ignore_ascii_case(CONTENT_LENGTH_PREFIX)
}

fn first_non_ws_byte(buf: &[u8]) -> Option<(usize, u8)> {
    let start = buf.iter().position(|b| !is_ascii_whitespace(*b))?;
    Some((start, buf[start]))
}

fn trim_ascii_whitespace(bytes: &[u8]) -> &[u8] {
    let Some(start) = bytes.iter().position(|b| !is_ascii_whitespace(*b)) else {
        return &[];
    };
    let end = bytes
        .iter()
        .rposition(|b| !is_ascii_whitespace(*b))
        .map_or(bytes.len(), |pos| pos + 1);
    &bytes[start..end]
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    // Prefer CRLFCRLF, fall back to LFLF.
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

fn parse_content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|raw_line| {
        let line = raw_line.trim_end_matches('\r').trim();
        if !starts_with_content_length(line.as_bytes()) {
            return None;
        }
        line[CONTENT_LENGTH_PREFIX.len()..].trim().parse::<usize>().ok()
    })
}

fn invalid_data(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Splits a duplex byte stream into a frame reader and a cloneable writer handle.
///
/// Framing is auto-detected from the first non-whitespace input bytes: newline-delimited JSON
/// or LSP-style `Content-Length: N\r\n\r\n<json>`. Replies use whatever framing was detected.
/// The returned task owns the write half; it finishes once every [`FrameWriter`] is dropped.
pub fn hybrid<R, W>(read: R, write: W) -> (FrameReader<R>, FrameWriter, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dump = frame_dump_from_env();
    let framing = SharedFraming::default();
    let (write_tx, write_rx) = mpsc::channel::<WriteRequest>(16);
    let write_task = tokio::spawn(run_write_loop(write, write_rx, dump.clone()));
    let reader = FrameReader {
        read,
        buf: Vec::new(),
        framing: framing.clone(),
        dump,
        eof: false,
    };
    let writer = FrameWriter {
        tx: write_tx,
        framing,
    };
    (reader, writer, write_task)
}

pub struct FrameReader<R> {
    read: R,
    buf: Vec<u8>,
    framing: SharedFraming,
    dump: Option<SharedDump>,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn framing(&self) -> Framing {
        self.framing.get()
    }

    /// Next inbound unit, or `None` once the stream is closed (EOF, read error, or a size cap).
    pub async fn next(&mut self) -> Option<Inbound> {
        loop {
            match self.try_decode() {
                Ok(Some(inbound)) => return Some(inbound),
                Ok(None) => {}
                Err(err) => {
                    log::error!("Error reading from stream: {err}");
                    return None;
                }
            }
            if self.eof {
                return self.drain_at_eof();
            }

            let mut tmp = [0u8; 8192];
            let n = match self.read.read(&mut tmp).await {
                Ok(n) => n,
                Err(err) => {
                    log::error!("Error reading from stream: {err}");
                    return None;
                }
            };
            if n == 0 {
                // Some runners write a single request and close stdin; decode what is buffered.
                self.eof = true;
                continue;
            }
            dump_frame(self.dump.as_ref(), "rx", &tmp[..n]);
            self.buf.extend_from_slice(&tmp[..n]);
            if self.buf.len() > MAX_BUFFER_BYTES {
                log::error!(
                    "Input buffer exceeded maximum size ({} > {MAX_BUFFER_BYTES}); closing transport",
                    self.buf.len()
                );
                return None;
            }
        }
    }

    fn drain_at_eof(&mut self) -> Option<Inbound> {
        let rest = std::mem::take(&mut self.buf);
        let trimmed = trim_ascii_whitespace(&rest);
        if trimmed.is_empty() {
            return None;
        }
        if self.framing.get() == Framing::ContentLength {
            log::warn!(
                "Stream closed with {} bytes of an incomplete frame",
                trimmed.len()
            );
            return None;
        }
        Some(match serde_json::from_slice::<Value>(trimmed) {
            Ok(value) => Inbound::Json(value),
            Err(_) => Inbound::Malformed(trimmed.to_vec()),
        })
    }

    fn detect_framing(&mut self) {
        if self.framing.get() != Framing::Unknown {
            return;
        }
        strip_utf8_bom(&mut self.buf);
        let Some((start, _)) = first_non_ws_byte(&self.buf) else {
            self.buf.clear();
            return;
        };
        self.buf.drain(..start);
        if starts_with_content_length(&self.buf) {
            self.framing.set(Framing::ContentLength);
        } else if self.buf.len() >= CONTENT_LENGTH_PREFIX.len()
            || !CONTENT_LENGTH_PREFIX.starts_with(&self.buf.to_ascii_lowercase())
        {
            self.framing.set(Framing::NewlineJson);
        }
    }

    fn try_decode(&mut self) -> io::Result<Option<Inbound>> {
        self.detect_framing();
        match self.framing.get() {
            Framing::Unknown => Ok(None),
            Framing::NewlineJson => self.try_decode_newline(),
            Framing::ContentLength => self.try_decode_content_length(),
        }
    }

    fn try_decode_newline(&mut self) -> io::Result<Option<Inbound>> {
        loop {
            let Some((start, first)) = first_non_ws_byte(&self.buf) else {
                self.buf.clear();
                return Ok(None);
            };
            if starts_with_content_length(&self.buf[start..]) {
                self.buf.drain(..start);
                self.framing.set(Framing::ContentLength);
                return self.try_decode_content_length();
            }

            // Pretty-printed (multi-line) JSON is parsed as a stream, not line by line.
            if matches!(first, b'{' | b'[') {
                let mut stream =
                    serde_json::Deserializer::from_slice(&self.buf[start..]).into_iter::<Value>();
                match stream.next() {
                    Some(Ok(value)) => {
                        let used = start.saturating_add(stream.byte_offset());
                        self.buf.drain(..used);
                        return Ok(Some(Inbound::Json(value)));
                    }
                    Some(Err(err)) if err.is_eof() => return Ok(None),
                    // Syntax error: fall back to the line containing it.
                    Some(Err(_)) | None => {}
                }
            }

            let Some(nl) = self.buf[start..].iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let line = self.buf.drain(..=start + nl).collect::<Vec<u8>>();
            let trimmed = trim_ascii_whitespace(&line);
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.len() > MAX_MESSAGE_BYTES {
                return Err(invalid_data(format!(
                    "line of {} bytes exceeds maximum supported message size {MAX_MESSAGE_BYTES}",
                    trimmed.len()
                )));
            }
            return Ok(Some(match serde_json::from_slice::<Value>(trimmed) {
                Ok(value) => Inbound::Json(value),
                Err(_) => Inbound::Malformed(trimmed.to_vec()),
            }));
        }
    }

    fn try_decode_content_length(&mut self) -> io::Result<Option<Inbound>> {
        let Some(header_end) = find_double_newline(&self.buf) else {
            return Ok(None);
        };
        let header_str = std::str::from_utf8(&self.buf[..header_end])
            .map_err(|e| invalid_data(e.to_string()))?;
        let Some(len) = parse_content_length(header_str) else {
            return Err(invalid_data("missing Content-Length header"));
        };

        if len > MAX_MESSAGE_BYTES {
            return Err(invalid_data(format!(
                "Content-Length {len} exceeds maximum supported message size {MAX_MESSAGE_BYTES}"
            )));
        }
        if header_end + len > MAX_BUFFER_BYTES {
            return Err(invalid_data(format!(
                "message size {} exceeds maximum buffer size {MAX_BUFFER_BYTES}",
                header_end + len
            )));
        }
        if self.buf.len() < header_end + len {
            return Ok(None);
        }

        let body = self.buf[header_end..header_end + len].to_vec();
        self.buf.drain(..header_end + len);
        Ok(Some(match serde_json::from_slice::<Value>(&body) {
            Ok(value) => Inbound::Json(value),
            Err(_) => Inbound::Malformed(body),
        }))
    }
}

struct WriteRequest {
    bytes: Vec<u8>,
    reply: oneshot::Sender<io::Result<()>>,
}

async fn run_write_loop<W: AsyncWrite + Unpin>(
    mut write: W,
    mut rx: mpsc::Receiver<WriteRequest>,
    dump: Option<SharedDump>,
) {
    while let Some(req) = rx.recv().await {
        dump_frame(dump.as_ref(), "tx", &req.bytes);
        let result = async {
            write.write_all(&req.bytes).await?;
            write.flush().await?;
            Ok(())
        }
        .await;
        let should_stop = result.is_err();
        let _ = req.reply.send(result);
        if should_stop {
            break;
        }
    }
    let _ = write.shutdown().await;
}

fn encode_frame(framing: Framing, json: Vec<u8>) -> Vec<u8> {
    match framing {
        Framing::ContentLength => {
            let mut out = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
            out.extend_from_slice(&json);
            out
        }
        Framing::Unknown | Framing::NewlineJson => {
            let mut out = json;
            out.push(b'\n');
            out
        }
    }
}

/// Serialises outbound frames through the single writer task.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<WriteRequest>,
    framing: SharedFraming,
}

impl FrameWriter {
    /// Resolves once the frame has been written and flushed.
    pub async fn send(&self, value: &Value) -> io::Result<()> {
        let json = serde_json::to_vec(value).map_err(io::Error::other)?;
        let bytes = encode_frame(self.framing.get(), json);
        let closed = || io::Error::new(io::ErrorKind::NotConnected, "transport closed");

        let (reply_tx, reply_rx) = oneshot::channel::<io::Result<()>>();
        self.tx
            .send(WriteRequest {
                bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| closed())?;
        reply_rx.await.map_err(|_| closed())?
    }
}

#[async_trait]
impl NotificationSink for FrameWriter {
    async fn notify(&self, notification: Notification) -> io::Result<()> {
        let value = serde_json::to_value(&notification).map_err(io::Error::other)?;
        self.send(&value).await
    }
}
