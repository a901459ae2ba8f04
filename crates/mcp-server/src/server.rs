use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use crate::dispatcher::Dispatcher;
use crate::progress::NotificationSink;
use crate::transport;

/// Serves one client until its input closes or the process is interrupted.
///
/// Frames are read in arrival order; each is handled on its own task so a slow provider call
/// does not hold up requests for other sessions. On shutdown, in-flight requests finish and
/// their responses are flushed before the session store is closed.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, read: R, write: W) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, writer, write_task) = transport::hybrid(read, write);
    let sink: Arc<dyn NotificationSink> = Arc::new(writer.clone());
    let mut inflight = JoinSet::new();

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            frame = reader.next() => {
                let Some(frame) = frame else {
                    log::info!("Input closed; finishing {} in-flight request(s)", inflight.len());
                    break;
                };
                let dispatcher = Arc::clone(&dispatcher);
                let writer = writer.clone();
                let sink = Arc::clone(&sink);
                inflight.spawn(async move {
                    if let Some(reply) = dispatcher.handle(frame, Some(sink)).await {
                        if let Err(err) = writer.send(&reply).await {
                            log::warn!("Failed to send response: {err}");
                        }
                    }
                });
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(err) = joined {
                    log::error!("Request task failed: {err}");
                }
            }
            _ = &mut interrupted => {
                log::info!("Interrupted; no longer reading input");
                break;
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        if let Err(err) = joined {
            log::error!("Request task failed: {err}");
        }
    }
    drop(sink);
    drop(writer);
    write_task.await.context("writer task")?;

    dispatcher
        .context()
        .sessions
        .shutdown()
        .await
        .context("close session store")?;
    log::info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineGenerator;
    use crate::config::Config;
    use crate::provider::EchoProvider;
    use crate::tools::ToolContext;
    use colloquy_session::{MemorySessionStore, SessionManager};
    use serde_json::{json, Value};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    fn dispatcher() -> Arc<Dispatcher> {
        let config = Config::default();
        let sessions = SessionManager::new(
            Arc::new(MemorySessionStore::new()),
            config.manager_config(),
        );
        Arc::new(Dispatcher::new(ToolContext::new(
            sessions,
            Arc::new(EchoProvider),
            Arc::new(BaselineGenerator::default()),
            config,
        )))
    }

    #[tokio::test]
    async fn answers_then_exits_on_eof() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let serving = tokio::spawn(serve(dispatcher(), server_read, server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .expect("write");
        client_write.shutdown().await.expect("close input");
        drop(client_write);

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.expect("read").expect("one line");
        let reply: Value = serde_json::from_str(&line).expect("json");
        assert_eq!(reply, json!({ "jsonrpc": "2.0", "id": 1, "result": {} }));

        serving.await.expect("join").expect("serve");
    }
}
