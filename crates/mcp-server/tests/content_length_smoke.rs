use anyhow::Result;
use serde_json::json;
use tempfile::TempDir;

mod support;

use support::McpProcess;

#[tokio::test]
async fn content_length_frames_are_answered_in_kind() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;

    server
        .send_framed(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {} }
        }))
        .await?;
    let init = server.recv_framed().await?;
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["protocolVersion"], "2024-11-05");

    server
        .send_framed(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await?;
    server
        .send_framed(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "ask", "arguments": { "question": "framed?" } }
        }))
        .await?;
    let reply = server.recv_framed().await?;
    assert_eq!(reply["id"], 2);
    assert_eq!(reply["result"]["structuredContent"]["state"], "completed");

    assert!(server.wait().await?.success());
    Ok(())
}
