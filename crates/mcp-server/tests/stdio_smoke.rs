use anyhow::{Context, Result};
use serde_json::{json, Value};
use tempfile::TempDir;

mod support;

use support::McpProcess;

fn error_code(reply: &Value) -> Option<i64> {
    reply.get("error")?.get("code")?.as_i64()
}

#[tokio::test]
async fn initialize_and_list_tools() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;

    let init = server.initialize().await?;
    assert_eq!(init["result"]["protocolVersion"], "2025-06-18");
    assert_eq!(init["result"]["serverInfo"]["name"], "colloquy-mcp");

    let listed = server.request(2, "tools/list", json!({})).await?;
    let tools = listed["result"]["tools"]
        .as_array()
        .context("tools/list returned no tools")?;
    let mut names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "ask",
            "close_session",
            "continue",
            "discuss",
            "export_session",
            "health",
            "list_sessions",
            "recover_session",
            "resolve_context",
            "session_status",
        ]
    );
    for tool in tools {
        assert_eq!(tool["inputSchema"]["type"], "object", "{tool}");
        assert!(tool.get("outputSchema").is_some(), "{tool}");
    }

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn ask_attaches_file_context() -> Result<()> {
    let sessions = TempDir::new()?;
    let project = TempDir::new()?;
    std::fs::write(project.path().join("notes.md"), "# Notes\nuse a btree\n")?;
    let root = project.path().to_string_lossy().to_string();
    let mut server = McpProcess::spawn(sessions.path(), &["--context-root", &root])?;
    server.initialize().await?;

    let result = server
        .call_ok(
            2,
            "ask",
            json!({ "question": "Which index?", "context_files": ["notes.md"] }),
        )
        .await?;
    assert_eq!(result["state"], "completed");
    assert_eq!(result["turn"], 1);
    assert_eq!(result["turnsLimit"], 1);
    let response = result["response"].as_str().context("response")?;
    assert!(response.starts_with("## Echo"), "{response}");
    assert!(response.contains("> Which index?"), "{response}");
    assert!(response.contains("context: attached"), "{response}");
    assert_eq!(result["context"]["fragments"][0]["sourcePath"], "notes.md");

    let listed = server
        .call_ok(3, "list_sessions", json!({ "kind": "single_turn" }))
        .await?;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["sessions"][0]["id"], result["sessionId"]);

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn discussion_runs_to_its_turn_limit() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;
    server.initialize().await?;

    let opened = server
        .call_ok(
            2,
            "discuss",
            json!({ "topic": "Cache eviction", "max_turns": 2, "use_baseline": false }),
        )
        .await?;
    let id = opened["sessionId"].as_str().context("session id")?.to_string();
    assert_eq!(opened["state"], "checkpointed");
    assert_eq!(opened["remainingTurns"], 1);

    let second = server
        .call_ok(3, "continue", json!({ "session_id": id, "message": "And LFU?" }))
        .await?;
    assert_eq!(second["state"], "completed");
    assert_eq!(second["turn"], 2);
    assert_eq!(second["remainingTurns"], 0);

    let third = server
        .call_tool(4, "continue", json!({ "session_id": id, "message": "More?" }))
        .await?;
    assert_eq!(error_code(&third), Some(-32604), "{third}");

    let status = server
        .call_ok(
            5,
            "session_status",
            json!({ "session_id": id, "include_transcript": true }),
        )
        .await?;
    assert_eq!(status["stats"]["turns"], "2/2");
    assert_eq!(status["transcript"].as_array().map(Vec::len), Some(2));

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn sessions_are_listed_read_and_exported() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;
    let init = server.initialize().await?;
    assert_eq!(init["result"]["capabilities"]["resources"]["subscribe"], false);

    let asked = server
        .call_ok(2, "ask", json!({ "question": "Which index?" }))
        .await?;
    let id = asked["sessionId"].as_str().context("session id")?.to_string();
    let uri = format!("colloquy://sessions/{id}");

    let listed = server.request(3, "resources/list", json!({})).await?;
    assert_eq!(listed["result"]["resources"][0]["uri"], uri, "{listed}");

    let read = server
        .request(4, "resources/read", json!({ "uri": uri }))
        .await?;
    let body = read["result"]["contents"][0]["text"]
        .as_str()
        .context("resource text")?;
    let session: Value = serde_json::from_str(body)?;
    assert_eq!(session["state"], "completed");

    let export = server
        .call_ok(5, "export_session", json!({ "session_id": id }))
        .await?;
    let document = export["document"].as_str().context("document")?;
    assert!(document.starts_with("# Which index?"), "{document}");
    assert!(document.contains("## Turn 1"), "{document}");

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn protocol_errors_carry_codes() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;
    server.initialize().await?;

    let unknown_tool = server.call_tool(2, "summarize", json!({})).await?;
    assert_eq!(error_code(&unknown_tool), Some(-32601), "{unknown_tool}");

    let missing = server.call_tool(3, "ask", json!({})).await?;
    assert_eq!(error_code(&missing), Some(-32602), "{missing}");

    let bad_id = server
        .call_tool(4, "continue", json!({ "session_id": "../etc", "message": "hi" }))
        .await?;
    assert_eq!(error_code(&bad_id), Some(-32602), "{bad_id}");

    let absent = server
        .call_tool(
            5,
            "session_status",
            json!({ "session_id": "discuss_1700000000000_deadbeef" }),
        )
        .await?;
    assert_eq!(error_code(&absent), Some(-32605), "{absent}");

    let method = server.request(6, "prompts/list", json!({})).await?;
    assert_eq!(error_code(&method), Some(-32601), "{method}");

    // The id survives a frame that is not valid JSON.
    server.send_raw(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\n").await?;
    let (parse_error, _) = server.recv_response(7).await?;
    assert_eq!(error_code(&parse_error), Some(-32700), "{parse_error}");

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn batch_returns_one_reply_per_request() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;
    server.initialize().await?;

    server
        .send(&json!([
            { "jsonrpc": "2.0", "id": 10, "method": "ping" },
            { "jsonrpc": "2.0", "method": "notifications/cancelled" },
            { "jsonrpc": "2.0", "id": 11, "method": "tools/call",
              "params": { "name": "health", "arguments": {} } }
        ]))
        .await?;
    let reply = server.recv().await?;
    let replies = reply.as_array().context("batch reply is an array")?;
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], 10);
    assert_eq!(replies[1]["id"], 11);
    assert_eq!(replies[1]["result"]["structuredContent"]["status"], "ok");
    assert_eq!(replies[1]["result"]["structuredContent"]["tools"], 10);

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn streaming_progress_precedes_the_response() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &[])?;
    server.initialize().await?;

    server
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "ask",
                "arguments": { "question": "line one\nline two" },
                "_meta": { "progressToken": "p-1" }
            }
        }))
        .await?;
    let (reply, notifications) = server.recv_response(2).await?;
    assert!(!notifications.is_empty());
    for note in &notifications {
        assert_eq!(note["method"], "notifications/progress");
        assert_eq!(note["params"]["progressToken"], "p-1");
    }
    let partials = reply["result"]["structuredContent"]["partials"]
        .as_u64()
        .context("partials")?;
    assert_eq!(partials as usize, notifications.len());

    assert!(server.wait().await?.success());
    Ok(())
}

#[tokio::test]
async fn no_streaming_flag_suppresses_progress() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(sessions.path(), &["--no-streaming"])?;
    server.initialize().await?;

    server
        .send(&json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "ask",
                "arguments": { "question": "quiet" },
                "_meta": { "progressToken": 9 }
            }
        }))
        .await?;
    let (reply, notifications) = server.recv_response(2).await?;
    assert!(notifications.is_empty(), "{notifications:?}");
    assert_eq!(reply["result"]["structuredContent"]["partials"], 0);

    assert!(server.wait().await?.success());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn slow_provider_times_out_without_advancing() -> Result<()> {
    let sessions = TempDir::new()?;
    let mut server = McpProcess::spawn(
        sessions.path(),
        &["--provider-cmd", "sleep 5", "--provider-timeout-ms", "200"],
    )?;
    server.initialize().await?;

    let reply = server
        .call_tool(2, "discuss", json!({ "topic": "slow", "use_baseline": false }))
        .await?;
    assert_eq!(error_code(&reply), Some(-32607), "{reply}");
    let id = reply["error"]["data"]["session_id"]
        .as_str()
        .context("timeout error names the session")?
        .to_string();

    let status = server
        .call_ok(3, "session_status", json!({ "session_id": id }))
        .await?;
    assert_eq!(status["session"]["turnsCompleted"], 0);
    assert_eq!(status["session"]["state"], "active");

    assert!(server.wait().await?.success());
    Ok(())
}
