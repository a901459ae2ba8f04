use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    colloquy_mcp::main_entry().await
}
