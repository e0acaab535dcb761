use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    appdraft::run().await
}
