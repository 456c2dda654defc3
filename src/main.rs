use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    aetherpet::app::run().await
}
