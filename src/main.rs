#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    analysis_desk::server::run().await
}
