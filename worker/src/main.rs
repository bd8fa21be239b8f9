mod worker;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rollout_worker=debug,reqwest=info")),
        )
        .init();

    worker::run(worker::WorkerConfig::from_env()).await
}
