use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaultbox::{config, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "vaultbox=debug,tower_http=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    server::run(config).await?;
    Ok(())
}
