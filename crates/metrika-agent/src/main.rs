use anyhow::Result;
use metrika_agent::{Agent, AgentConfig};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("metrika_agent=info".parse()?)
                .add_directive("metrika_collector=info".parse()?),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    let mut config = AgentConfig::load(&config_path)?;
    config.apply_env(|key| std::env::var(key).ok())?;

    tracing::info!(
        server = %config.updates_url(),
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        rate_limit = config.rate_limit,
        batch_size = config.batch_size,
        compression = ?config.compression,
        signed = config.secret_key.as_deref().is_some_and(|k| !k.is_empty()),
        "metrika-agent starting"
    );

    let agent = Agent::from_config(&config)?;
    let handle = agent.start(CancellationToken::new())?;

    signal::ctrl_c().await?;
    tracing::info!("Shutting down gracefully");
    handle.shutdown().await;

    Ok(())
}
