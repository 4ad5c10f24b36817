use clap::Parser as _;
use kar_sidecar::Config;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let config = Config::parse();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(&config.log).unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	tracing::warn!("starting...");
	let result = kar_sidecar::run(config).await;
	tracing::warn!("exiting...");
	result
}
