use anyhow::Result;
use clap::Parser;
use git_watcher::{run, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    tracing::info!("git-watcher startup: tracing initialised, environment loaded");

    let cli = Cli::parse();
    tracing::info!("CLI arguments parsed, invoking run");
    let result = run(cli).await;
    match &result {
        Ok(()) => tracing::info!("git-watcher completed successfully"),
        Err(e) => tracing::error!(error = %e, "git-watcher exited with error"),
    }
    result
}
