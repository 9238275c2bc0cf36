use anyhow::{Context, Result};
use clap::Parser;

use saturated::config::{Cli, DaemonConfig};
use saturated::{http, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_format).context("Failed to initialize logging")?;

    let config = DaemonConfig::from_cli(&cli)
        .with_context(|| format!("Failed to resolve build user '{}'", cli.user))?;
    config
        .identity
        .verify()
        .context("Builds can't run as the configured user")?;

    config
        .identity
        .prepare_workdir(&config.workdir)
        .context("Builds can't use the configured workdir")?;

    tracing::info!(
        user = config.identity.name(),
        uid = config.identity.uid(),
        gid = config.identity.gid(),
        home = %config.identity.home().display(),
        "builds run as"
    );
    http::serve(config).await
}
