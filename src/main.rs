//! CLI entry point for toptica-daq
//!
//! Loads the configuration, initializes tracing and runs one command. See
//! `toptica-daq --help`.

use anyhow::{anyhow, Result};
use clap::Parser;
use toptica_daq::cli::{self, Cli};
use toptica_daq::config::{Settings, DEFAULT_CONFIG_PATH};
use toptica_daq::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.config.as_os_str() != DEFAULT_CONFIG_PATH && !cli.config.exists() {
        return Err(anyhow!(
            "Configuration file {} does not exist",
            cli.config.display()
        ));
    }
    let mut settings = Settings::load_from(&cli.config)?;
    cli.apply_overrides(&mut settings);
    settings.validate().map_err(|e| anyhow!(e))?;

    telemetry::init_from_settings(&settings).map_err(|e| anyhow!(e))?;
    tracing::debug!(config = %cli.config.display(), mock = cli.mock, "Configuration loaded");

    cli::run(cli.command, settings).await
}
