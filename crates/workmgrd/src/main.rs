//! Entry point for the workmgrd daemon binary.
//! Loads the configuration, sets up logging and runs the publish loop until
//! a termination signal arrives.

use anyhow::Context as _;
use tracing::Instrument as _;
use workmgrd::config::Config;
use workmgrd::logging::{self, COMPONENT, LogSettings, SYSTEM};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("invalid configuration")?;
    logging::init(LogSettings::from(&config));
    let span = tracing::info_span!("work_manager", system = SYSTEM, component = COMPONENT);
    let stats = workmgrd::daemon::run(config).instrument(span).await?;
    tracing::debug!(?stats, "Publish loop finished");
    Ok(())
}
