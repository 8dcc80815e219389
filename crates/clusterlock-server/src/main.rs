//! Main entry point for the `clusterlock` administration CLI.

use clap::Parser;
use tracing::debug;

use clusterlock_server::{Cli, Configuration, command, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::new(&cli)?;

    let _logging_guard = startup::init_logging(&configuration.logging_config())?;
    clusterlock_core::metrics::describe_metrics();

    debug!(command = ?cli.command, node = %configuration.node_id(), "Starting clusterlock");

    command::run(cli.command, &configuration).await
}
