// Library side of the `clusterlock` administration CLI

pub mod command; // Subcommand implementations
pub mod model; // CLI arguments and configuration
pub mod startup; // Logging and shutdown signal handling

pub use model::{Cli, Command, Configuration};
