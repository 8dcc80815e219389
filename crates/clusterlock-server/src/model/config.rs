//! Configuration management for the clusterlock CLI
//!
//! Settings are merged from, in increasing priority:
//! 1. the YAML file given by `--config` (default `conf/clusterlock.yml`, optional)
//! 2. `CLUSTERLOCK_*` environment variables, `__` separating nested keys
//!    (`CLUSTERLOCK_LOCK__LEASE_MS` sets `lock.lease_ms`)
//! 3. command line overrides (`--db-url` / `DATABASE_URL`, `--node-id`)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Environment};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tracing::Level;

use clusterlock_core::{HostnameNodeId, LockManagerConfig, NodeIdProvider};

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/clusterlock.yml";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "clusterlock", version, about = "Inspect and operate cluster-wide lock tables")]
pub struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    pub config_file: String,
    #[arg(long = "db-url", env = "DATABASE_URL")]
    pub database_url: Option<String>,
    /// Identity written to `lockOwner`; defaults to `<hostname>-<pid>`
    #[arg(long = "node-id")]
    pub node_id: Option<String>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create the lock table if it does not exist
    Init,
    /// List every held lock
    Locks {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the row of one lock
    Status { key: String },
    /// Ask the holder of a lock to release it
    Abort { key: String },
    /// Free locks not refreshed within the stale threshold
    Sweep,
    /// Free every lock owned by this node id
    Clear,
    /// Acquire a lock and hold it until interrupted
    Hold {
        key: String,
        /// Poll interval while the lock is busy
        #[arg(long = "wait-ms", default_value_t = 500)]
        wait_ms: u64,
        /// Give up after this long; 0 tries once
        #[arg(long = "timeout-ms", default_value_t = 0)]
        timeout_ms: u64,
    },
}

/// Application configuration loaded from config files and environment
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&cli.config_file).required(false))
            .add_source(
                Environment::with_prefix("clusterlock")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Some(v) = &cli.database_url {
            config_builder = config_builder.set_override("db.url", v.as_str())?;
        }
        if let Some(v) = &cli.node_id {
            config_builder = config_builder.set_override("node.id", v.as_str())?;
        }

        let config = config_builder
            .build()
            .with_context(|| format!("failed to build configuration from {}", cli.config_file))?;

        Ok(Configuration { config })
    }

    pub fn from_config(config: Config) -> Self {
        Configuration { config }
    }

    // ========================================================================
    // Lock Configuration
    // ========================================================================

    pub fn node_id(&self) -> String {
        self.config
            .get_string("node.id")
            .ok()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| HostnameNodeId.node_id())
    }

    /// The `lock` section, with defaults for anything unset
    pub fn lock_config(&self) -> anyhow::Result<LockManagerConfig> {
        let lock_config = match self.config.get::<LockManagerConfig>("lock") {
            Ok(lock_config) => lock_config,
            Err(ConfigError::NotFound(_)) => LockManagerConfig::default(),
            Err(e) => return Err(e).context("invalid lock configuration"),
        };
        lock_config.validate()?;
        Ok(lock_config)
    }

    // ========================================================================
    // Database Configuration
    // ========================================================================

    pub fn database_url(&self) -> anyhow::Result<String> {
        self.config
            .get_string("db.url")
            .context("no database configured: set db.url, CLUSTERLOCK_DB__URL or --db-url")
    }

    pub async fn database_connection(&self) -> anyhow::Result<DatabaseConnection> {
        let max_connections = self
            .config
            .get_int("db.pool.max_connections")
            .unwrap_or(10) as u32;
        let min_connections = self
            .config
            .get_int("db.pool.min_connections")
            .unwrap_or(1) as u32;
        let connect_timeout = self
            .config
            .get_int("db.pool.connect_timeout_secs")
            .unwrap_or(30) as u64;
        let acquire_timeout = self
            .config
            .get_int("db.pool.acquire_timeout_secs")
            .unwrap_or(8) as u64;
        let idle_timeout = self
            .config
            .get_int("db.pool.idle_timeout_secs")
            .unwrap_or(10) as u64;
        let sqlx_logging = self
            .config
            .get_bool("db.pool.sqlx_logging")
            .unwrap_or(false);

        let url = self.database_url()?;

        let mut opt = ConnectOptions::new(url);

        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .acquire_timeout(Duration::from_secs(acquire_timeout))
            .idle_timeout(Duration::from_secs(idle_timeout))
            .sqlx_logging(sqlx_logging)
            .sqlx_logging_level(tracing::log::LevelFilter::Debug);

        tracing::debug!(
            max_connections = max_connections,
            min_connections = min_connections,
            connect_timeout = connect_timeout,
            idle_timeout = idle_timeout,
            sqlx_logging = sqlx_logging,
            "Database connection pool configured"
        );

        let database_connection = Database::connect(opt)
            .await
            .context("failed to connect to the lock database")?;

        Ok(database_connection)
    }

    // ========================================================================
    // Logging Configuration
    // ========================================================================

    pub fn logging_config(&self) -> LoggingConfig {
        let defaults = LoggingConfig::default();
        LoggingConfig {
            log_dir: self
                .config
                .get_string("logs.path")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            console_output: self
                .config
                .get_bool("logs.console")
                .unwrap_or(defaults.console_output),
            file_logging: self
                .config
                .get_bool("logs.file")
                .unwrap_or(defaults.file_logging),
            level: self
                .config
                .get_string("logs.level")
                .ok()
                .and_then(|v| v.parse::<Level>().ok())
                .unwrap_or(defaults.level),
            rotation: defaults.rotation,
        }
    }
}
