//! Engine configuration — defaults layered with a TOML file and environment
//! overrides via the `config` crate, the same three-source precedence
//! `ClusterConfig::load` uses (compile-time defaults → file → env).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub helper: HelperClientConfig,
    pub worker: WorkerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    pub database_path: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HelperClientConfig {
    pub socket_path: String,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub pool_size: usize,
    pub start_timeout_secs: u64,
    pub network_wait_timeout_secs: u64,
    pub default_script_timeout_secs: u64,
    pub cancel_grace_period_secs: u64,
    pub proxmox_task_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig {
                database_path: "/var/lib/docktail/engine.db".into(),
                max_connections: 8,
            },
            helper: HelperClientConfig {
                socket_path: "/run/docktail/helper.sock".into(),
                request_timeout_secs: 30,
                max_body_bytes: 1 << 20,
            },
            worker: WorkerConfig {
                pool_size: 4,
                start_timeout_secs: 60,
                network_wait_timeout_secs: 60,
                default_script_timeout_secs: 600,
                cancel_grace_period_secs: 30,
                proxmox_task_timeout_secs: 300,
            },
            logging: LoggingConfig {
                level: "info,engine=debug".into(),
                json: false,
            },
        }
    }
}

impl EngineConfig {
    /// Priority: environment (`ENGINE__SECTION__FIELD`) > config file > defaults.
    pub fn load() -> Result<Self> {
        let defaults = config::Config::try_from(&EngineConfig::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        let config_paths = [
            "/etc/docktail/engine",
            "config/engine",
            "crates/engine/config/engine",
        ];
        for path in config_paths {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker.pool_size == 0 {
            anyhow::bail!("worker.pool_size must be > 0");
        }
        if self.store.database_path.is_empty() {
            anyhow::bail!("store.database_path must not be empty");
        }
        Ok(())
    }
}
