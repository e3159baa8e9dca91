//! Configuration model and loading — mirrors the two-tier (file, then env
//! override) precedence the job engine's sibling agent crate uses.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Unix socket the helper listens on.
    pub socket_path: String,
    /// Directory the socket lives in; permissions are enforced on both.
    pub socket_dir_mode: u32,
    pub socket_mode: u32,
    /// Numeric uid of the unprivileged service user allowed to call in.
    pub service_uid: u32,
    /// Path to the engine's SQLite database, opened read-only for CTID checks.
    pub engine_db_path: String,
    /// Root directories the fs path policy treats as safe storage.
    pub allowed_storage_roots: Vec<String>,
    /// Directories `pct/push` sources may come from.
    pub push_source_roots: Vec<String>,
    /// Fixed path to the self-update binary.
    pub update_binary_path: String,
    pub audit_log_path: String,
    pub exec_semaphore: usize,
    pub terminal_semaphore: usize,
    pub max_body_bytes: usize,
    /// gid values the `-devN` option validator accepts.
    pub allowed_device_gids: Vec<u32>,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            socket_path: "/run/docktail/helper.sock".into(),
            socket_dir_mode: 0o750,
            socket_mode: 0o660,
            service_uid: 1000,
            engine_db_path: "/var/lib/docktail/engine.db".into(),
            allowed_storage_roots: vec!["/mnt/".into(), "/tank/".into(), "/data/".into()],
            push_source_roots: vec![
                "/var/lib/docktail/scratch".into(),
                "/var/lib/docktail/catalog".into(),
                "/var/lib/docktail/dev-apps".into(),
            ],
            update_binary_path: "/usr/local/bin/docktail-helper.new".into(),
            audit_log_path: "/var/log/docktail/helper-audit.log".into(),
            exec_semaphore: 20,
            terminal_semaphore: 5,
            max_body_bytes: 1 << 20,
            allowed_device_gids: vec![0, 44, 195],
        }
    }
}

impl HelperConfig {
    /// Priority: environment variables > config file > defaults.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("HELPER_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/docktail/helper.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!(path = %config_path, "loading helper configuration");
            Self::from_file(&config_path)?
        } else {
            tracing::info!("no config file at {config_path}, using defaults + env");
            Self::default()
        };

        if let Ok(v) = std::env::var("HELPER_SOCKET_PATH") {
            config.socket_path = v;
        }
        if let Ok(v) = std::env::var("HELPER_ENGINE_DB_PATH") {
            config.engine_db_path = v;
        }
        if let Ok(v) = std::env::var("HELPER_SERVICE_UID") {
            config.service_uid = v.parse()?;
        }
        if let Ok(v) = std::env::var("HELPER_AUDIT_LOG_PATH") {
            config.audit_log_path = v;
        }

        Ok(config)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.socket_path.is_empty() {
            return Err("socket_path must not be empty".into());
        }
        if self.exec_semaphore == 0 || self.terminal_semaphore == 0 {
            return Err("semaphore capacities must be > 0".into());
        }
        Ok(())
    }

    pub fn socket_dir(&self) -> PathBuf {
        Path::new(&self.socket_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}

/// Per-request device allowlist, kept separate from `HelperConfig` because it
/// encodes fixed protocol knowledge (spec §4.3 `-devN` regexes), not deployment
/// configuration.
pub fn gpu_device_path_patterns() -> &'static [&'static str] {
    &[
        r"^/dev/dri/(card|render)\d+$",
        r"^/dev/nvidia\d*$",
        r"^/dev/nvidia-uvm(-tools)?$",
        r"^/dev/nvidiactl$",
        r"^/dev/net/tun$",
    ]
}
