//! Manifest types consumed by the `validating` step (spec §1: "the engine is
//! given parsed manifests" — the catalog fetcher/parser is out of scope).
//! This module only defines the shape the job engine reads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Manifest {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub volumes: Vec<VolumeSpec>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub script: String,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub ostemplate: Option<String>,
    /// Resource hints surfaced by `ValidateStack` (spec §6.1); absent in
    /// hand-authored manifests, so callers fall back to small defaults.
    #[serde(default)]
    pub recommended_cores: Option<u32>,
    #[serde(default)]
    pub recommended_memory_mb: Option<u32>,
    #[serde(default)]
    pub recommended_disk_gb: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: InputKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub enum_values: Vec<String>,
    /// Only required/shown when this expression (`"other_key == value"`) holds.
    #[serde(default)]
    pub show_when: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    String,
    Number,
    Bool,
    Enum,
    Port,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VolumeSpec {
    pub name: String,
    pub mount_path: String,
    #[serde(rename = "type", default = "default_volume_type")]
    pub kind: VolumeKind,
    #[serde(default)]
    pub size_gb: Option<u32>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub read_only: bool,
}

fn default_volume_type() -> VolumeKind {
    VolumeKind::Volume
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VolumeKind {
    Volume,
    Bind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSpec {
    pub path: String,
    #[serde(default)]
    pub gid: Option<u32>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Resolves a parsed `Manifest` for an `(app_id, app_version)` pair. The
/// catalog that produces manifest JSON (fetch, parse, sign-check) is out of
/// scope here (spec §1); the engine only needs the parsed result.
#[async_trait::async_trait]
pub trait ManifestSource: Send + Sync {
    async fn load(&self, app_id: &str, app_version: &str) -> crate::error::EngineResult<Manifest>;
}

/// Reads manifests from `<root>/<app_id>/<app_version>.json` on local disk —
/// the shape a catalog sync process would already materialize them into.
pub struct FsManifestSource {
    pub root: std::path::PathBuf,
}

#[async_trait::async_trait]
impl ManifestSource for FsManifestSource {
    async fn load(&self, app_id: &str, app_version: &str) -> crate::error::EngineResult<Manifest> {
        let path = self.root.join(app_id).join(format!("{app_version}.json"));
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| crate::error::EngineError::fatal(format!("read manifest {path:?} failed: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::EngineError::fatal(format!("parse manifest {path:?} failed: {e}")))
    }
}
