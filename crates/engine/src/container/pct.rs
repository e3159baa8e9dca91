//! `ContainerManager` over the real Proxmox CLI (`pct`, `pvesh`). Ops that
//! mutate LXC config, touch restricted paths, or exec inside the container
//! are routed through the helper client instead of invoked directly —
//! the unprivileged engine process never shells out to them itself
//! (spec §4.2).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::helper_client::HelperClient;

use super::types::{
    ContainerError, ContainerState, CreateOpts, DeviceDescriptor, ExecOutcome, MountSource,
    StatusDetail, StorageInfo,
};
use super::ContainerManager;

#[derive(Debug, Clone)]
pub struct PctContainerManager {
    helper: HelperClient,
    /// Lower/upper bounds for `AllocateCTID` (spec §4.3: CTID ∈ [100, 999999999]).
    ctid_range: (u32, u32),
}

impl PctContainerManager {
    pub fn new(helper: HelperClient) -> Self {
        Self {
            helper,
            ctid_range: (100, 999_999_999),
        }
    }

    fn pct_command(&self) -> Command {
        Command::new("pct")
    }

    async fn run_pct(&self, args: &[&str]) -> Result<String, ContainerError> {
        let output = self
            .pct_command()
            .args(args)
            .output()
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))?;
        if !output.status.success() {
            return Err(ContainerError::TaskFailed(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerManager for PctContainerManager {
    async fn allocate_ctid(&self) -> Result<u32, ContainerError> {
        let out = self
            .run_pct(&["list"])
            .await
            .unwrap_or_default();
        let used: std::collections::HashSet<u32> = out
            .lines()
            .skip(1)
            .filter_map(|line| line.split_whitespace().next())
            .filter_map(|s| s.parse().ok())
            .collect();
        (self.ctid_range.0..=self.ctid_range.1)
            .find(|c| !used.contains(c))
            .ok_or_else(|| ContainerError::Transport("CTID space exhausted".into()))
    }

    async fn create(&self, opts: CreateOpts) -> Result<(), ContainerError> {
        let mut args = vec![
            "create".to_string(),
            opts.ctid.to_string(),
            opts.ostemplate.clone(),
            "--hostname".into(),
            opts.hostname.clone(),
            "--cores".into(),
            opts.cores.to_string(),
            "--memory".into(),
            opts.memory_mb.to_string(),
            "--storage".into(),
            opts.storage.clone(),
            "--rootfs".into(),
            format!("{}:{}", opts.storage, opts.disk_gb),
            "--unprivileged".into(),
            if opts.unprivileged { "1" } else { "0" }.into(),
            "--onboot".into(),
            if opts.onboot { "1" } else { "0" }.into(),
        ];

        let net = match &opts.ip_config {
            Some(ip) => format!(
                "name=eth0,bridge={},hwaddr={},ip={},gw={}",
                opts.bridge, opts.hwaddr, ip.cidr, ip.gateway
            ),
            None => format!("name=eth0,bridge={},hwaddr={},ip=dhcp", opts.bridge, opts.hwaddr),
        };
        args.push("--net0".into());
        args.push(net);

        if let Some(pool) = &opts.pool {
            args.push("--pool".into());
            args.push(pool.clone());
        }
        if !opts.features.is_empty() {
            args.push("--features".into());
            args.push(opts.features.join(","));
        }
        if !opts.tags.is_empty() {
            args.push("--tags".into());
            args.push(opts.tags.join(";"));
        }
        for mp in &opts.mount_points {
            let spec = match &mp.source {
                MountSource::Volume { storage, size_gb } => format!(
                    "{}:{},mp={},ro={}",
                    storage, size_gb, mp.mount_path, mp.read_only as u8
                ),
                MountSource::ExistingVolume { volume_id } => {
                    format!("{},mp={},ro={}", volume_id, mp.mount_path, mp.read_only as u8)
                }
                MountSource::Bind { host_path } => {
                    format!("{},mp={},ro={}", host_path, mp.mount_path, mp.read_only as u8)
                }
            };
            args.push(format!("--mp{}", mp.index));
            args.push(spec);
        }

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_pct(&arg_refs).await.map(|_| ())
    }

    async fn start(&self, ctid: u32) -> Result<(), ContainerError> {
        self.run_pct(&["start", &ctid.to_string()]).await.map(|_| ())
    }

    async fn stop(&self, ctid: u32) -> Result<(), ContainerError> {
        self.run_pct(&["stop", &ctid.to_string()]).await.map(|_| ())
    }

    async fn shutdown(&self, ctid: u32, timeout_secs: u64) -> Result<(), ContainerError> {
        self.run_pct(&["shutdown", &ctid.to_string(), "--timeout", &timeout_secs.to_string()])
            .await
            .map(|_| ())
    }

    async fn destroy(&self, ctid: u32, keep_volumes: bool) -> Result<(), ContainerError> {
        let ctid_s = ctid.to_string();
        let mut args = vec!["destroy", &ctid_s];
        if keep_volumes {
            args.push("--destroy-unreferenced-disks");
            args.push("0");
        }
        self.run_pct(&args).await.map(|_| ())
    }

    async fn status(&self, ctid: u32) -> Result<StatusDetail, ContainerError> {
        let out = self.run_pct(&["status", &ctid.to_string(), "--verbose"]).await?;
        let mut status = ContainerState::Unknown;
        let mut field = |key: &str| -> Option<String> {
            out.lines()
                .find(|l| l.starts_with(key))
                .and_then(|l| l.split(':').nth(1))
                .map(|v| v.trim().to_string())
        };
        if let Some(s) = field("status") {
            status = match s.as_str() {
                "running" => ContainerState::Running,
                "stopped" => ContainerState::Stopped,
                _ => ContainerState::Unknown,
            };
        }
        Ok(StatusDetail {
            status,
            uptime_secs: field("uptime").and_then(|v| v.parse().ok()).unwrap_or(0),
            cpu: field("cpu").and_then(|v| v.parse().ok()).unwrap_or(0.0),
            cpus: field("cpus").and_then(|v| v.parse().ok()).unwrap_or(0),
            mem: field("mem").and_then(|v| v.parse().ok()).unwrap_or(0),
            maxmem: field("maxmem").and_then(|v| v.parse().ok()).unwrap_or(0),
            disk: field("disk").and_then(|v| v.parse().ok()).unwrap_or(0),
            maxdisk: field("maxdisk").and_then(|v| v.parse().ok()).unwrap_or(0),
            netin: field("netin").and_then(|v| v.parse().ok()).unwrap_or(0),
            netout: field("netout").and_then(|v| v.parse().ok()).unwrap_or(0),
        })
    }

    async fn exec(&self, ctid: u32, argv: &[String]) -> Result<ExecOutcome, ContainerError> {
        let resp = self
            .helper
            .pct_exec(ctid, argv)
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))?;
        Ok(ExecOutcome {
            output: resp.output,
            exit_code: resp.exit_code,
        })
    }

    async fn exec_stream(
        &self,
        ctid: u32,
        argv: &[String],
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<i32, ContainerError> {
        self.helper
            .pct_exec_stream(ctid, argv, on_line)
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))
    }

    async fn push(&self, ctid: u32, host_src: &str, ct_dst: &str, perms: Option<&str>) -> Result<(), ContainerError> {
        self.helper
            .pct_push(ctid, host_src, ct_dst, perms)
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))
    }

    async fn configure_devices(&self, ctid: u32, devices: &[DeviceDescriptor]) -> Result<(), ContainerError> {
        for (idx, d) in devices.iter().enumerate() {
            let mut value = d.path.clone();
            if let Some(gid) = d.gid {
                value.push_str(&format!(",gid={gid}"));
            }
            if let Some(mode) = &d.mode {
                value.push_str(&format!(",mode={mode}"));
            }
            self.helper
                .pct_set(ctid, &format!("-dev{idx}"), &value)
                .await
                .map_err(|e| ContainerError::Transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn mount_host_path(
        &self,
        ctid: u32,
        index: u32,
        host_path: &str,
        ct_path: &str,
        read_only: bool,
    ) -> Result<(), ContainerError> {
        let value = format!("{host_path},mp={ct_path},ro={}", read_only as u8);
        self.helper
            .pct_set(ctid, &format!("-mp{index}"), &value)
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))
    }

    async fn append_lxc_config(&self, ctid: u32, lines: &[String]) -> Result<(), ContainerError> {
        self.helper
            .conf_append(ctid, lines)
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))
    }

    async fn detach_mount_points(&self, ctid: u32, indices: &[u32]) -> Result<(), ContainerError> {
        let ctid_s = ctid.to_string();
        let mut args = vec!["set", ctid_s.as_str(), "--delete"];
        let joined = indices.iter().map(|i| format!("mp{i}")).collect::<Vec<_>>().join(",");
        args.push(&joined);
        self.run_pct(&args).await.map(|_| ())
    }

    async fn get_storage_info(&self, storage_id: &str) -> Result<StorageInfo, ContainerError> {
        let out = Command::new("pvesh")
            .args(["get", &format!("/storage/{storage_id}"), "--output-format", "json"])
            .stdout(Stdio::piped())
            .output()
            .await
            .map_err(|e| ContainerError::Transport(e.to_string()))?;
        let parsed: serde_json::Value = serde_json::from_slice(&out.stdout)
            .map_err(|e| ContainerError::Transport(e.to_string()))?;
        Ok(StorageInfo {
            kind: parsed.get("type").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            path: parsed.get("path").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            browsable: parsed.get("shared").and_then(|v| v.as_bool()).unwrap_or(false),
        })
    }

    async fn resolve_template(&self, name: &str, storage: &str) -> Result<String, ContainerError> {
        let mut child = Command::new("pveam")
            .args(["list", storage])
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| ContainerError::Transport(e.to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| ContainerError::Transport("no stdout".into()))?;
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains(name) {
                if let Some(vol) = line.split_whitespace().next() {
                    return Ok(vol.to_string());
                }
            }
        }
        child.wait().await.ok();
        Err(ContainerError::NotFound(0))
    }
}
