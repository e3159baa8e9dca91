//! LXC config-append allowlist (spec §4.3). Only the six listed keys are
//! accepted; everything else — including the explicitly-named dangerous
//! keys — is rejected outright.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::HelperConfig;
use crate::error::HelperError;
use crate::validate::path_policy;

const REJECTED_KEYS: &[&str] = &[
    "lxc.apparmor.profile",
    "lxc.seccomp.profile",
    "lxc.cap.drop",
    "lxc.cap.keep",
    "lxc.rootfs",
    "lxc.idmap",
    "lxc.init.cmd",
];

static ENV_KEY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=").unwrap());
static CPUSET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9,\-]+$").unwrap());

const ALLOWED_MOUNT_AUTO: &[&str] = &["proc:mixed", "sys:ro", "cgroup:mixed", "shmounts"];

pub fn validate_line(line: &str, config: &HelperConfig) -> Result<(), HelperError> {
    let (key, value) = line
        .split_once('=')
        .ok_or_else(|| HelperError::BadRequest(format!("malformed lxc config line: {line}")))?;
    let key = key.trim();
    let value = value.trim();

    if REJECTED_KEYS.contains(&key) {
        return Err(HelperError::Forbidden(format!("lxc key not allowed: {key}")));
    }

    match key {
        "lxc.cgroup2.devices.allow" | "lxc.cgroup.devices.allow" => {
            if value.trim() == "a" || value.contains("a *:* rwm") {
                return Err(HelperError::Forbidden(
                    "cgroup devices.allow may not grant blanket access".into(),
                ));
            }
            Ok(())
        }
        "lxc.mount.entry" => {
            let source = value
                .split_whitespace()
                .next()
                .ok_or_else(|| HelperError::BadRequest("empty mount.entry".into()))?;
            if is_safe_gpu_path(source) {
                return Ok(());
            }
            path_policy::resolve_and_check(source, config)?;
            Ok(())
        }
        "lxc.mount.auto" => {
            if ALLOWED_MOUNT_AUTO.iter().any(|allowed| value == *allowed) {
                Ok(())
            } else {
                Err(HelperError::Forbidden(format!(
                    "lxc.mount.auto value not allowed: {value}"
                )))
            }
        }
        "lxc.environment" => {
            if ENV_KEY_RE.is_match(value) {
                Ok(())
            } else {
                Err(HelperError::BadRequest(format!(
                    "invalid lxc.environment value: {value}"
                )))
            }
        }
        "lxc.cgroup2.cpuset.cpus" => {
            if CPUSET_RE.is_match(value) {
                Ok(())
            } else {
                Err(HelperError::BadRequest(format!(
                    "invalid cpuset value: {value}"
                )))
            }
        }
        other => Err(HelperError::Forbidden(format!(
            "lxc key not in allowlist: {other}"
        ))),
    }
}

fn is_safe_gpu_path(path: &str) -> bool {
    path.starts_with("/opt/nvidia") || path.starts_with("/opt/docktail/gpu-lib")
}

pub fn validate_lines(lines: &[String], config: &HelperConfig) -> Result<(), HelperError> {
    for line in lines {
        validate_line(line, config)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blanket_cgroup_allow() {
        let cfg = HelperConfig::default();
        assert!(validate_line("lxc.cgroup2.devices.allow = a", &cfg).is_err());
    }

    #[test]
    fn rejects_explicitly_forbidden_keys() {
        let cfg = HelperConfig::default();
        assert!(validate_line("lxc.idmap = u 0 100000 65536", &cfg).is_err());
        assert!(validate_line("lxc.rootfs = /foo", &cfg).is_err());
    }

    #[test]
    fn accepts_valid_env_line() {
        let cfg = HelperConfig::default();
        assert!(validate_line("lxc.environment = FOO=bar", &cfg).is_ok());
    }

    #[test]
    fn rejects_bad_cpuset() {
        let cfg = HelperConfig::default();
        assert!(validate_line("lxc.cgroup2.cpuset.cpus = 0; rm -rf /", &cfg).is_err());
    }
}
