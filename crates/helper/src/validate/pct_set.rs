//! `pct set` option allowlist — only `-devN` and `-mpN`, values re-parsed
//! server-side regardless of what the caller claims they mean (spec §4.3).

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{gpu_device_path_patterns, HelperConfig};
use crate::error::HelperError;
use crate::validate::path_policy;

static OPTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(dev|mp)(\d{1,2})$").unwrap());
static GID_MODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0[0-7]{3}$").unwrap());

pub struct ParsedOption {
    pub validated_value: String,
}

/// `option` is the bare name, e.g. `-dev0` arrives as `dev0`.
pub fn validate_pct_set(option: &str, value: &str, config: &HelperConfig) -> Result<ParsedOption, HelperError> {
    let option = option.trim_start_matches('-');
    let caps = OPTION_RE
        .captures(option)
        .ok_or_else(|| HelperError::Forbidden(format!("option not allowed: {option}")))?;
    let kind = &caps[1];
    let index: u32 = caps[2]
        .parse()
        .map_err(|_| HelperError::BadRequest("bad option index".into()))?;
    if index > 99 {
        return Err(HelperError::Forbidden("option index out of range".into()));
    }

    match kind {
        "dev" => validate_dev_value(value, config),
        "mp" => validate_mp_value(value, config),
        _ => unreachable!(),
    }
}

fn validate_dev_value(value: &str, config: &HelperConfig) -> Result<ParsedOption, HelperError> {
    let mut parts = value.split(',');
    let dev_path = parts
        .next()
        .ok_or_else(|| HelperError::BadRequest("empty -devN value".into()))?;

    let gpu_patterns: Vec<Regex> = gpu_device_path_patterns()
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect();
    if !gpu_patterns.iter().any(|re| re.is_match(dev_path)) {
        return Err(HelperError::Forbidden(format!(
            "device path not allowed: {dev_path}"
        )));
    }

    for kv in parts {
        let (key, val) = kv
            .split_once('=')
            .ok_or_else(|| HelperError::BadRequest(format!("malformed -devN clause: {kv}")))?;
        match key {
            "gid" => {
                let gid: u32 = val
                    .parse()
                    .map_err(|_| HelperError::BadRequest("bad gid".into()))?;
                if !config.allowed_device_gids.contains(&gid) {
                    return Err(HelperError::Forbidden(format!("gid not allowed: {gid}")));
                }
            }
            "mode" => {
                if !GID_MODE_RE.is_match(val) {
                    return Err(HelperError::Forbidden(format!("mode not allowed: {val}")));
                }
            }
            other => {
                return Err(HelperError::Forbidden(format!(
                    "unknown -devN clause key: {other}"
                )))
            }
        }
    }

    Ok(ParsedOption {
        validated_value: value.to_string(),
    })
}

fn validate_mp_value(value: &str, config: &HelperConfig) -> Result<ParsedOption, HelperError> {
    // host_path,mp=/ct/path[,ro=0|1]
    let mut parts = value.split(',');
    let host_path = parts
        .next()
        .ok_or_else(|| HelperError::BadRequest("empty -mpN value".into()))?;
    path_policy::resolve_and_check(host_path, config)?;

    let mut saw_mp = false;
    for kv in parts {
        let (key, val) = kv
            .split_once('=')
            .ok_or_else(|| HelperError::BadRequest(format!("malformed -mpN clause: {kv}")))?;
        match key {
            "mp" => {
                if !val.starts_with('/') {
                    return Err(HelperError::BadRequest("mount path must be absolute".into()));
                }
                saw_mp = true;
            }
            "ro" => {
                if val != "0" && val != "1" {
                    return Err(HelperError::BadRequest("ro must be 0 or 1".into()));
                }
            }
            other => {
                return Err(HelperError::Forbidden(format!(
                    "unknown -mpN clause key: {other}"
                )))
            }
        }
    }
    if !saw_mp {
        return Err(HelperError::BadRequest("-mpN value missing mp= clause".into()));
    }

    Ok(ParsedOption {
        validated_value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_gpu_device() {
        let cfg = HelperConfig::default();
        assert!(validate_pct_set("dev0", "/dev/dri/renderD128,gid=44,mode=0666", &cfg).is_ok());
    }

    #[test]
    fn rejects_unknown_device() {
        let cfg = HelperConfig::default();
        assert!(validate_pct_set("dev0", "/dev/sda,gid=0,mode=0666", &cfg).is_err());
    }

    #[test]
    fn rejects_disallowed_gid() {
        let cfg = HelperConfig::default();
        assert!(validate_pct_set("dev0", "/dev/nvidiactl,gid=9999", &cfg).is_err());
    }

    #[test]
    fn rejects_unknown_option_name() {
        let cfg = HelperConfig::default();
        assert!(validate_pct_set("rootfs", "local:10", &cfg).is_err());
    }
}
