//! Filesystem path policy — the trust boundary's centerpiece (spec §4.3, §9).
//!
//! `resolve_and_check` implements the five-step algorithm verbatim:
//! clean + reject non-absolute, deny-list check, resolve symlinks on the
//! parent (walking to the nearest existing ancestor), re-check the deny-list
//! on the resolved path, and confirm the result lives under an allowed root.

use std::path::{Path, PathBuf};

use crate::config::HelperConfig;
use crate::error::HelperError;

const DENY_PREFIXES: &[&str] = &[
    "/etc", "/proc", "/sys", "/dev", "/root", "/boot", "/usr", "/bin", "/sbin", "/lib", "/lib64",
];

/// Extra paths the service considers its own — its state/config dirs — added
/// to the deny-list at construction so they can't be overridden by config.
fn own_state_dirs(config: &HelperConfig) -> Vec<PathBuf> {
    vec![
        config.socket_dir(),
        Path::new(&config.audit_log_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
        Path::new(&config.engine_db_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    ]
}

fn is_denied(path: &Path, own_dirs: &[PathBuf]) -> bool {
    for prefix in DENY_PREFIXES {
        if path == Path::new(prefix) || path.starts_with(prefix) {
            return true;
        }
    }
    own_dirs
        .iter()
        .any(|d| !d.as_os_str().is_empty() && (path == d || path.starts_with(d)))
}

/// Walk up from `path` to the nearest ancestor that exists on disk.
fn nearest_existing_ancestor(path: &Path) -> std::io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    loop {
        if current.exists() {
            return std::fs::canonicalize(&current);
        }
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent.to_path_buf(),
            _ => return Ok(current),
        }
    }
}

fn is_under_gpu_safe_path(path: &Path) -> bool {
    const GPU_SAFE: &[&str] = &["/opt/nvidia", "/opt/docktail/gpu-lib"];
    GPU_SAFE.iter().any(|p| path.starts_with(p))
}

fn is_under_allowed_root(path: &Path, config: &HelperConfig) -> bool {
    config
        .allowed_storage_roots
        .iter()
        .any(|root| path.starts_with(root))
        || is_under_gpu_safe_path(path)
}

/// Validate a path destined for a filesystem-mutating operation (mkdir,
/// chown, rm, bind-mount source, lxc.mount.entry source). Returns the
/// cleaned, symlink-resolved path on success.
pub fn resolve_and_check(raw: &str, config: &HelperConfig) -> Result<PathBuf, HelperError> {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(HelperError::Forbidden(format!(
            "path must be absolute: {raw}"
        )));
    }
    let cleaned = clean(path);
    let own_dirs = own_state_dirs(config);

    if is_denied(&cleaned, &own_dirs) {
        return Err(HelperError::Forbidden(format!(
            "restricted system path: {}",
            cleaned.display()
        )));
    }

    let resolved_ancestor = nearest_existing_ancestor(&cleaned).map_err(|e| {
        HelperError::Internal(format!("failed to resolve {}: {e}", cleaned.display()))
    })?;

    // If the leaf itself exists, canonicalize it fully (this also resolves a
    // symlink-at-leaf); otherwise reconstruct leaf..tail onto the resolved
    // ancestor so a symlinked parent directory can't smuggle us past the
    // deny-list.
    let resolved = if cleaned.exists() {
        std::fs::canonicalize(&cleaned).map_err(|e| {
            HelperError::Internal(format!("failed to resolve {}: {e}", cleaned.display()))
        })?
    } else {
        let suffix = cleaned
            .strip_prefix(find_common_ancestor(&cleaned))
            .unwrap_or(&cleaned);
        resolved_ancestor.join(suffix)
    };

    if is_denied(&resolved, &own_dirs) {
        return Err(HelperError::Forbidden(format!(
            "restricted system path (resolved): {}",
            resolved.display()
        )));
    }

    if !is_under_allowed_root(&resolved, config) {
        return Err(HelperError::Forbidden(format!(
            "path is not under an allowed storage root: {}",
            resolved.display()
        )));
    }

    Ok(resolved)
}

/// For remove operations: if the leaf is itself a symlink, resolve its
/// target and re-check the deny-list on that target too (spec §4.3 step 5).
pub fn resolve_for_remove(raw: &str, config: &HelperConfig) -> Result<PathBuf, HelperError> {
    let resolved = resolve_and_check(raw, config)?;
    if let Ok(meta) = std::fs::symlink_metadata(&resolved) {
        if meta.file_type().is_symlink() {
            let target = std::fs::canonicalize(&resolved).map_err(|e| {
                HelperError::Internal(format!("failed to resolve symlink target: {e}"))
            })?;
            let own_dirs = own_state_dirs(config);
            if is_denied(&target, &own_dirs) {
                return Err(HelperError::Forbidden(format!(
                    "restricted system path (symlink target): {}",
                    target.display()
                )));
            }
        }
    }
    Ok(resolved)
}

/// Validate a `pct push` source: must resolve to a regular file under one of
/// the configured push-source roots.
pub fn resolve_push_source(raw: &str, config: &HelperConfig) -> Result<PathBuf, HelperError> {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return Err(HelperError::Forbidden("push source must be absolute".into()));
    }
    let resolved = std::fs::canonicalize(path)
        .map_err(|e| HelperError::Forbidden(format!("push source does not resolve: {e}")))?;
    if !resolved.is_file() {
        return Err(HelperError::Forbidden("push source is not a regular file".into()));
    }
    if !config
        .push_source_roots
        .iter()
        .any(|root| resolved.starts_with(root))
    {
        return Err(HelperError::Forbidden(format!(
            "push source outside allowed directories: {}",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// Lexically clean a path: collapse `.`/`..`/redundant separators without
/// touching the filesystem (a cousin of `path-clean`, grounded on the same
/// "clean before validate" idiom the spec calls for).
fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn find_common_ancestor(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    while !current.as_os_str().is_empty() {
        if current.exists() {
            return current;
        }
        match current.parent() {
            Some(p) => current = p.to_path_buf(),
            None => break,
        }
    }
    PathBuf::from("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> HelperConfig {
        let mut c = HelperConfig::default();
        c.allowed_storage_roots = vec![root.to_string_lossy().to_string()];
        c
    }

    #[test]
    fn rejects_relative_paths() {
        let cfg = HelperConfig::default();
        assert!(resolve_and_check("etc/passwd", &cfg).is_err());
    }

    #[test]
    fn rejects_deny_list_exact_and_prefix() {
        let cfg = HelperConfig::default();
        assert!(resolve_and_check("/etc/passwd", &cfg).is_err());
        assert!(resolve_and_check("/etc", &cfg).is_err());
        assert!(resolve_and_check("/usr/bin/bash", &cfg).is_err());
    }

    #[test]
    fn allows_path_directly_under_allowed_root() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let target = dir.path().join("volumes").join("app1");
        std::fs::create_dir_all(&target).unwrap();
        let result = resolve_and_check(target.to_str().unwrap(), &cfg);
        assert!(result.is_ok(), "{result:?}");
    }

    #[test]
    fn rejects_outside_allowed_roots() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let other = tempdir().unwrap();
        let result = resolve_and_check(other.path().to_str().unwrap(), &cfg);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_symlink_at_parent_pointing_into_deny_list() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let evil_link = dir.path().join("escape");
        symlink("/etc", &evil_link).unwrap();
        let target = evil_link.join("passwd");
        let result = resolve_and_check(target.to_str().unwrap(), &cfg);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_symlink_at_leaf_pointing_into_deny_list() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let evil_link = dir.path().join("sneaky");
        symlink("/etc/shadow", &evil_link).unwrap();
        let result = resolve_for_remove(evil_link.to_str().unwrap(), &cfg);
        assert!(result.is_err());
    }

    #[test]
    fn allows_nonexistent_leaf_under_allowed_root() {
        let dir = tempdir().unwrap();
        let cfg = test_config(dir.path());
        let target = dir.path().join("not-yet-created");
        let result = resolve_and_check(target.to_str().unwrap(), &cfg);
        assert!(result.is_ok(), "{result:?}");
    }
}
