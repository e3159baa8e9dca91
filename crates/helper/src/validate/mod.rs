//! Server-side validation contracts enforced on every helper request
//! (spec §4.3). Each submodule owns one contract; routes call into these
//! rather than re-implementing checks inline.

pub mod ctid;
pub mod lxc_conf;
pub mod path_policy;
pub mod pct_set;

use crate::error::HelperError;

const ALLOWED_SHELLS: &[&str] = &["/bin/bash", "/bin/sh", "/bin/ash", "/bin/zsh"];

pub fn validate_shell(shell: &str) -> Result<(), HelperError> {
    if shell.contains(' ') || shell.contains(';') || shell.contains('|') {
        return Err(HelperError::Forbidden("invalid shell argument".into()));
    }
    if ALLOWED_SHELLS.contains(&shell) {
        Ok(())
    } else {
        Err(HelperError::Forbidden(format!("shell not allowed: {shell}")))
    }
}

pub fn validate_argv(argv: &[String]) -> Result<(), HelperError> {
    if argv.is_empty() {
        return Err(HelperError::BadRequest("command must not be empty".into()));
    }
    if argv.len() > 1000 {
        return Err(HelperError::BadRequest("too many arguments".into()));
    }
    if argv.iter().any(|a| a.contains('\0')) {
        return Err(HelperError::BadRequest("argument contains NUL byte".into()));
    }
    Ok(())
}

pub fn validate_ctid_range(ctid: u32) -> Result<(), HelperError> {
    if (100..=999_999_999).contains(&ctid) {
        Ok(())
    } else {
        Err(HelperError::Forbidden(format!("ctid out of range: {ctid}")))
    }
}

pub fn validate_chown(uid: u32, gid: u32) -> Result<(), HelperError> {
    if uid == 100_000 && gid == 100_000 {
        Ok(())
    } else {
        Err(HelperError::Forbidden(
            "chown only permitted to the unprivileged-container root mapping (100000:100000)"
                .into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_allowlist() {
        assert!(validate_shell("/bin/bash").is_ok());
        assert!(validate_shell("/bin/bash; rm -rf /").is_err());
        assert!(validate_shell("/usr/bin/python3").is_err());
    }

    #[test]
    fn chown_only_allows_subuid_root() {
        assert!(validate_chown(100_000, 100_000).is_ok());
        assert!(validate_chown(0, 0).is_err());
    }
}
