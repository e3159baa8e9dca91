//! `pushing_sdk` step (spec §4.5.3): pushes the provisioning SDK bundle and
//! the app's `provision/` directory into the container at a canonical path.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::store::models::JobState;

/// Canonical in-container location for pushed provisioning assets.
const PROVISION_ROOT: &str = "/opt/docktail-provision";

/// Pushes the SDK bundle, the app's install script, and an env file holding
/// every variable (including secrets) the script needs. Secrets travel via
/// this file — pushed with owner-only perms — rather than as `argv`, which
/// the helper's audit log and any process listing would otherwise expose
/// (spec §4.5.3: "secrets are passed via env, never in argv").
pub async fn run(
    ctx: &mut JobContext,
    sdk_host_path: &str,
    script_host_path: &str,
    env_host_path: &str,
    env: &HashMap<String, String>,
) -> EngineResult<()> {
    ctx.transition(JobState::PushingSdk).await?;

    ctx.container
        .push(ctx.job.ctid, sdk_host_path, &format!("{PROVISION_ROOT}/sdk"), Some("0755"))
        .await
        .map_err(|e| EngineError::transient(format!("push sdk failed: {e}")))?;

    ctx.container
        .push(
            ctx.job.ctid,
            script_host_path,
            &format!("{PROVISION_ROOT}/install.sh"),
            Some("0755"),
        )
        .await
        .map_err(|e| EngineError::transient(format!("push script failed: {e}")))?;

    std::fs::write(
        env_host_path,
        env.iter()
            .map(|(k, v)| format!("{k}={}\n", shell_quote(v)))
            .collect::<String>(),
    )
    .map_err(|e| EngineError::fatal(format!("write env file failed: {e}")))?;

    ctx.container
        .push(ctx.job.ctid, env_host_path, &env_path(), Some("0600"))
        .await
        .map_err(|e| EngineError::transient(format!("push env failed: {e}")))?;

    ctx.info("provisioning assets pushed").await;
    Ok(())
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

pub fn script_path() -> String {
    format!("{PROVISION_ROOT}/install.sh")
}

pub fn env_path() -> String {
    format!("{PROVISION_ROOT}/.env")
}
