//! `executing` step (spec §4.5.3): runs the provisioning script, streaming
//! combined stdout+stderr line-by-line into the job log (secrets redacted),
//! parsing output-marker lines into `outputs`, and enforcing the manifest's
//! (or the default) script timeout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::job::outputs::redact_secrets;
use crate::store::models::JobState;

use super::pushing_sdk;

/// A script line of the form `##OUTPUT## key=value` is captured into the
/// job's `outputs` map rather than just logged.
const OUTPUT_MARKER: &str = "##OUTPUT##";

pub async fn run(ctx: &mut JobContext, secret_values: &[String]) -> EngineResult<HashMap<String, String>> {
    ctx.transition(JobState::Executing).await?;

    let timeout_secs = ctx
        .manifest
        .timeout_sec
        .unwrap_or(ctx.config.default_script_timeout_secs);

    let argv = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("set -a; . {}; exec {}", pushing_sdk::env_path(), pushing_sdk::script_path()),
    ];

    let outputs: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let secret_values_owned: Vec<String> = secret_values.to_vec();
    let job_id = ctx.job.id.clone();
    let log = ctx.log.clone();
    let outputs_for_line = outputs.clone();

    let mut on_line = move |line: &str| {
        if let Some(rest) = line.strip_prefix(OUTPUT_MARKER) {
            if let Some((k, v)) = rest.trim().split_once('=') {
                outputs_for_line.lock().unwrap().insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        let redacted = redact_secrets(line, &secret_values_owned.iter().map(String::as_str).collect::<Vec<_>>());
        let log = log.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            let _ = log.emit(&job_id, crate::store::models::LogLevel::Info, &redacted).await;
        });
    };

    let container = ctx.container.clone();
    let ctid = ctx.job.ctid;
    let exec_fut = container.exec_stream(ctid, &argv, &mut on_line);

    let exit_code = tokio::time::timeout(Duration::from_secs(timeout_secs), exec_fut)
        .await
        .map_err(|_| EngineError::timeout("provisioning script exceeded its timeout"))?
        .map_err(|e| EngineError::transient(format!("exec_stream failed: {e}")))?;

    if exit_code != 0 {
        return Err(EngineError::fatal(format!("provisioning script exited {exit_code}")));
    }

    ctx.info("provisioning script completed").await;
    Ok(Arc::try_unwrap(outputs).map(|m| m.into_inner().unwrap()).unwrap_or_default())
}
