//! `waiting_network` step (spec §4.5.3): poll `hostname -I` until the first
//! field is a non-empty IPv4, or a deadline elapses. The IP is recorded on
//! the Install once resolved.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{EngineError, EngineResult};
use crate::job::context::JobContext;
use crate::store::models::JobState;

pub async fn run(ctx: &mut JobContext) -> EngineResult<String> {
    ctx.transition(JobState::WaitingNetwork).await?;

    let deadline = Instant::now() + Duration::from_secs(ctx.config.network_wait_timeout_secs);
    let mut backoff = Duration::from_millis(200);

    loop {
        if ctx.cancel_requested().await? {
            return Err(EngineError::cancelled());
        }

        let outcome = ctx
            .container
            .exec(ctx.job.ctid, &["hostname".to_string(), "-I".to_string()])
            .await
            .map_err(|e| EngineError::transient(format!("hostname -I failed: {e}")))?;

        if let Some(ip) = outcome.output.split_whitespace().next() {
            if !ip.is_empty() && ip.parse::<std::net::Ipv4Addr>().is_ok() {
                ctx.store.set_job_hostname_ip(&ctx.job.id, None, Some(ip)).await?;
                ctx.job.ip_address = Some(ip.to_string());
                ctx.info(&format!("network up: {ip}")).await;
                return Ok(ip.to_string());
            }
        }

        if Instant::now() >= deadline {
            return Err(EngineError::timeout("container never reported a network address"));
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_secs(5));
    }
}
