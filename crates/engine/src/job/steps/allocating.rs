//! `allocating` step (spec §4.5.3): assigns a CTID and a hwaddr, reusing the
//! Install's existing hwaddr on the update path so DHCP leases and firewall
//! rules keyed on MAC remain valid (spec §8 property 6).

use crate::error::EngineResult;
use crate::job::hwaddr;
use crate::job::context::JobContext;
use crate::store::models::JobState;

pub async fn run(ctx: &mut JobContext) -> EngineResult<String> {
    ctx.transition(JobState::Allocating).await?;

    let ctid = ctx.container.allocate_ctid().await.map_err(|e| {
        crate::error::EngineError::transient(format!("allocate_ctid failed: {e}"))
    })?;
    ctx.store.set_job_ctid(&ctx.job.id, ctid).await?;
    ctx.job.ctid = ctid;

    let hwaddr = match &ctx.job.install_id {
        Some(install_id) => match ctx.store.get_install(install_id).await {
            Ok(install) if !install.hwaddr.is_empty() => install.hwaddr,
            _ => hwaddr::generate(),
        },
        None => hwaddr::generate(),
    };

    ctx.info(&format!("allocated ctid {ctid}")).await;
    Ok(hwaddr)
}
