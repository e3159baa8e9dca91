//! Shared helper state — grounded on the teacher's `Arc<AgentState>` idiom
//! (`agent/src/state/agent.rs`), adapted to the helper's own concerns.

use std::sync::Arc;

use crate::audit::AuditLog;
use crate::config::HelperConfig;
use crate::locks::LockTable;
use crate::validate::ctid::CtidChecker;

pub struct HelperState {
    pub config: HelperConfig,
    pub locks: LockTable,
    pub audit: AuditLog,
    pub ctid_checker: CtidChecker,
}

impl HelperState {
    pub async fn new(config: HelperConfig) -> anyhow::Result<Self> {
        let audit = AuditLog::open(&config.audit_log_path)?;
        let ctid_checker = CtidChecker::connect(&config.engine_db_path).await?;
        let locks = LockTable::new(config.exec_semaphore, config.terminal_semaphore);
        Ok(Self {
            config,
            locks,
            audit,
            ctid_checker,
        })
    }
}

pub type SharedHelperState = Arc<HelperState>;
