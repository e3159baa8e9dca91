//! Per-job execution context threaded through every step (spec §4.5.3).
//! Bundles the collaborators a step needs without each step re-deriving
//! them from a global `JobEngine` handle.

use std::sync::Arc;

use crate::config::WorkerConfig;
use crate::container::ContainerManager;
use crate::error::{EngineError, EngineResult};
use crate::log_channel::LogChannel;
use crate::manifest::Manifest;
use crate::store::models::{Job, JobState, LogLevel};
use crate::store::Store;

pub struct JobContext {
    pub store: Store,
    pub container: Arc<dyn ContainerManager>,
    pub log: LogChannel,
    pub config: WorkerConfig,
    pub manifest: Manifest,
    pub job: Job,
}

impl JobContext {
    pub async fn info(&self, message: &str) {
        let _ = self.log.emit(&self.job.id, LogLevel::Info, message).await;
    }

    pub async fn warn(&self, message: &str) {
        let _ = self.log.emit(&self.job.id, LogLevel::Warn, message).await;
    }

    pub async fn error(&self, message: &str) {
        let _ = self.log.emit(&self.job.id, LogLevel::Error, message).await;
    }

    /// Transitions the job to `state`, asserting the edge is in the DAG
    /// (spec §8 property 1) before persisting it.
    pub async fn transition(&mut self, state: JobState) -> EngineResult<()> {
        if !super::types::is_allowed_transition(&self.job.state, &state) {
            return Err(EngineError::fatal(format!(
                "illegal transition {:?} -> {:?}",
                self.job.state, state
            )));
        }
        self.store.update_job_state(&self.job.id, state.clone(), None).await?;
        self.job.state = state;
        Ok(())
    }

    pub async fn fail(&mut self, err: &EngineError) -> EngineResult<()> {
        self.error(&err.job_error_string()).await;
        self.store
            .update_job_state(&self.job.id, JobState::Failed, Some(&err.job_error_string()))
            .await?;
        self.job.state = JobState::Failed;
        Ok(())
    }

    /// Cooperative cancellation checkpoint (spec §4.5.4, §5). Every
    /// suspension point in a step must call this before proceeding.
    pub async fn cancel_requested(&self) -> EngineResult<bool> {
        self.store.is_cancel_requested(&self.job.id).await
    }
}
