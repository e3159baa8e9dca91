//! Log channel (C6, spec §4.5.6). A single per-job sink: append to the
//! Store (monotonic id) and fan out to any live subscribers for SSE/WS
//! streaming of in-flight jobs. Subscriber send failures never fail the job.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::store::models::{JobLog, LogLevel};
use crate::store::Store;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct LogChannel {
    store: Store,
    subscribers: Arc<DashMap<String, broadcast::Sender<JobLog>>>,
}

impl LogChannel {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// Appends the line to durable storage, then forwards it to any
    /// subscriber of this job. Returns the assigned log id.
    pub async fn emit(&self, job_id: &str, level: LogLevel, message: &str) -> crate::error::EngineResult<i64> {
        let id = self.store.append_log(job_id, level, message).await?;
        if let Some(tx) = self.subscribers.get(job_id) {
            let _ = tx.send(JobLog {
                id,
                job_id: job_id.to_string(),
                timestamp: chrono::Utc::now(),
                level: level.as_str().to_string(),
                message: message.to_string(),
            });
        }
        Ok(id)
    }

    /// Subscribes to live log lines for `job_id`. Lazily creates the
    /// broadcast channel on first subscription; it is never removed, since
    /// a job id is never reused.
    pub fn subscribe(&self, job_id: &str) -> broadcast::Receiver<JobLog> {
        self.subscribers
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_still_persists() {
        let store = Store::connect_in_memory().await.unwrap();
        let channel = LogChannel::new(store.clone());
        // No job row exists, but job_logs has no FK enforcement issue here
        // since sqlite FKs are off by default; this only exercises the
        // append + id-assignment path.
        let id = channel.emit("job-1", LogLevel::Info, "hello").await.unwrap();
        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_line() {
        let store = Store::connect_in_memory().await.unwrap();
        let channel = LogChannel::new(store);
        let mut rx = channel.subscribe("job-1");
        channel.emit("job-1", LogLevel::Info, "hello").await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "hello");
    }
}
