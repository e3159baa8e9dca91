//! In-process health snapshot (spec "Supplemented Features"): queue depth,
//! active workers, and store connectivity, mirroring the teacher's
//! dedicated health service but exposed as a plain struct rather than an
//! HTTP route — the HTTP surface that would serialize and serve this is
//! out of scope here.

use std::sync::Arc;

use serde::Serialize;

use crate::job::engine::JobEngine;

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub queue_depth: usize,
    pub active_workers: usize,
    pub pool_size: usize,
    pub store_healthy: bool,
}

pub async fn snapshot(engine: &Arc<JobEngine>) -> HealthSnapshot {
    HealthSnapshot {
        queue_depth: engine.queue_depth(),
        active_workers: engine.active_worker_count(),
        pool_size: engine.pool_size(),
        store_healthy: engine.store_healthy().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::container::fake::FakeContainerManager;
    use crate::manifest::{Manifest, ManifestSource};
    use crate::store::Store;

    struct NoopManifestSource;

    #[async_trait::async_trait]
    impl ManifestSource for NoopManifestSource {
        async fn load(&self, _app_id: &str, _app_version: &str) -> crate::error::EngineResult<Manifest> {
            Err(crate::error::EngineError::fatal("no manifests in this test double"))
        }
    }

    #[tokio::test]
    async fn snapshot_reflects_pool_size_and_a_reachable_store() {
        let store = Store::connect_in_memory().await.unwrap();
        let container = Arc::new(FakeContainerManager::new());
        let manifests = Arc::new(NoopManifestSource);
        let mut config = EngineConfig::default().worker;
        config.pool_size = 3;
        let engine = JobEngine::new(store, container, manifests, config, std::env::temp_dir());

        let snap = snapshot(&engine).await;
        assert_eq!(snap.pool_size, 3);
        assert_eq!(snap.active_workers, 0);
        assert_eq!(snap.queue_depth, 0);
        assert!(snap.store_healthy);
    }
}
