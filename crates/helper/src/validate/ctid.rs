//! CTID ownership check. The helper opens the engine's database read-only
//! and asks: is this CTID referenced by a non-uninstalled Install, a Stack,
//! or a currently-running Job? (spec §4.3, Open Question in §9 — resolved
//! here in favor of the read-only-DB design; see DESIGN.md.)

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::HelperError;

pub struct CtidChecker {
    pool: SqlitePool,
}

impl CtidChecker {
    pub async fn connect(db_path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite://{db_path}?mode=ro");
        let pool = SqlitePoolOptions::new().max_connections(4).connect(&url).await?;
        Ok(Self { pool })
    }

    pub async fn is_managed(&self, ctid: u32) -> Result<bool, HelperError> {
        if !(100..=999_999_999).contains(&ctid) {
            return Ok(false);
        }
        let ctid_i64 = ctid as i64;

        let install_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM installs WHERE ctid = ? AND status != 'uninstalled'",
        )
        .bind(ctid_i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| HelperError::Internal(format!("ctid ownership query failed: {e}")))?;
        if install_count > 0 {
            return Ok(true);
        }

        let stack_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stacks WHERE ctid = ?")
            .bind(ctid_i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HelperError::Internal(format!("ctid ownership query failed: {e}")))?;
        if stack_count > 0 {
            return Ok(true);
        }

        let nonterminal_states = [
            "queued", "validating", "allocating", "creating", "configuring", "starting",
            "waiting_network", "pushing_sdk", "executing", "finalizing", "cancelling",
            "failing", "rolling_back", "stopping", "detaching_volumes", "destroying",
        ];
        let placeholders = nonterminal_states
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT COUNT(*) FROM jobs WHERE ctid = ? AND state IN ({placeholders})"
        );
        let mut query = sqlx::query_scalar(&sql).bind(ctid_i64);
        for state in nonterminal_states {
            query = query.bind(state);
        }
        let job_count: i64 = query
            .fetch_one(&self.pool)
            .await
            .map_err(|e| HelperError::Internal(format!("ctid ownership query failed: {e}")))?;

        Ok(job_count > 0)
    }

    pub async fn require_managed(&self, ctid: u32) -> Result<(), HelperError> {
        if self.is_managed(ctid).await? {
            Ok(())
        } else {
            Err(HelperError::Forbidden(format!(
                "ctid {ctid} is not a managed container"
            )))
        }
    }
}
