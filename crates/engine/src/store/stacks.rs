//! Stack operations (spec §4.4, §4.5.5). A stack is a set of apps sharing
//! one container; `apps_json` holds the per-app install/status list as a
//! single JSON column, mirroring how `jobs`/`installs` stash their maps.

use chrono::Utc;

use crate::error::{EngineError, EngineResult};

use super::models::{Stack, StackApp, StackRow};
use super::{encode, Store};

impl Store {
    pub async fn create_stack(&self, id: &str, name: &str, ctid: u32) -> EngineResult<Stack> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO stacks (id, name, ctid, apps_json, created_at, updated_at)
             VALUES (?, ?, ?, '[]', ?, ?)",
        )
        .bind(id)
        .bind(name)
        .bind(ctid as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        self.get_stack(id).await
    }

    pub async fn get_stack(&self, id: &str) -> EngineResult<Stack> {
        let row: StackRow = sqlx::query_as("SELECT * FROM stacks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::fatal(format!("stack not found: {id}")))?;
        row_to_stack(row)
    }

    pub async fn list_stacks(&self) -> EngineResult<Vec<Stack>> {
        let rows: Vec<StackRow> = sqlx::query_as("SELECT * FROM stacks ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_stack).collect()
    }

    /// Replaces the full app list. Callers read-modify-write via
    /// `get_stack`/`update_stack_apps`; the exclusion invariant on the
    /// owning jobs still guards concurrent mutation of the same stack.
    pub async fn update_stack_apps(&self, id: &str, apps: &[StackApp]) -> EngineResult<()> {
        sqlx::query("UPDATE stacks SET apps_json = ?, updated_at = ? WHERE id = ?")
            .bind(encode(&apps.to_vec())?)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Updates a single app's status/outputs within a stack, leaving the
    /// other apps in `apps_json` untouched.
    pub async fn set_stack_app_status(
        &self,
        id: &str,
        app_id: &str,
        status: &str,
        outputs: &std::collections::HashMap<String, String>,
    ) -> EngineResult<()> {
        let mut stack = self.get_stack(id).await?;
        if let Some(app) = stack.apps.iter_mut().find(|a| a.app_id == app_id) {
            app.status = status.to_string();
            app.outputs = outputs.clone();
        } else {
            return Err(EngineError::fatal(format!(
                "app {app_id} not found in stack {id}"
            )));
        }
        self.update_stack_apps(id, &stack.apps).await
    }
}

fn row_to_stack(row: StackRow) -> EngineResult<Stack> {
    let apps: Vec<StackApp> = serde_json::from_str(&row.apps_json)
        .map_err(|e| EngineError::fatal(format!("decode stack apps failed: {e}")))?;
    Ok(Stack {
        id: row.id,
        name: row.name,
        ctid: row.ctid as u32,
        apps,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}
