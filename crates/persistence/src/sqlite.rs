//! Durable Repository backend on SQLite via `sqlx`. Entity documents are
//! stored as JSON text columns with a handful of indexed scalar columns for
//! the predicates the Repository interface actually needs (enabled-only
//! listing, pid check-and-set, per-server log ordering) — the same pattern
//! the teacher workspace uses for its own `sqlx`-backed session/config
//! tables.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqlitePoolOptions};

use crate::{
    error::{Error, Result},
    repository::Repository,
    types::{LlmModel, LlmModelPatch, LogEntry, ServerConfig, ServerInstance},
};

pub struct SqliteRepository {
    pool: SqlitePool,
    max_logs_per_server: i64,
}

impl SqliteRepository {
    /// Connects to `database_url` (e.g. `sqlite://fluidmcp.db`), creating the
    /// file if needed, and applies embedded migrations.
    pub async fn connect(database_url: &str, max_logs_per_server: usize) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            max_logs_per_server: max_logs_per_server as i64,
        })
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_server(&self, config: ServerConfig) -> Result<()> {
        let document = serde_json::to_string(&config)?;
        sqlx::query(
            "INSERT INTO servers (id, enabled, document, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET enabled = excluded.enabled,
                document = excluded.document, updated_at = excluded.updated_at",
        )
        .bind(&config.id)
        .bind(config.enabled)
        .bind(&document)
        .bind(config.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_server(&self, id: &str) -> Result<Option<ServerConfig>> {
        let row = sqlx::query("SELECT document FROM servers WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(serde_json::from_str(r.get::<String, _>("document").as_str())?))
            .transpose()
    }

    async fn list_servers(&self, enabled_only: bool) -> Result<Vec<ServerConfig>> {
        let rows = if enabled_only {
            sqlx::query("SELECT document FROM servers WHERE enabled = 1")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT document FROM servers")
                .fetch_all(&self.pool)
                .await?
        };
        rows.into_iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("document").as_str())?))
            .collect()
    }

    async fn delete_server(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM servers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_instance(
        &self,
        instance: ServerInstance,
        expected_pid: Option<Option<u32>>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        if let Some(expected) = expected_pid {
            let current: Option<Option<i64>> =
                sqlx::query("SELECT pid FROM server_instances WHERE server_id = ?1")
                    .bind(&instance.server_id)
                    .fetch_optional(&mut *tx)
                    .await?
                    .map(|r| r.get::<Option<i64>, _>("pid"));
            let current_pid = current.flatten().map(|p| p as u32);
            if current_pid != expected {
                tx.rollback().await?;
                return Ok(false);
            }
        }

        let document = serde_json::to_string(&instance)?;
        sqlx::query(
            "INSERT INTO server_instances (server_id, pid, document, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(server_id) DO UPDATE SET pid = excluded.pid,
                document = excluded.document, updated_at = excluded.updated_at",
        )
        .bind(&instance.server_id)
        .bind(instance.pid.map(|p| p as i64))
        .bind(&document)
        .bind(instance.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_instance(&self, server_id: &str) -> Result<Option<ServerInstance>> {
        let row = sqlx::query("SELECT document FROM server_instances WHERE server_id = ?1")
            .bind(server_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(serde_json::from_str(r.get::<String, _>("document").as_str())?))
            .transpose()
    }

    async fn append_log(&self, entry: LogEntry) -> Result<()> {
        let document = serde_json::to_string(&entry)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO server_logs (server_id, timestamp, document) VALUES (?1, ?2, ?3)")
            .bind(&entry.server_id)
            .bind(entry.timestamp.to_rfc3339())
            .bind(&document)
            .execute(&mut *tx)
            .await?;

        // Opportunistically prune beyond the configured cap, matching the
        // in-memory backend's behavior (§3.1: retained, cap enforced
        // opportunistically rather than via a dedicated background sweep).
        sqlx::query(
            "DELETE FROM server_logs WHERE server_id = ?1 AND id NOT IN (
                SELECT id FROM server_logs WHERE server_id = ?1 ORDER BY id DESC LIMIT ?2
             )",
        )
        .bind(&entry.server_id)
        .bind(self.max_logs_per_server)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn tail_logs(&self, server_id: &str, n: usize) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT document FROM server_logs WHERE server_id = ?1 ORDER BY id DESC LIMIT ?2",
        )
        .bind(server_id)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;
        let mut entries: Vec<LogEntry> = rows
            .into_iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("document").as_str())?))
            .collect::<Result<Vec<_>>>()?;
        entries.reverse();
        Ok(entries)
    }

    async fn save_model(&self, model: LlmModel) -> Result<()> {
        let existing = sqlx::query("SELECT 1 FROM llm_models WHERE model_id = ?1")
            .bind(&model.model_id)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_some() {
            return Err(Error::Duplicate(model.model_id));
        }
        let document = serde_json::to_string(&model)?;
        sqlx::query(
            "INSERT INTO llm_models (model_id, document, version, updated_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&model.model_id)
        .bind(&document)
        .bind(model.version as i64)
        .bind(model.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_model(&self, model_id: &str) -> Result<Option<LlmModel>> {
        let row = sqlx::query("SELECT document FROM llm_models WHERE model_id = ?1")
            .bind(model_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Ok(serde_json::from_str(r.get::<String, _>("document").as_str())?))
            .transpose()
    }

    async fn list_models(&self) -> Result<Vec<LlmModel>> {
        let rows = sqlx::query("SELECT document FROM llm_models")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| Ok(serde_json::from_str(r.get::<String, _>("document").as_str())?))
            .collect()
    }

    async fn update_model(&self, model_id: &str, patch: LlmModelPatch) -> Result<()> {
        let mut model = self
            .get_model(model_id)
            .await?
            .ok_or_else(|| Error::NotFound(model_id.to_string()))?;
        if let Some(base_url) = patch.base_url {
            model.base_url = Some(base_url);
        }
        if let Some(api_key) = patch.api_key {
            model.api_key = Some(api_key);
        }
        if let Some(default_params) = patch.default_params {
            model.default_params = default_params;
        }
        if let Some(timeout_sec) = patch.timeout_sec {
            model.timeout_sec = timeout_sec;
        }
        model.version += 1;
        model.updated_at = chrono::Utc::now();

        let document = serde_json::to_string(&model)?;
        sqlx::query(
            "UPDATE llm_models SET document = ?2, version = ?3, updated_at = ?4 WHERE model_id = ?1",
        )
        .bind(model_id)
        .bind(&document)
        .bind(model.version as i64)
        .bind(model.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_model(&self, model_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM llm_models WHERE model_id = ?1")
            .bind(model_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
