use async_trait::async_trait;

use crate::{
    error::Result,
    types::{LlmModel, LlmModelPatch, LogEntry, ServerConfig, ServerInstance},
};

/// Polymorphic store over the four entities. Two implementations are
/// selectable at startup: [`crate::memory::InMemoryRepository`] and, behind
/// the `sqlite` feature, [`crate::sqlite::SqliteRepository`].
#[async_trait]
pub trait Repository: Send + Sync {
    async fn save_server(&self, config: ServerConfig) -> Result<()>;
    async fn get_server(&self, id: &str) -> Result<Option<ServerConfig>>;
    async fn list_servers(&self, enabled_only: bool) -> Result<Vec<ServerConfig>>;
    async fn delete_server(&self, id: &str) -> Result<bool>;

    /// `expected_pid`: `None` performs an unconditional write. `Some(pid)`
    /// applies the write only if the currently stored pid equals `pid`,
    /// preventing a crashed-and-restarted child's stale writer from
    /// clobbering a newer instance's state. Returns whether the write applied.
    async fn save_instance(
        &self,
        instance: ServerInstance,
        expected_pid: Option<Option<u32>>,
    ) -> Result<bool>;
    async fn get_instance(&self, server_id: &str) -> Result<Option<ServerInstance>>;

    async fn append_log(&self, entry: LogEntry) -> Result<()>;
    async fn tail_logs(&self, server_id: &str, n: usize) -> Result<Vec<LogEntry>>;

    /// Fails with [`crate::error::Error::Duplicate`] if `model_id` exists.
    async fn save_model(&self, model: LlmModel) -> Result<()>;
    async fn get_model(&self, model_id: &str) -> Result<Option<LlmModel>>;
    async fn list_models(&self) -> Result<Vec<LlmModel>>;
    async fn update_model(&self, model_id: &str, patch: LlmModelPatch) -> Result<()>;
    async fn delete_model(&self, model_id: &str) -> Result<bool>;
}
