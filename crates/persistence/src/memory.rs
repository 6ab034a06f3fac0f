//! In-memory Repository backend: `Arc<RwLock<HashMap<...>>>` per entity,
//! matching the exact trait signatures of the durable backend.

use std::{collections::HashMap, collections::VecDeque};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    error::{Error, Result},
    repository::Repository,
    types::{LlmModel, LlmModelPatch, LogEntry, ServerConfig, ServerInstance},
};

/// Default cap on buffered log lines per server when no explicit limit is
/// configured (overridden by `FMCP_MAX_MEMORY_LOGS`).
pub const DEFAULT_MAX_LOGS_PER_SERVER: usize = 1000;

pub struct InMemoryRepository {
    servers: RwLock<HashMap<String, ServerConfig>>,
    instances: RwLock<HashMap<String, ServerInstance>>,
    logs: RwLock<HashMap<String, VecDeque<LogEntry>>>,
    models: RwLock<HashMap<String, LlmModel>>,
    max_logs_per_server: usize,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::with_log_cap(DEFAULT_MAX_LOGS_PER_SERVER)
    }

    #[must_use]
    pub fn with_log_cap(max_logs_per_server: usize) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            logs: RwLock::new(HashMap::new()),
            models: RwLock::new(HashMap::new()),
            max_logs_per_server,
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save_server(&self, config: ServerConfig) -> Result<()> {
        self.servers.write().await.insert(config.id.clone(), config);
        Ok(())
    }

    async fn get_server(&self, id: &str) -> Result<Option<ServerConfig>> {
        Ok(self.servers.read().await.get(id).cloned())
    }

    async fn list_servers(&self, enabled_only: bool) -> Result<Vec<ServerConfig>> {
        Ok(self
            .servers
            .read()
            .await
            .values()
            .filter(|c| !enabled_only || c.enabled)
            .cloned()
            .collect())
    }

    async fn delete_server(&self, id: &str) -> Result<bool> {
        Ok(self.servers.write().await.remove(id).is_some())
    }

    async fn save_instance(
        &self,
        instance: ServerInstance,
        expected_pid: Option<Option<u32>>,
    ) -> Result<bool> {
        let mut instances = self.instances.write().await;
        if let Some(expected) = expected_pid {
            let current_pid = instances.get(&instance.server_id).and_then(|i| i.pid);
            if current_pid != expected {
                return Ok(false);
            }
        }
        instances.insert(instance.server_id.clone(), instance);
        Ok(true)
    }

    async fn get_instance(&self, server_id: &str) -> Result<Option<ServerInstance>> {
        Ok(self.instances.read().await.get(server_id).cloned())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<()> {
        let mut logs = self.logs.write().await;
        let buf = logs.entry(entry.server_id.clone()).or_default();
        buf.push_back(entry);
        while buf.len() > self.max_logs_per_server {
            buf.pop_front();
        }
        Ok(())
    }

    async fn tail_logs(&self, server_id: &str, n: usize) -> Result<Vec<LogEntry>> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(server_id)
            .map(|buf| buf.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_model(&self, model: LlmModel) -> Result<()> {
        let mut models = self.models.write().await;
        if models.contains_key(&model.model_id) {
            return Err(Error::Duplicate(model.model_id));
        }
        models.insert(model.model_id.clone(), model);
        Ok(())
    }

    async fn get_model(&self, model_id: &str) -> Result<Option<LlmModel>> {
        Ok(self.models.read().await.get(model_id).cloned())
    }

    async fn list_models(&self) -> Result<Vec<LlmModel>> {
        Ok(self.models.read().await.values().cloned().collect())
    }

    async fn update_model(&self, model_id: &str, patch: LlmModelPatch) -> Result<()> {
        let mut models = self.models.write().await;
        let model = models
            .get_mut(model_id)
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
        Ok(())
    }

    async fn delete_model(&self, model_id: &str) -> Result<bool> {
        Ok(self.models.write().await.remove(model_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceState, LlmBackendType, LogStream, RestartPolicyKind};

    fn sample_config(id: &str) -> ServerConfig {
        let now = chrono::Utc::now();
        ServerConfig {
            id: id.into(),
            name: id.into(),
            description: None,
            enabled: true,
            command: "npx".into(),
            args: vec![],
            env: HashMap::new(),
            working_dir: None,
            restart_policy: RestartPolicyKind::Never,
            restart_window_sec: 60,
            max_restarts: 3,
            provenance: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn save_and_list_servers_respects_enabled_filter() {
        let repo = InMemoryRepository::new();
        let mut disabled = sample_config("b");
        disabled.enabled = false;
        repo.save_server(sample_config("a")).await.unwrap();
        repo.save_server(disabled).await.unwrap();

        assert_eq!(repo.list_servers(false).await.unwrap().len(), 2);
        assert_eq!(repo.list_servers(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn instance_check_and_set_rejects_stale_writer() {
        let repo = InMemoryRepository::new();
        let mut instance = ServerInstance::stopped("a");
        instance.state = InstanceState::Running;
        instance.pid = Some(100);
        repo.save_instance(instance.clone(), None).await.unwrap();

        // A stale writer believes the pid is still 100, but it's since
        // changed to 200 (restarted) — the check-and-set must refuse.
        let mut newer = instance.clone();
        newer.pid = Some(200);
        repo.save_instance(newer, None).await.unwrap();

        let mut stale_write = instance.clone();
        stale_write.last_error = Some("stale".into());
        let applied = repo
            .save_instance(stale_write, Some(Some(100)))
            .await
            .unwrap();
        assert!(!applied);

        let current = repo.get_instance("a").await.unwrap().unwrap();
        assert_eq!(current.pid, Some(200));
    }

    #[tokio::test]
    async fn logs_are_capped_per_server() {
        let repo = InMemoryRepository::with_log_cap(3);
        for i in 0..5 {
            repo.append_log(LogEntry {
                server_id: "a".into(),
                timestamp: chrono::Utc::now(),
                stream: LogStream::Stdout,
                content: format!("line {i}"),
            })
            .await
            .unwrap();
        }
        let tail = repo.tail_logs("a", 10).await.unwrap();
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].content, "line 2");
        assert_eq!(tail[2].content, "line 4");
    }

    #[tokio::test]
    async fn duplicate_model_registration_fails() {
        let repo = InMemoryRepository::new();
        let now = chrono::Utc::now();
        let model = LlmModel {
            model_id: "m1".into(),
            backend_type: LlmBackendType::HttpOpenai,
            base_url: Some("http://localhost:8000".into()),
            api_key: None,
            default_params: serde_json::json!({}),
            timeout_sec: 30,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        repo.save_model(model.clone()).await.unwrap();
        let err = repo.save_model(model).await.unwrap_err();
        assert!(matches!(err, Error::Duplicate(_)));
    }
}
