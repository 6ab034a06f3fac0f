//! The four first-class entities the Repository persists, plus the two wire
//! shapes (`ServerConfigWire`, `ServerConfigRow`) used to reconcile the flat
//! HTTP body with the nested storage form.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicyKind {
    Never,
    OnFailure,
    Always,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubProvenance {
    pub github_repo: String,
    pub github_branch: String,
    pub github_server_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

/// Desired state of one MCP child, as stored by the Repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,

    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,

    pub restart_policy: RestartPolicyKind,
    pub restart_window_sec: u64,
    pub max_restarts: u32,

    #[serde(default)]
    pub provenance: Option<GithubProvenance>,

    #[serde(default)]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Last-known tool surface, cached from a successful `tools/list`. Not
    /// authoritative — never used to decide whether a call is valid.
    #[serde(default)]
    pub tools: Vec<CachedTool>,
}

impl ServerConfig {
    /// `^[a-z0-9-]+$`, checked at construction time by the caller (the HTTP
    /// layer validates before this type is ever built).
    #[must_use]
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    }
}

/// Flat wire shape: `command`/`args`/`env` live at the top level, matching
/// the HTTP API's create/patch bodies and the process-launch path. This is
/// what `PUT`/`POST /api/servers` accept and what the wire format "always
/// wins" against on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigWire {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,

    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default)]
    pub restart_policy: Option<RestartPolicyKind>,
    #[serde(default)]
    pub restart_window_sec: Option<u64>,
    #[serde(default)]
    pub max_restarts: Option<u32>,

    #[serde(default)]
    pub provenance: Option<GithubProvenance>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Nested storage shape used internally by the durable backend:
/// `mcp_config: { command, args, env }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfigRow {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfigRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub mcp_config: McpConfigRow,
    pub working_dir: Option<String>,
    pub restart_policy: RestartPolicyKind,
    pub restart_window_sec: u64,
    pub max_restarts: u32,
    pub provenance: Option<GithubProvenance>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tools: Vec<CachedTool>,
}

impl From<ServerConfig> for ServerConfigRow {
    fn from(c: ServerConfig) -> Self {
        Self {
            id: c.id,
            name: c.name,
            description: c.description,
            enabled: c.enabled,
            mcp_config: McpConfigRow {
                command: c.command,
                args: c.args,
                env: c.env,
            },
            working_dir: c.working_dir,
            restart_policy: c.restart_policy,
            restart_window_sec: c.restart_window_sec,
            max_restarts: c.max_restarts,
            provenance: c.provenance,
            created_by: c.created_by,
            created_at: c.created_at,
            updated_at: c.updated_at,
            tools: c.tools,
        }
    }
}

impl From<ServerConfigRow> for ServerConfig {
    fn from(r: ServerConfigRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            description: r.description,
            enabled: r.enabled,
            command: r.mcp_config.command,
            args: r.mcp_config.args,
            env: r.mcp_config.env,
            working_dir: r.working_dir,
            restart_policy: r.restart_policy,
            restart_window_sec: r.restart_window_sec,
            max_restarts: r.max_restarts,
            provenance: r.provenance,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
            tools: r.tools,
        }
    }
}

/// Runtime state of one child, owned in-memory by the Server Manager and
/// mirrored to the Repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    pub server_id: String,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub start_time: Option<DateTime<Utc>>,
    pub stop_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub last_health_check: Option<DateTime<Utc>>,
    pub health_check_failures: u32,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub started_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ServerInstance {
    #[must_use]
    pub fn stopped(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            state: InstanceState::Stopped,
            pid: None,
            start_time: None,
            stop_time: None,
            exit_code: None,
            last_error: None,
            restart_count: 0,
            last_health_check: None,
            health_check_failures: 0,
            host: None,
            port: None,
            started_by: None,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmBackendType {
    Replicate,
    Vllm,
    Ollama,
    HttpOpenai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmModel {
    pub model_id: String,
    pub backend_type: LlmBackendType,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Stored placeholder, e.g. `${REPLICATE_API_TOKEN}` — never expanded at
    /// rest, only at dispatch time.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_params: serde_json::Value,
    pub timeout_sec: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmModelPatch {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub default_params: Option<serde_json::Value>,
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub server_id: String,
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ids() {
        assert!(ServerConfig::is_valid_id("fs-server-1"));
        assert!(!ServerConfig::is_valid_id("FS Server"));
        assert!(!ServerConfig::is_valid_id(""));
    }

    #[test]
    fn wire_and_row_conversion_round_trips() {
        let now = Utc::now();
        let config = ServerConfig {
            id: "fs".into(),
            name: "fs".into(),
            description: None,
            enabled: true,
            command: "npx".into(),
            args: vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into()],
            env: HashMap::new(),
            working_dir: None,
            restart_policy: RestartPolicyKind::OnFailure,
            restart_window_sec: 60,
            max_restarts: 3,
            provenance: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            tools: vec![],
        };
        let row: ServerConfigRow = config.clone().into();
        let back: ServerConfig = row.into();
        assert_eq!(back.command, config.command);
        assert_eq!(back.args, config.args);
    }
}
