//! `POST /api/servers/from-github`: clone a repository and register every
//! MCP server its `metadata.json` (or README-embedded JSON block) declares.
//! Grounded on `original_source/fluidmcp/cli/services/github_utils.py`'s
//! `clone_github_repo`/`extract_or_create_metadata`/`validate_mcp_metadata`
//! contract, shelled out to `git` the same way rather than linking a Git
//! library, since the original only ever needs a shallow clone.

use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use fluidmcp_persistence::types::{RestartPolicyKind, ServerConfig};
use serde::Deserialize;
use tokio::process::Command;

use crate::error::ApiError;

const DEFAULT_BRANCH: &str = "main";

fn normalize_repo(repo_path: &str) -> Result<(String, String), ApiError> {
    let cleaned = repo_path
        .trim()
        .trim_start_matches("https://github.com/")
        .trim_start_matches("http://github.com/")
        .trim_end_matches(".git");

    let mut parts = cleaned.splitn(2, '/');
    let (owner, repo) = match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => (owner, repo),
        _ => {
            return Err(fluidmcp_common::Error::validation(
                "github repo path must be in the form 'owner/repo'",
            )
            .into());
        },
    };

    Ok((owner.to_string(), repo.to_string()))
}

#[derive(Debug, Deserialize)]
struct McpServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct GithubMetadata {
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, McpServerEntry>,
}

/// Discovers MCP server declarations from a GitHub repository. A trait seam
/// so the shell-out implementation can be swapped for a test double.
#[async_trait]
pub trait GithubImporter: Send + Sync {
    async fn import(
        &self,
        repo_path: &str,
        branch: Option<&str>,
        token: Option<&str>,
    ) -> Result<Vec<ServerConfig>, ApiError>;
}

#[derive(Default)]
pub struct GitShellImporter {
    /// Overrides the clone destination root; defaults to a process-temp dir
    /// when unset, matching tests that don't want to touch a real checkout
    /// cache.
    pub install_dir: Option<PathBuf>,
}

#[async_trait]
impl GithubImporter for GitShellImporter {
    async fn import(
        &self,
        repo_path: &str,
        branch: Option<&str>,
        token: Option<&str>,
    ) -> Result<Vec<ServerConfig>, ApiError> {
        let token = token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| fluidmcp_common::Error::validation("X-GitHub-Token header is required"))?;

        let (owner, repo) = normalize_repo(repo_path)?;
        let branch = branch.unwrap_or(DEFAULT_BRANCH);

        let root = self
            .install_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
            .join("fmcp-packages");
        let dest = root.join(&owner).join(&repo).join(branch);

        if !dest.exists() || std::fs::read_dir(&dest).is_ok_and(|mut d| d.next().is_none()) {
            clone_repo(&owner, &repo, branch, token, &dest).await?;
        }

        let metadata = read_metadata(&dest)?;
        metadata_to_configs(metadata)
    }
}

async fn clone_repo(owner: &str, repo: &str, branch: &str, token: &str, dest: &std::path::Path) -> Result<(), ApiError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fluidmcp_common::Error::launch_failed(format!("failed to create install dir: {e}")))?;
    }

    let clone_url = format!("https://{token}@github.com/{owner}/{repo}.git");
    let output = Command::new("git")
        .args(["clone", "--depth", "1", "--branch", branch, &clone_url, &dest.to_string_lossy()])
        .output()
        .await
        .map_err(|e| fluidmcp_common::Error::launch_failed(format!("failed to invoke git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(fluidmcp_common::Error::launch_failed(format!(
            "git clone of {owner}/{repo}@{branch} failed: {}",
            redact_token(&stderr, token)
        ))
        .into());
    }

    Ok(())
}

fn redact_token(message: &str, token: &str) -> String {
    message.replace(token, "***")
}

fn read_metadata(dest: &std::path::Path) -> Result<GithubMetadata, ApiError> {
    let metadata_path = dest.join("metadata.json");
    let raw = if metadata_path.exists() {
        std::fs::read_to_string(&metadata_path)
            .map_err(|e| fluidmcp_common::Error::launch_failed(format!("failed to read metadata.json: {e}")))?
    } else {
        extract_json_from_readme(dest)?
    };

    serde_json::from_str(&raw)
        .map_err(|e| fluidmcp_common::Error::validation(format!("invalid mcpServers metadata: {e}")).into())
}

/// Scans `README.md` for a fenced JSON block containing `mcpServers`,
/// matching the original's fallback when no `metadata.json` is checked in.
fn extract_json_from_readme(dest: &std::path::Path) -> Result<String, ApiError> {
    let readme_path = ["README.md", "readme.md", "Readme.md"]
        .iter()
        .map(|name| dest.join(name))
        .find(|p| p.exists())
        .ok_or_else(|| fluidmcp_common::Error::validation("no metadata.json or README found in repository"))?;

    let content = std::fs::read_to_string(&readme_path)
        .map_err(|e| fluidmcp_common::Error::launch_failed(format!("failed to read README: {e}")))?;

    for fence in content.split("```") {
        let candidate = fence.trim().trim_start_matches("json").trim();
        if candidate.contains("mcpServers")
            && serde_json::from_str::<serde_json::Value>(candidate).is_ok()
        {
            return Ok(candidate.to_string());
        }
    }

    Err(fluidmcp_common::Error::validation("no valid mcpServers JSON block found in README").into())
}

fn metadata_to_configs(metadata: GithubMetadata) -> Result<Vec<ServerConfig>, ApiError> {
    if metadata.mcp_servers.is_empty() {
        return Err(fluidmcp_common::Error::validation("'mcpServers' must be a non-empty object").into());
    }

    let now = chrono::Utc::now();
    let configs = metadata
        .mcp_servers
        .into_iter()
        .map(|(name, entry)| {
            let id = slugify(&name);
            ServerConfig {
                id,
                name,
                description: None,
                enabled: true,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                working_dir: None,
                restart_policy: RestartPolicyKind::OnFailure,
                restart_window_sec: 60,
                max_restarts: 3,
                provenance: None,
                created_by: None,
                created_at: now,
                updated_at: now,
                tools: Vec::new(),
            }
        })
        .collect();

    Ok(configs)
}

fn slugify(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_repo_accepts_owner_repo() {
        let (owner, repo) = normalize_repo("acme/widgets").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn normalize_repo_strips_url_and_git_suffix() {
        let (owner, repo) = normalize_repo("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(owner, "acme");
        assert_eq!(repo, "widgets");
    }

    #[test]
    fn normalize_repo_rejects_malformed_input() {
        assert!(normalize_repo("not-a-repo-path").is_err());
    }

    #[test]
    fn metadata_to_configs_rejects_empty_servers() {
        let metadata = GithubMetadata { mcp_servers: HashMap::new() };
        assert!(metadata_to_configs(metadata).is_err());
    }

    #[test]
    fn metadata_to_configs_slugifies_names() {
        let mut servers = HashMap::new();
        servers.insert(
            "My Cool Server".to_string(),
            McpServerEntry { command: "npx".into(), args: vec![], env: HashMap::new() },
        );
        let configs = metadata_to_configs(GithubMetadata { mcp_servers: servers }).unwrap();
        assert_eq!(configs[0].id, "my-cool-server");
    }

    #[test]
    fn redact_token_removes_secret_from_error_output() {
        let redacted = redact_token("fatal: authentication failed for https://ghp_abc123@github.com/x/y", "ghp_abc123");
        assert!(!redacted.contains("ghp_abc123"));
    }
}
