//! Layered configuration: CLI flags > environment variables > config file >
//! defaults. Discovery follows the pack's config-crate convention — a
//! `fluidmcp.toml` in the current directory takes precedence over one in
//! the user's config directory, and either is optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Deserialized shape of `fluidmcp.toml`; every field is optional so a
/// partial file only overrides what it mentions.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    bind: Option<String>,
    port: Option<u16>,
    bearer_token: Option<String>,
    secure_mode: Option<bool>,
    allowed_commands: Option<Vec<String>>,
    max_memory_logs: Option<usize>,
    database_url: Option<String>,
    shutdown_timeout_sec: Option<u64>,
}

/// Resolved settings the gateway actually runs with.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    pub bearer_token: Option<String>,
    pub secure_mode: bool,
    pub allowed_commands: Vec<String>,
    pub max_memory_logs: usize,
    pub database_url: Option<String>,
    pub shutdown_timeout_sec: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8089,
            bearer_token: None,
            secure_mode: false,
            allowed_commands: Vec::new(),
            max_memory_logs: fluidmcp_persistence::memory::DEFAULT_MAX_LOGS_PER_SERVER,
            database_url: None,
            shutdown_timeout_sec: fluidmcp_manager::DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
        }
    }
}

/// CLI overrides, one field per flag in [`crate::Cli`] that can override the
/// config file. `None` means "not passed on the command line".
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
}

/// Returns `~/.config/fluidmcp/fluidmcp.toml` (or the OS equivalent), if a
/// config directory can be resolved for the current user at all.
fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "fluidmcp").map(|dirs| dirs.config_dir().join("fluidmcp.toml"))
}

fn read_config_file(path: &Path) -> ConfigFile {
    match std::fs::read_to_string(path) {
        Ok(raw) => toml::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "ignoring malformed config file");
            ConfigFile::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read config file");
            ConfigFile::default()
        },
    }
}

/// Discovers and loads config, applying the file, then environment
/// variables, then explicit CLI overrides, in increasing order of priority.
#[must_use]
pub fn load(overrides: CliOverrides) -> GatewayConfig {
    let config_path = overrides
        .config_path
        .clone()
        .or_else(|| Some(PathBuf::from("fluidmcp.toml")).filter(|p| p.exists()))
        .or_else(default_config_path);

    let file = config_path.as_deref().map(read_config_file).unwrap_or_default();
    let mut config = GatewayConfig::default();

    if let Some(bind) = file.bind {
        config.bind = bind;
    }
    if let Some(port) = file.port {
        config.port = port;
    }
    config.bearer_token = file.bearer_token;
    if let Some(secure_mode) = file.secure_mode {
        config.secure_mode = secure_mode;
    }
    if let Some(allowed_commands) = file.allowed_commands {
        config.allowed_commands = allowed_commands;
    }
    if let Some(max_memory_logs) = file.max_memory_logs {
        config.max_memory_logs = max_memory_logs;
    }
    config.database_url = file.database_url;
    if let Some(shutdown_timeout_sec) = file.shutdown_timeout_sec {
        config.shutdown_timeout_sec = shutdown_timeout_sec;
    }

    if let Ok(token) = std::env::var("FMCP_BEARER_TOKEN") {
        config.bearer_token = Some(token);
    }
    if let Ok(secure) = std::env::var("FMCP_SECURE_MODE") {
        config.secure_mode = matches!(secure.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(extra) = std::env::var("FMCP_ALLOWED_COMMANDS") {
        config
            .allowed_commands
            .extend(extra.split(',').map(str::trim).filter(|c| !c.is_empty()).map(str::to_string));
    }
    if let Ok(cap) = std::env::var("FMCP_MAX_MEMORY_LOGS")
        && let Ok(cap) = cap.parse()
    {
        config.max_memory_logs = cap;
    }
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        config.database_url = Some(database_url);
    }

    if let Some(bind) = overrides.bind {
        config.bind = bind;
    }
    if let Some(port) = overrides.port {
        config.port = port;
    }
    if let Some(database_url) = overrides.database_url {
        config.database_url = Some(database_url);
    }

    sanitize_secure_mode(config)
}

/// `secure_mode` without a token is a misconfiguration the gateway would
/// otherwise reject every request against; refuse to boot with it.
fn sanitize_secure_mode(mut config: GatewayConfig) -> GatewayConfig {
    if config.secure_mode && config.bearer_token.is_none() {
        tracing::warn!("FMCP_SECURE_MODE is set but no bearer token was provided; disabling auth");
        config.secure_mode = false;
    }
    config
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_insecure_and_in_memory() {
        let config = GatewayConfig::default();
        assert!(!config.secure_mode);
        assert!(config.bearer_token.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn parses_a_minimal_config_file() {
        let file: ConfigFile = toml::from_str("bind = \"0.0.0.0\"\nport = 9000\n").unwrap();
        assert_eq!(file.bind.as_deref(), Some("0.0.0.0"));
        assert_eq!(file.port, Some(9000));
    }

    #[test]
    fn secure_mode_without_token_is_refused() {
        let config = GatewayConfig {
            secure_mode: true,
            bearer_token: None,
            ..GatewayConfig::default()
        };
        assert!(!sanitize_secure_mode(config).secure_mode);
    }

    #[test]
    fn secure_mode_with_token_is_kept() {
        let config = GatewayConfig {
            secure_mode: true,
            bearer_token: Some("secret".to_string()),
            ..GatewayConfig::default()
        };
        assert!(sanitize_secure_mode(config).secure_mode);
    }
}
