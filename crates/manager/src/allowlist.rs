//! Command allowlist and environment-variable filtering for the spawn
//! protocol. Grounded on `validators.py::validate_command_allowlist` (fixed
//! default set, extensible via an env var) and the env-var filtering
//! `server_builder.py` performs before handing a launch spec to `subprocess`.

use std::collections::HashMap;

use crate::error::{Error, Result};

pub const DEFAULT_ALLOWED_COMMANDS: &[&str] =
    &["npx", "node", "python", "python3", "uv", "uvx", "docker", "deno", "bun"];

/// Safe-list of OS environment variables forwarded to every child by
/// default, beyond whatever the server's own `env` map supplies.
const SAFE_ENV_PREFIXES: &[&str] = &["CUDA_"];
const SAFE_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "TMPDIR",
    "LANG",
    "LC_ALL",
    "LD_LIBRARY_PATH",
    "PYTHONPATH",
    "VIRTUAL_ENV",
];

#[derive(Debug, Clone)]
pub struct CommandAllowlist {
    commands: Vec<String>,
}

impl CommandAllowlist {
    #[must_use]
    pub fn new(extra: impl IntoIterator<Item = String>) -> Self {
        let mut commands: Vec<String> = DEFAULT_ALLOWED_COMMANDS
            .iter()
            .map(|c| (*c).to_string())
            .collect();
        commands.extend(extra);
        Self { commands }
    }

    /// Parses `FMCP_ALLOWED_COMMANDS` (comma-separated) as the `extra` set.
    #[must_use]
    pub fn from_env_extension(csv: Option<&str>) -> Self {
        let extra: Vec<String> = csv
            .map(|s| s.split(',').map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect())
            .unwrap_or_default();
        Self::new(extra)
    }

    #[must_use]
    pub fn is_allowed(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }

    pub fn validate(&self, command: &str) -> Result<()> {
        if self.is_allowed(command) {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "command '{command}' is not in the allowlist"
            )))
        }
    }
}

impl Default for CommandAllowlist {
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

/// Builds the env map a child is spawned with: the filtered OS environment,
/// overridden (case-insensitively) by the server's own `env` map, then
/// `${VAR}` placeholders are expanded from that same resolved map in a
/// single pass. An unresolved placeholder is a launch-failed condition.
pub fn build_child_env(
    instance_env: &HashMap<String, String>,
    os_env: impl IntoIterator<Item = (String, String)>,
) -> Result<HashMap<String, String>> {
    let mut resolved: HashMap<String, String> = HashMap::new();

    for (key, value) in os_env {
        let upper = key.to_ascii_uppercase();
        if SAFE_ENV_VARS.contains(&upper.as_str())
            || SAFE_ENV_PREFIXES.iter().any(|p| upper.starts_with(p))
        {
            resolved.insert(upper, value);
        }
    }

    for (key, value) in instance_env {
        resolved.insert(key.to_ascii_uppercase(), value.clone());
    }

    let mut expanded = HashMap::with_capacity(resolved.len());
    for (key, value) in &resolved {
        expanded.insert(key.clone(), expand_placeholders(value, &resolved)?);
    }
    Ok(expanded)
}

fn expand_placeholders(value: &str, env: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();
    let bytes = value.as_bytes();

    while let Some((i, c)) = chars.next() {
        if c == '$' && bytes.get(i + 1) == Some(&b'{') {
            let rest = &value[i + 2..];
            let Some(end) = rest.find('}') else {
                out.push(c);
                continue;
            };
            let var_name = &rest[..end];
            let resolved = env.get(&var_name.to_ascii_uppercase()).ok_or_else(|| {
                Error::launch_failed(format!("unresolved placeholder \"${{{var_name}}}\" in env"))
            })?;
            out.push_str(resolved);
            for _ in 0..=end {
                chars.next();
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allowlist_accepts_known_commands() {
        let allowlist = CommandAllowlist::default();
        assert!(allowlist.is_allowed("npx"));
        assert!(!allowlist.is_allowed("rm"));
    }

    #[test]
    fn env_extension_adds_commands() {
        let allowlist = CommandAllowlist::from_env_extension(Some("custom-tool, another"));
        assert!(allowlist.is_allowed("custom-tool"));
        assert!(allowlist.is_allowed("another"));
        assert!(allowlist.is_allowed("npx"));
    }

    #[test]
    fn instance_env_overrides_os_env_case_insensitively() {
        let mut instance_env = HashMap::new();
        instance_env.insert("Path".to_string(), "/custom/bin".to_string());
        let os_env = vec![("PATH".to_string(), "/usr/bin".to_string())];

        let env = build_child_env(&instance_env, os_env).unwrap();
        assert_eq!(env.get("PATH"), Some(&"/custom/bin".to_string()));
        assert_eq!(env.len(), 1);
    }

    #[test]
    fn placeholder_expands_from_resolved_env() {
        let mut instance_env = HashMap::new();
        instance_env.insert("BASE".to_string(), "/srv".to_string());
        instance_env.insert("DATA_DIR".to_string(), "${BASE}/data".to_string());

        let env = build_child_env(&instance_env, std::iter::empty()).unwrap();
        assert_eq!(env.get("DATA_DIR"), Some(&"/srv/data".to_string()));
    }

    #[test]
    fn unresolved_placeholder_is_launch_failed() {
        let mut instance_env = HashMap::new();
        instance_env.insert("DATA_DIR".to_string(), "${MISSING}/data".to_string());

        let err = build_child_env(&instance_env, std::iter::empty()).unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::LaunchFailed);
    }

    #[test]
    fn unsafe_os_vars_are_dropped() {
        let os_env = vec![("SECRET_TOKEN".to_string(), "x".to_string())];
        let env = build_child_env(&HashMap::new(), os_env).unwrap();
        assert!(env.is_empty());
    }
}
