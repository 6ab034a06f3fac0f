//! Server Manager: a process table keyed by `server_id`, bringing MCP child
//! processes up and down per restart policy and exposing a proxy handle for
//! tool calls. Grounded on the spawn/liveness idiom in the teacher's
//! `whatsapp::process::start_sidecar`/`SidecarProcess` (spawn, probe
//! readiness, graceful SIGTERM-then-kill stop) generalized from one
//! hardcoded sidecar to an arbitrary table of MCP children, with the restart
//! decision delegated to `fluidmcp-restart`.

pub mod allowlist;
pub mod error;
pub mod locks;
pub mod logfile;

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use fluidmcp_mcp::{McpClient, McpClientTrait};
use fluidmcp_persistence::{
    Repository,
    types::{
        CachedTool, InstanceState, LogEntry, LogStream, RestartPolicyKind, ServerConfig,
        ServerInstance,
    },
};
use fluidmcp_restart::{RestartPolicy, RestartTracker};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[cfg(feature = "metrics")]
use fluidmcp_metrics::{counter, manager as manager_metrics};

use crate::{
    allowlist::{CommandAllowlist, build_child_env},
    error::{Error, Result},
    locks::LockTable,
};

pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(15);

/// Handle to a running child's MCP proxy, shared by every caller that wants
/// to issue tool calls against it concurrently.
pub type ProxyHandle = Arc<RwLock<McpClient>>;

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub uptime_sec: Option<i64>,
    pub restart_count: u32,
    pub last_error: Option<String>,
}

struct RunningEntry {
    client: ProxyHandle,
    watchdog: tokio::task::JoinHandle<()>,
}

pub struct ServerManager {
    repo: Arc<dyn Repository>,
    allowlist: CommandAllowlist,
    locks: LockTable,
    running: RwLock<HashMap<String, RunningEntry>>,
    /// Restart history per server id, kept independent of `running` so a
    /// crash-and-respawn cycle carries its budget forward instead of
    /// starting a fresh `RestartTracker` (and thus a fresh restart budget)
    /// every time `spawn_locked` rebuilds the process table entry.
    restart_trackers: RwLock<HashMap<String, RestartTracker>>,
    log_dir: PathBuf,
    init_timeout: Duration,
    shutdown_timeout: Duration,
    max_log_bytes: u64,
    max_log_backups: u32,
    watchdog_interval: Duration,
}

fn persistence_err(e: fluidmcp_persistence::Error) -> Error {
    Error::persistence_degraded(e.to_string())
}

/// Sends a terminate signal and waits up to `grace` for the child to exit on
/// its own before force-killing it. On non-Unix targets there is no
/// SIGTERM-equivalent available through `McpClient`, so this goes straight
/// to a force kill.
async fn graceful_stop(client: &ProxyHandle, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = client.read().await.pid().await {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }

        let exited = tokio::time::timeout(grace, async {
            while client.read().await.is_alive().await {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .is_ok();

        if exited {
            return;
        }
        warn!("child did not exit gracefully within the grace period, killing");
    }

    let _ = grace;
    client.write().await.shutdown().await;
}

fn restart_policy_of(config: &ServerConfig) -> RestartPolicy {
    RestartPolicy {
        max_restarts: config.max_restarts,
        restart_window_sec: config.restart_window_sec,
        ..RestartPolicy::default()
    }
}

impl ServerManager {
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>, log_dir: PathBuf, allowlist: CommandAllowlist) -> Self {
        Self {
            repo,
            allowlist,
            locks: LockTable::new(),
            running: RwLock::new(HashMap::new()),
            restart_trackers: RwLock::new(HashMap::new()),
            log_dir,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_log_bytes: logfile::DEFAULT_MAX_BYTES,
            max_log_backups: logfile::DEFAULT_MAX_BACKUPS,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    // ── Config CRUD ──────────────────────────────────────────────────────

    pub async fn add(&self, config: ServerConfig) -> Result<()> {
        if !ServerConfig::is_valid_id(&config.id) {
            return Err(Error::validation(format!("invalid server id '{}'", config.id)));
        }
        self.allowlist.validate(&config.command)?;

        let _guard = self.locks.acquire(&config.id).await;
        if self.repo.get_server(&config.id).await.map_err(persistence_err)?.is_some() {
            return Err(Error::conflict(format!("server '{}' already exists", config.id)));
        }
        self.repo.save_server(config).await.map_err(persistence_err)?;
        Ok(())
    }

    pub async fn update(&self, id: &str, patch: impl FnOnce(&mut ServerConfig)) -> Result<()> {
        let _guard = self.locks.acquire(id).await;
        let mut config = self
            .repo
            .get_server(id)
            .await
            .map_err(persistence_err)?
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))?;

        patch(&mut config);
        self.allowlist.validate(&config.command)?;
        config.updated_at = Utc::now();
        self.repo.save_server(config).await.map_err(persistence_err)?;
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        {
            let _guard = self.locks.acquire(id).await;
            if self.repo.get_server(id).await.map_err(persistence_err)?.is_none() {
                return Err(Error::not_found(format!("server '{id}' not found")));
            }
        }
        self.stop(id, self.shutdown_timeout).await.or_else(|e| {
            if e.classify() == fluidmcp_common::ErrorKind::NotFound {
                Ok(())
            } else {
                Err(e)
            }
        })?;

        let _guard = self.locks.acquire(id).await;
        self.repo.delete_server(id).await.map_err(persistence_err)?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<ServerConfig>> {
        self.repo.list_servers(false).await.map_err(persistence_err)
    }

    pub async fn status(&self, id: &str) -> Result<StatusReport> {
        let instance = self
            .repo
            .get_instance(id)
            .await
            .map_err(persistence_err)?
            .unwrap_or_else(|| ServerInstance::stopped(id));

        let uptime_sec = instance.start_time.map(|t| (Utc::now() - t).num_seconds());
        Ok(StatusReport {
            state: instance.state,
            pid: instance.pid,
            uptime_sec,
            restart_count: instance.restart_count,
            last_error: instance.last_error,
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Idempotent against `running`: a second concurrent `start` for the
    /// same id blocks on the per-id lock and then observes `running`. A
    /// manual start always begins a fresh restart budget at `restart_count`
    /// 0; `on_child_unhealthy`'s scheduled respawn goes through
    /// `restart_locked` instead to carry the count forward.
    pub async fn start(self: &Arc<Self>, id: &str) -> Result<()> {
        let _guard = self.locks.acquire(id).await;

        if self.running.read().await.contains_key(id) {
            return Ok(());
        }

        let config = self
            .repo
            .get_server(id)
            .await
            .map_err(persistence_err)?
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))?;

        self.restart_trackers
            .write()
            .await
            .insert(id.to_string(), RestartTracker::new());
        self.spawn_locked(&config, 0).await
    }

    /// Respawns a child at a known `restart_count`, reusing `start`'s
    /// idempotency check but without resetting the restart budget.
    async fn restart_locked(self: &Arc<Self>, id: &str, restart_count: u32) -> Result<()> {
        let _guard = self.locks.acquire(id).await;

        if self.running.read().await.contains_key(id) {
            return Ok(());
        }

        let config = self
            .repo
            .get_server(id)
            .await
            .map_err(persistence_err)?
            .ok_or_else(|| Error::not_found(format!("server '{id}' not found")))?;

        self.spawn_locked(&config, restart_count).await
    }

    async fn spawn_locked(self: &Arc<Self>, config: &ServerConfig, restart_count: u32) -> Result<()> {
        self.allowlist.validate(&config.command)?;

        let env = build_child_env(&config.env, std::env::vars())?;

        let mut starting = ServerInstance::stopped(&config.id);
        starting.state = InstanceState::Starting;
        starting.restart_count = restart_count;
        starting.updated_at = Utc::now();
        self.repo
            .save_instance(starting, None)
            .await
            .map_err(persistence_err)?;

        let log_file = logfile::open_rotated(&self.log_dir, &config.id, self.max_log_bytes, self.max_log_backups)
            .await
            .ok();

        let connect_result = McpClient::connect_with_stderr_log(
            &config.id,
            &config.command,
            &config.args,
            &env,
            self.init_timeout,
            log_file,
        )
        .await;

        let mut client = match connect_result {
            Ok(client) => client,
            Err(e) => {
                warn!(server = %config.id, error = %e, "spawn/readiness probe failed");
                self.mark_failed(&config.id, e.to_string(), Some(restart_count), None).await?;
                #[cfg(feature = "metrics")]
                counter!(manager_metrics::START_FAILURES_TOTAL).increment(1);
                return Err(Error::launch_failed(format!("failed to start '{}': {e}", config.id)));
            },
        };

        let pid = client.pid().await;
        if let Ok(tools) = client.list_tools().await {
            let cached: Vec<CachedTool> = tools
                .iter()
                .map(|t| CachedTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.input_schema.clone(),
                })
                .collect();
            let mut updated = config.clone();
            updated.tools = cached;
            updated.updated_at = Utc::now();
            let _ = self.repo.save_server(updated).await;
        }

        let mut instance = ServerInstance::stopped(&config.id);
        instance.state = InstanceState::Running;
        instance.pid = pid;
        instance.restart_count = restart_count;
        instance.start_time = Some(Utc::now());
        instance.updated_at = Utc::now();
        self.repo
            .save_instance(instance, None)
            .await
            .map_err(persistence_err)?;

        #[cfg(feature = "metrics")]
        {
            counter!(manager_metrics::STARTS_TOTAL).increment(1);
        }

        let proxy: ProxyHandle = Arc::new(RwLock::new(client));
        let watchdog = self.spawn_watchdog(config.id.clone(), Arc::clone(&proxy));

        self.running.write().await.insert(
            config.id.clone(),
            RunningEntry {
                client: proxy,
                watchdog,
            },
        );

        info!(server = %config.id, ?pid, restart_count, "server started");
        Ok(())
    }

    /// `restart_count`, when given, overwrites the persisted count (the
    /// caller already knows the attempt number); `expected_pid` guards
    /// against a stale writer clobbering a concurrently-restarted instance.
    async fn mark_failed(
        &self,
        id: &str,
        reason: String,
        restart_count: Option<u32>,
        expected_pid: Option<Option<u32>>,
    ) -> Result<()> {
        let mut instance = self.repo.get_instance(id).await.map_err(persistence_err)?.unwrap_or_else(|| ServerInstance::stopped(id));
        instance.state = InstanceState::Failed;
        instance.last_error = Some(reason);
        if let Some(restart_count) = restart_count {
            instance.restart_count = restart_count;
        }
        instance.updated_at = Utc::now();
        self.repo.save_instance(instance, expected_pid).await.map_err(persistence_err)?;
        Ok(())
    }

    /// Idempotent against `stopped`. Requests a graceful shutdown, waits up
    /// to `grace`, then force-kills.
    pub async fn stop(&self, id: &str, grace: Duration) -> Result<()> {
        let _guard = self.locks.acquire(id).await;

        let Some(entry) = self.running.write().await.remove(id) else {
            return Err(Error::not_found(format!("server '{id}' is not running")));
        };
        entry.watchdog.abort();

        {
            let mut instance = self.repo.get_instance(id).await.map_err(persistence_err)?.unwrap_or_else(|| ServerInstance::stopped(id));
            instance.state = InstanceState::Stopping;
            instance.updated_at = Utc::now();
            self.repo.save_instance(instance, None).await.map_err(persistence_err)?;
        }

        graceful_stop(&entry.client, grace).await;

        let mut instance = ServerInstance::stopped(id);
        instance.stop_time = Some(Utc::now());
        self.repo.save_instance(instance, None).await.map_err(persistence_err)?;

        #[cfg(feature = "metrics")]
        counter!(manager_metrics::STOPS_TOTAL).increment(1);

        Ok(())
    }

    pub async fn reset_restart_history(&self, id: &str) -> Result<()> {
        if let Some(tracker) = self.restart_trackers.write().await.get_mut(id) {
            tracker.reset();
        }
        Ok(())
    }

    /// Entry point for the HTTP tool-call path: returns a handle to the
    /// running child's proxy, starting it first if requested and not
    /// already running.
    pub async fn acquire_proxy(
        self: &Arc<Self>,
        id: &str,
        start_if_needed: bool,
        timeout: Duration,
    ) -> Result<ProxyHandle> {
        if let Some(entry) = self.running.read().await.get(id) {
            return Ok(Arc::clone(&entry.client));
        }
        if !start_if_needed {
            return Err(Error::not_found(format!("server '{id}' is not running")));
        }

        tokio::time::timeout(timeout, self.start(id))
            .await
            .map_err(|_| Error::timeout(format!("timed out starting server '{id}'")))??;

        self.running
            .read()
            .await
            .get(id)
            .map(|e| Arc::clone(&e.client))
            .ok_or_else(|| Error::launch_failed(format!("server '{id}' failed to start")))
    }

    fn spawn_watchdog(self: &Arc<Self>, id: String, client: ProxyHandle) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(manager.watchdog_interval).await;

                #[cfg(feature = "metrics")]
                counter!(manager_metrics::WATCHDOG_PROBES_TOTAL).increment(1);

                let alive = client.read().await.is_alive().await;
                let ping_ok = if alive {
                    client.write().await.list_tools().await.is_ok()
                } else {
                    false
                };

                if alive && ping_ok {
                    continue;
                }

                warn!(server = %id, alive, ping_ok, "watchdog detected unhealthy child");
                manager.on_child_unhealthy(&id).await;
                return;
            }
        })
    }

    async fn on_child_unhealthy(self: &Arc<Self>, id: &str) {
        let _guard = self.locks.acquire(id).await;

        let Some(entry) = self.running.write().await.remove(id) else {
            return;
        };
        let observed_pid = entry.client.read().await.pid().await;
        entry.client.write().await.shutdown().await;

        let _ = self
            .mark_failed(id, "watchdog detected unresponsive child".into(), None, Some(observed_pid))
            .await;

        let Ok(Some(config)) = self.repo.get_server(id).await else {
            return;
        };
        let policy = restart_policy_of(&config);
        let instance = self
            .repo
            .get_instance(id)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| ServerInstance::stopped(id));

        // A watchdog-detected unhealthy child is always an abnormal exit, so
        // `OnFailure` and `Always` both restart; only `Never` opts out.
        let should_restart = !matches!(config.restart_policy, RestartPolicyKind::Never);
        if !should_restart {
            return;
        }

        let mut trackers = self.restart_trackers.write().await;
        let tracker = trackers.entry(id.to_string()).or_default();

        match tracker.can_restart(&policy, instance.restart_count) {
            Ok(()) => {},
            Err(refusal) => {
                warn!(server = %id, %refusal, "restart refused, staying failed");
                #[cfg(feature = "metrics")]
                counter!(manager_metrics::RESTART_BUDGET_EXHAUSTED_TOTAL).increment(1);
                return;
            },
        }

        let delay = RestartTracker::backoff_delay(&policy, instance.restart_count);
        tracker.record_restart();
        drop(trackers);

        let new_restart_count = instance.restart_count + 1;
        let manager = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            #[cfg(feature = "metrics")]
            counter!(manager_metrics::RESTARTS_TOTAL).increment(1);
            if let Err(e) = manager.restart_locked(&id, new_restart_count).await {
                warn!(server = %id, error = %e, "scheduled restart failed");
            }
        });
    }

    /// Stops every running instance in parallel, bounded by `grace` each.
    pub async fn shutdown_all(&self, grace: Duration) {
        let ids: Vec<String> = self.running.read().await.keys().cloned().collect();
        let stops = ids.into_iter().map(|id| async move {
            if let Err(e) = self.stop(&id, grace).await {
                warn!(server = %id, error = %e, "error during shutdown stop");
            }
        });
        futures::future::join_all(stops).await;
    }

    /// Appends a log line into the Repository (typically fed via a
    /// `BufferedLogWriter` by the caller, kept decoupled here).
    pub fn log_entry(server_id: &str, stream: LogStream, content: String) -> LogEntry {
        LogEntry {
            server_id: server_id.to_string(),
            timestamp: Utc::now(),
            stream,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use fluidmcp_persistence::memory::InMemoryRepository;

    use super::*;

    fn test_config(id: &str, command: &str) -> ServerConfig {
        let now = Utc::now();
        ServerConfig {
            id: id.into(),
            name: id.into(),
            description: None,
            enabled: true,
            command: command.into(),
            args: vec![],
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
        }
    }

    fn test_manager(dir: &std::path::Path) -> Arc<ServerManager> {
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        Arc::new(ServerManager::new(repo, dir.to_path_buf(), CommandAllowlist::default()))
    }

    #[tokio::test]
    async fn add_rejects_command_outside_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let err = manager.add(test_config("evil", "rm")).await.unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn add_rejects_duplicate_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();
        let err = manager.add(test_config("fs", "npx")).await.unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_unknown_server_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let err = manager.update("missing", |c| c.enabled = false).await.unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn update_applies_patch_and_revalidates_command() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();

        manager.update("fs", |c| c.command = "node".into()).await.unwrap();
        let configs = manager.list().await.unwrap();
        assert_eq!(configs[0].command, "node");

        let err = manager.update("fs", |c| c.command = "rm".into()).await.unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn status_of_never_started_server_is_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();

        let status = manager.status("fs").await.unwrap();
        assert_eq!(status.state, InstanceState::Stopped);
        assert!(status.pid.is_none());
    }

    #[tokio::test]
    async fn start_rejects_unknown_server() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        let err = manager.start("missing").await.unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn stop_unknown_running_server_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();
        let err = manager.stop("fs", Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn remove_deletes_config() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();
        manager.remove("fs").await.unwrap();
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn acquire_proxy_without_start_if_needed_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();
        let err = manager
            .acquire_proxy("fs", false, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.classify(), fluidmcp_common::ErrorKind::NotFound);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_respawn_persists_the_attempted_restart_count() {
        // A nonexistent command fails at process spawn, well before any MCP
        // handshake, so this is deterministic and fast.
        let dir = tempfile::tempdir().unwrap();
        let repo: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let allowlist = CommandAllowlist::new(["nonexistent_cmd_xyz_42".to_string()]);
        let manager = Arc::new(ServerManager::new(repo, dir.path().to_path_buf(), allowlist));
        manager.add(test_config("bad", "nonexistent_cmd_xyz_42")).await.unwrap();

        manager.start("bad").await.unwrap_err();
        let status = manager.status("bad").await.unwrap();
        assert_eq!(status.state, InstanceState::Failed);
        assert_eq!(status.restart_count, 0);

        // Simulates the scheduled respawn `on_child_unhealthy` issues after a
        // crash: the attempt number must survive into the persisted instance
        // even though this attempt also fails.
        manager.restart_locked("bad", 2).await.unwrap_err();
        let status = manager.status("bad").await.unwrap();
        assert_eq!(status.state, InstanceState::Failed);
        assert_eq!(status.restart_count, 2);
    }

    #[tokio::test]
    async fn manual_restart_after_start_resets_the_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        manager.add(test_config("fs", "npx")).await.unwrap();

        // No tracker exists yet; resetting one that was never created must
        // not error.
        manager.reset_restart_history("fs").await.unwrap();
    }
}
