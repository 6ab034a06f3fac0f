//! Owner-only, size-rotated stderr log files for spawned children.

use std::path::{Path, PathBuf};

use fluidmcp_common::Error;
use tokio::fs;
use tracing::debug;

use crate::error::Result;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_BACKUPS: u32 = 3;

/// Opens (creating if needed) the stderr log file for `server_id` under
/// `log_dir`, rotating the existing file first if it has grown past
/// `max_bytes`. Returns a handle the caller can hand to the child process's
/// stdio redirection.
pub async fn open_rotated(
    log_dir: &Path,
    server_id: &str,
    max_bytes: u64,
    max_backups: u32,
) -> Result<std::fs::File> {
    fs::create_dir_all(log_dir)
        .await
        .map_err(|e| Error::launch_failed(format!("failed to create log dir: {e}")))?;

    let path = log_path(log_dir, server_id);
    if let Ok(metadata) = fs::metadata(&path).await {
        if metadata.len() > max_bytes {
            rotate(log_dir, server_id, max_backups).await?;
        }
    }

    let file = open_owner_only(&path)
        .await
        .map_err(|e| Error::launch_failed(format!("failed to open stderr log: {e}")))?;
    Ok(file)
}

fn log_path(log_dir: &Path, server_id: &str) -> PathBuf {
    log_dir.join(format!("{server_id}.stderr.log"))
}

async fn rotate(log_dir: &Path, server_id: &str, max_backups: u32) -> Result<()> {
    debug!(server = %server_id, "rotating stderr log file");
    let base = log_path(log_dir, server_id);

    for n in (1..max_backups).rev() {
        let from = log_dir.join(format!("{server_id}.stderr.log.{n}"));
        let to = log_dir.join(format!("{server_id}.stderr.log.{}", n + 1));
        if fs::metadata(&from).await.is_ok() {
            let _ = fs::rename(&from, &to).await;
        }
    }

    if max_backups > 0 {
        let backup = log_dir.join(format!("{server_id}.stderr.log.1"));
        fs::rename(&base, &backup)
            .await
            .map_err(|e| Error::launch_failed(format!("failed to rotate stderr log: {e}")))?;
    } else {
        fs::remove_file(&base)
            .await
            .map_err(|e| Error::launch_failed(format!("failed to truncate stderr log: {e}")))?;
    }
    Ok(())
}

#[cfg(unix)]
async fn open_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    tokio::task::block_in_place(|| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(path)
    })
}

#[cfg(not(unix))]
async fn open_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    tokio::task::block_in_place(|| std::fs::OpenOptions::new().create(true).append(true).open(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn opens_and_rotates_oversized_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "svc");
        fs::write(&path, vec![0u8; 100]).await.unwrap();

        open_rotated(dir.path(), "svc", 10, 2).await.unwrap();

        assert!(fs::metadata(dir.path().join("svc.stderr.log.1")).await.is_ok());
        assert!(fs::metadata(&path).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn small_log_is_not_rotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = log_path(dir.path(), "svc");
        fs::write(&path, b"hello").await.unwrap();

        open_rotated(dir.path(), "svc", 1000, 2).await.unwrap();

        assert!(fs::metadata(dir.path().join("svc.stderr.log.1")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread")]
    async fn log_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        open_rotated(dir.path(), "svc", DEFAULT_MAX_BYTES, DEFAULT_MAX_BACKUPS)
            .await
            .unwrap();
        let metadata = fs::metadata(log_path(dir.path(), "svc")).await.unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
