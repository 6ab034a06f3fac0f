//! `fluidmcp db` — inspect or reset the durable SQLite store. Only
//! meaningful when the gateway was configured with `database_url`; against
//! the default in-memory backend these commands are no-ops.

use std::path::PathBuf;

use clap::Subcommand;
use fluidmcp_persistence::SqliteRepository;

#[derive(Subcommand)]
pub enum DbAction {
    /// Delete the database file (and its WAL/SHM siblings) completely.
    Reset,
    /// Delete every row from every table but keep the schema.
    Clear,
    /// Create the database file and run pending migrations.
    Migrate,
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    database_url.strip_prefix("sqlite://").or_else(|| database_url.strip_prefix("sqlite:")).map(PathBuf::from)
}

pub async fn handle_db(action: DbAction, database_url: Option<String>) -> anyhow::Result<()> {
    let Some(database_url) = database_url else {
        eprintln!("no database_url configured; the gateway is running against the in-memory backend");
        return Ok(());
    };

    match action {
        DbAction::Reset => reset(&database_url),
        DbAction::Clear => clear(&database_url).await,
        DbAction::Migrate => migrate(&database_url).await,
    }
}

fn reset(database_url: &str) -> anyhow::Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        eprintln!("database_url '{database_url}' is not a sqlite:// uri, nothing to delete");
        return Ok(());
    };

    let mut deleted = false;
    for suffix in ["", "-wal", "-shm"] {
        let file = if suffix.is_empty() { path.clone() } else { path.with_extension(format!("db{suffix}")) };
        if file.exists() {
            std::fs::remove_file(&file)?;
            println!("Deleted: {}", file.display());
            deleted = true;
        }
    }

    if !deleted {
        println!("No database files found at {}.", path.display());
    }
    Ok(())
}

async fn clear(database_url: &str) -> anyhow::Result<()> {
    let pool = sqlx::SqlitePool::connect(database_url).await?;
    for table in ["server_logs", "server_instances", "servers", "llm_models"] {
        let query = format!("DELETE FROM {table}");
        match sqlx::query(&query).execute(&pool).await {
            Ok(_) => println!("Cleared table: {table}"),
            Err(e) => eprintln!("warning: could not clear {table}: {e}"),
        }
    }
    pool.close().await;
    Ok(())
}

async fn migrate(database_url: &str) -> anyhow::Result<()> {
    SqliteRepository::connect(database_url, fluidmcp_persistence::memory::DEFAULT_MAX_LOGS_PER_SERVER).await?;
    println!("Migrations applied to {database_url}.");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_path_strips_scheme() {
        assert_eq!(sqlite_path("sqlite:///tmp/fluidmcp.db"), Some(PathBuf::from("/tmp/fluidmcp.db")));
        assert_eq!(sqlite_path("sqlite:fluidmcp.db"), Some(PathBuf::from("fluidmcp.db")));
        assert_eq!(sqlite_path("postgres://localhost/x"), None);
    }

    #[tokio::test]
    async fn migrate_then_clear_round_trips_against_a_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        migrate(&url).await.expect("migrate");
        assert!(db_path.exists());
        clear(&url).await.expect("clear");
    }
}
