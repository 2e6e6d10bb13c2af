//! Durable state: an embedded SQLite store behind a connection pool.
//!
//! One file on disk holds sessions, agents, tasks, reservations, approvals,
//! bead history and the append-only event log. Writes are serialized by an
//! advisory lock file next to the database; readers tolerate stale reads at
//! tick granularity. All operations return typed errors and composite
//! operations run inside explicit transactions.

use std::path::{Path, PathBuf};

use fs2::FileExt;
use futures::future::BoxFuture;
use sqlx::{sqlite::SqlitePoolOptions, SqliteConnection, SqlitePool};

use crate::{Error, Result};

pub mod agents;
pub mod approvals;
pub mod backup;
pub mod events;
pub mod health;
pub mod history;
mod migrations;
pub mod reservations;
pub mod sessions;
pub mod tasks;

pub use agents::{AgentRecord, AgentUpdate};
pub use approvals::{Approval, NewApproval};
pub use backup::verify_backup;
pub use events::EventLogEntry;
pub use health::{ContextPack, ToolHealth};
pub use history::{BeadHistoryEntry, BeadStats, NewHistoryEntry};
pub use reservations::{patterns_overlap, NewReservation, Reservation};
pub use sessions::{Session, SessionUpdate};
pub use tasks::{NewTask, TaskRecord, TaskUpdate};

/// Handle to the durable store. Cheap to clone; the advisory lock lives for
/// the lifetime of the first handle.
#[derive(Clone)]
pub struct StateDb {
    pool: SqlitePool,
    _lock: std::sync::Arc<LockGuard>,
}

/// Holds the advisory file lock until every `StateDb` clone is dropped.
struct LockGuard {
    file: Option<std::fs::File>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

fn acquire_lock(db_path: &Path) -> Result<LockGuard> {
    let lock_path: PathBuf = db_path.with_extension("lock");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| Error::IoError(format!("failed to open lock file: {e}")))?;
    file.try_lock_exclusive().map_err(|_| {
        Error::DatabaseError(format!(
            "state file is locked by another process: {}",
            lock_path.display()
        ))
    })?;
    Ok(LockGuard { file: Some(file) })
}

impl StateDb {
    /// Open (or create) the state file, enable WAL, run pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `Error::DatabaseError` if the file cannot be opened, another
    /// process holds the writer lock, or a migration fails.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::IoError(format!("failed to create state dir: {e}")))?;
        }

        let lock = acquire_lock(path)?;

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(&db_url)
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to connect to state db: {e}")))?;

        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to enable WAL mode: {e}")))?;
        sqlx::query("PRAGMA foreign_keys=ON;")
            .execute(&pool)
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to enable foreign keys: {e}")))?;

        migrations::migrate(&pool).await?;

        Ok(Self {
            pool,
            _lock: std::sync::Arc::new(lock),
        })
    }

    /// In-memory store for tests and ephemeral use.
    ///
    /// # Errors
    ///
    /// Returns `Error::DatabaseError` on pool or migration failure.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to create memory db: {e}")))?;

        sqlx::query("PRAGMA foreign_keys=ON;")
            .execute(&pool)
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to enable foreign keys: {e}")))?;

        migrations::migrate(&pool).await?;

        Ok(Self {
            pool,
            _lock: std::sync::Arc::new(LockGuard { file: None }),
        })
    }

    /// The underlying pool, for entity operations.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`
    /// (and on panic, via the transaction drop guard).
    ///
    /// Writes made through the supplied connection are visible to later
    /// statements in the same closure.
    ///
    /// # Errors
    ///
    /// Propagates the closure's error, or `Error::DatabaseError` on
    /// begin/commit failure.
    pub async fn transaction<T>(
        &self,
        f: impl for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send,
    ) -> Result<T>
    where
        T: Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to begin transaction: {e}")))?;

        let out = f(&mut *tx).await?;

        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to commit transaction: {e}")))?;
        Ok(out)
    }

    /// Highest applied migration version, for diagnostics.
    pub async fn schema_version(&self) -> Result<i64> {
        migrations::current_version(&self.pool).await
    }
}

/// Current wall-clock instant in the store's wire format (RFC3339).
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse a stored RFC3339 timestamp.
pub(crate) fn parse_rfc3339(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| Error::ParseError(format!("invalid timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_open_creates_file_and_migrates() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::IoError(e.to_string()))?;
        let path = dir.path().join("state.db");

        let db = StateDb::open(&path).await?;
        assert!(path.exists());
        assert!(db.schema_version().await? > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_twice_is_safe_after_drop() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::IoError(e.to_string()))?;
        let path = dir.path().join("state.db");

        let first = StateDb::open(&path).await?;
        let version = first.schema_version().await?;
        drop(first);

        let second = StateDb::open(&path).await?;
        assert_eq!(second.schema_version().await?, version);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() -> Result<()> {
        let db = StateDb::open_in_memory().await?;

        db.transaction(|conn: &mut SqliteConnection| {
            Box::pin(async move {
                sqlx::query(
                    "INSERT INTO sessions (id, name, project_path, status, created_at)
                     VALUES ('s1', 'one', '/tmp', 'active', '2026-01-01T00:00:00Z')",
                )
                .execute(&mut *conn)
                .await
                .map_err(Error::from)?;
                Ok(())
            })
        })
        .await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(db.pool())
            .await
            .map_err(Error::from)?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_err() -> Result<()> {
        let db = StateDb::open_in_memory().await?;

        let result: Result<()> = db
            .transaction(|conn: &mut SqliteConnection| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO sessions (id, name, project_path, status, created_at)
                         VALUES ('s1', 'one', '/tmp', 'active', '2026-01-01T00:00:00Z')",
                    )
                    .execute(&mut *conn)
                    .await
                    .map_err(Error::from)?;
                    Err(Error::ValidationError("abort".to_string()))
                })
            })
            .await;
        assert!(result.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(db.pool())
            .await
            .map_err(Error::from)?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_sees_own_writes() -> Result<()> {
        let db = StateDb::open_in_memory().await?;

        let seen: i64 = db
            .transaction(|conn: &mut SqliteConnection| {
                Box::pin(async move {
                    sqlx::query(
                        "INSERT INTO sessions (id, name, project_path, status, created_at)
                         VALUES ('s1', 'one', '/tmp', 'active', '2026-01-01T00:00:00Z')",
                    )
                    .execute(&mut *conn)
                    .await
                    .map_err(Error::from)?;

                    sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE id = 's1'")
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(Error::from)
                })
            })
            .await?;
        assert_eq!(seen, 1);
        Ok(())
    }

    #[test]
    fn test_parse_rfc3339_round_trip() {
        let now = now_rfc3339();
        assert!(parse_rfc3339(&now).is_ok());
        assert!(parse_rfc3339("not a time").is_err());
    }
}
