//! Numbered schema migrations.
//!
//! Each step runs at most once, inside its own transaction, and is recorded
//! in `_migrations`. `migrate` is idempotent and called on every open.

use sqlx::SqlitePool;

use crate::{Error, Result};

/// Ordered DDL steps. Append only; never edit an applied step.
const MIGRATIONS: &[&str] = &[
    // 1: sessions
    "CREATE TABLE sessions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        project_path TEXT NOT NULL,
        status TEXT NOT NULL CHECK(status IN ('active', 'paused', 'terminated')),
        config_snapshot TEXT,
        coordinator TEXT,
        created_at TEXT NOT NULL
    )",
    // 2: agents
    "CREATE TABLE agents (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        model TEXT,
        pane TEXT NOT NULL,
        status TEXT NOT NULL CHECK(status IN ('idle', 'working', 'error', 'crashed')),
        current_task TEXT,
        performance TEXT,
        last_seen TEXT NOT NULL,
        UNIQUE(session_id, name)
    )",
    // 3: tasks (assignments)
    "CREATE TABLE tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        agent_id TEXT NOT NULL,
        bead_id TEXT NOT NULL,
        correlation_id TEXT,
        status TEXT NOT NULL CHECK(status IN ('assigned', 'working', 'completed', 'failed', 'reassigned')),
        score REAL NOT NULL,
        confidence REAL NOT NULL,
        reason TEXT NOT NULL,
        prompt TEXT NOT NULL,
        retry_count INTEGER NOT NULL DEFAULT 0,
        result TEXT,
        assigned_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )",
    // 4: reservations
    "CREATE TABLE reservations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        agent_id TEXT NOT NULL,
        path_pattern TEXT NOT NULL,
        exclusive INTEGER NOT NULL DEFAULT 0,
        correlation_id TEXT,
        reason TEXT,
        expires_at TEXT NOT NULL,
        released_at TEXT,
        force_released_by TEXT,
        created_at TEXT NOT NULL
    )",
    // 5: approvals
    "CREATE TABLE approvals (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        resource TEXT NOT NULL,
        reason TEXT NOT NULL,
        requester TEXT NOT NULL,
        requires_slb INTEGER NOT NULL DEFAULT 0,
        allowed_approvers TEXT,
        status TEXT NOT NULL CHECK(status IN ('pending', 'approved', 'denied', 'expired')),
        approver TEXT,
        approved_at TEXT,
        deny_reason TEXT,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )",
    // 6: bead history (append-only)
    "CREATE TABLE bead_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT,
        bead_id TEXT NOT NULL,
        bead_title TEXT,
        from_status TEXT,
        to_status TEXT NOT NULL,
        agent_id TEXT,
        agent_kind TEXT,
        agent_name TEXT,
        pane TEXT,
        trigger_kind TEXT NOT NULL,
        reason TEXT,
        prompt TEXT,
        retry_count INTEGER NOT NULL DEFAULT 0,
        transitioned_at TEXT NOT NULL
    )",
    // 7: event log
    "CREATE TABLE event_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        correlation_id TEXT,
        created_at TEXT NOT NULL
    )",
    // 8: tool health
    "CREATE TABLE tool_health (
        tool TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        details TEXT,
        checked_at TEXT NOT NULL
    )",
    // 9: context packs
    "CREATE TABLE context_packs (
        id TEXT PRIMARY KEY,
        session_id TEXT,
        name TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    // 10: hot-path indexes
    "CREATE INDEX idx_tasks_session_status ON tasks(session_id, status);
     CREATE INDEX idx_tasks_bead ON tasks(bead_id);
     CREATE INDEX idx_reservations_session ON reservations(session_id);
     CREATE INDEX idx_history_bead ON bead_history(bead_id);
     CREATE INDEX idx_history_session ON bead_history(session_id);
     CREATE INDEX idx_events_session ON event_log(session_id)",
];

/// Apply all pending migrations.
///
/// # Errors
///
/// Returns `Error::DatabaseError` if a step fails; applied steps stay
/// recorded so a rerun resumes where it stopped.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::DatabaseError(format!("failed to create _migrations table: {e}")))?;

    let applied: Vec<i64> = sqlx::query_scalar("SELECT version FROM _migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to read applied migrations: {e}")))?;

    for (step, ddl) in MIGRATIONS.iter().enumerate() {
        let version = i64::try_from(step)
            .map_err(|_| Error::DatabaseError("migration count exceeds i64".to_string()))?
            + 1;
        if applied.contains(&version) {
            continue;
        }

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to begin migration {version}: {e}")))?;

        for statement in ddl.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::DatabaseError(format!("migration {version} failed: {e}"))
                })?;
        }

        sqlx::query("INSERT INTO _migrations (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to record migration {version}: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to commit migration {version}: {e}")))?;
    }

    Ok(())
}

/// Highest applied migration version.
pub async fn current_version(pool: &SqlitePool) -> Result<i64> {
    sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM _migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to read migration version: {e}")))
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn memory_pool() -> Result<SqlitePool> {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to create test pool: {e}")))
    }

    #[tokio::test]
    async fn test_migrate_from_empty() -> Result<()> {
        let pool = memory_pool().await?;
        migrate(&pool).await?;

        let version = current_version(&pool).await?;
        assert_eq!(version, i64::try_from(MIGRATIONS.len()).unwrap_or(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() -> Result<()> {
        let pool = memory_pool().await?;
        migrate(&pool).await?;
        migrate(&pool).await?;
        migrate(&pool).await?;

        let version = current_version(&pool).await?;
        assert_eq!(version, i64::try_from(MIGRATIONS.len()).unwrap_or(0));
        Ok(())
    }

    #[tokio::test]
    async fn test_all_tables_exist_after_migrate() -> Result<()> {
        let pool = memory_pool().await?;
        migrate(&pool).await?;

        for table in [
            "sessions",
            "agents",
            "tasks",
            "reservations",
            "approvals",
            "bead_history",
            "event_log",
            "tool_health",
            "context_packs",
        ] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .map_err(|e| Error::DatabaseError(e.to_string()))?;
            assert_eq!(count, 1, "missing table {table}");
        }
        Ok(())
    }
}
