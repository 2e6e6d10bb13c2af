//! Append-only event log.
//!
//! The log is the ground truth of what happened; other tables are fast
//! materialized views kept consistent with it. Ids are monotonically
//! increasing and `replay` streams a session's entries in id order.

use sqlx::{Row, SqliteConnection};

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{Error, Result};

/// One logged event.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EventLogEntry {
    pub id: i64,
    pub session_id: String,
    pub event_type: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

fn parse_event_row(row: &sqlx::sqlite::SqliteRow) -> Result<EventLogEntry> {
    let payload_str: String = row
        .try_get("payload")
        .map_err(|e| Error::DatabaseError(format!("field 'payload': {e}")))?;
    let created_at_str: String = row
        .try_get("created_at")
        .map_err(|e| Error::DatabaseError(format!("field 'created_at': {e}")))?;

    Ok(EventLogEntry {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| Error::DatabaseError(format!("field 'session_id': {e}")))?,
        event_type: row
            .try_get("event_type")
            .map_err(|e| Error::DatabaseError(format!("field 'event_type': {e}")))?,
        payload: serde_json::from_str(&payload_str)
            .map_err(|e| Error::ParseError(format!("invalid event payload: {e}")))?,
        correlation_id: row
            .try_get("correlation_id")
            .map_err(|e| Error::DatabaseError(format!("field 'correlation_id': {e}")))?,
        created_at: parse_rfc3339(&created_at_str)?,
    })
}

impl StateDb {
    /// Append an event; the store assigns the id.
    pub async fn log_event(
        &self,
        session_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        correlation_id: Option<&str>,
    ) -> Result<i64> {
        let mut conn = self.pool().acquire().await.map_err(Error::from)?;
        log_event_tx(&mut conn, session_id, event_type, payload, correlation_id).await
    }

    /// Most recent events for a session, newest first.
    pub async fn list_events(&self, session_id: &str, limit: i64) -> Result<Vec<EventLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM event_log WHERE session_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to list events: {e}")))?;

        rows.iter().map(parse_event_row).collect()
    }

    /// Stream a session's events with id > `from_id`, in id order, calling
    /// `f` for each. An error from `f` aborts the replay with that error.
    pub async fn replay_events<F>(&self, session_id: &str, from_id: i64, mut f: F) -> Result<()>
    where
        F: FnMut(&EventLogEntry) -> Result<()>,
    {
        let rows = sqlx::query(
            "SELECT * FROM event_log WHERE session_id = ? AND id > ? ORDER BY id",
        )
        .bind(session_id)
        .bind(from_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to replay events: {e}")))?;

        for row in &rows {
            let entry = parse_event_row(row)?;
            f(&entry)?;
        }
        Ok(())
    }
}

/// Transaction-scoped append; used when an event must commit atomically
/// with the state change it describes.
pub async fn log_event_tx(
    conn: &mut SqliteConnection,
    session_id: &str,
    event_type: &str,
    payload: &serde_json::Value,
    correlation_id: Option<&str>,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO event_log (session_id, event_type, payload, correlation_id, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(event_type)
    .bind(payload.to_string())
    .bind(correlation_id)
    .bind(now_rfc3339())
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(format!("failed to log event: {e}")))?;

    Ok(result.last_insert_rowid())
}
