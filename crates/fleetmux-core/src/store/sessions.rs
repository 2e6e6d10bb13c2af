//! Session persistence.

use sqlx::Row;

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{types::SessionStatus, Error, Result};

/// A stored orchestration session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub project_path: String,
    pub status: SessionStatus,
    pub config_snapshot: Option<String>,
    pub coordinator: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Partial update for a session; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub config_snapshot: Option<String>,
    pub coordinator: Option<String>,
}

fn parse_session_row(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    let status_str: String = row
        .try_get("status")
        .map_err(|e| Error::DatabaseError(format!("field 'status': {e}")))?;
    let status = status_str
        .parse()
        .map_err(|_| Error::ParseError(format!("invalid session status '{status_str}'")))?;

    let created_at_str: String = row
        .try_get("created_at")
        .map_err(|e| Error::DatabaseError(format!("field 'created_at': {e}")))?;

    Ok(Session {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        name: row
            .try_get("name")
            .map_err(|e| Error::DatabaseError(format!("field 'name': {e}")))?,
        project_path: row
            .try_get("project_path")
            .map_err(|e| Error::DatabaseError(format!("field 'project_path': {e}")))?,
        status,
        config_snapshot: row
            .try_get("config_snapshot")
            .map_err(|e| Error::DatabaseError(format!("field 'config_snapshot': {e}")))?,
        coordinator: row
            .try_get("coordinator")
            .map_err(|e| Error::DatabaseError(format!("field 'coordinator': {e}")))?,
        created_at: parse_rfc3339(&created_at_str)?,
    })
}

impl StateDb {
    /// Create a session in `active` status.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConstraintViolation` when the id already exists.
    pub async fn create_session(
        &self,
        id: &str,
        name: &str,
        project_path: &str,
    ) -> Result<Session> {
        let created_at = now_rfc3339();
        sqlx::query(
            "INSERT INTO sessions (id, name, project_path, status, created_at)
             VALUES (?, ?, ?, 'active', ?)",
        )
        .bind(id)
        .bind(name)
        .bind(project_path)
        .bind(&created_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if e.to_string().to_lowercase().contains("unique") {
                Error::ConstraintViolation(format!("session '{id}' already exists"))
            } else {
                Error::DatabaseError(format!("failed to create session: {e}"))
            }
        })?;

        Ok(Session {
            id: id.to_string(),
            name: name.to_string(),
            project_path: project_path.to_string(),
            status: SessionStatus::Active,
            config_snapshot: None,
            coordinator: None,
            created_at: parse_rfc3339(&created_at)?,
        })
    }

    /// Fetch a session by id; `None` when absent.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get session: {e}")))?
            .as_ref()
            .map(parse_session_row)
            .transpose()
    }

    /// List sessions, optionally filtered by status, newest first.
    pub async fn list_sessions(&self, status: Option<SessionStatus>) -> Result<Vec<Session>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM sessions WHERE status = ? ORDER BY created_at DESC")
                    .bind(status.to_string())
                    .fetch_all(self.pool())
                    .await
            }
            None => {
                sqlx::query("SELECT * FROM sessions ORDER BY created_at DESC")
                    .fetch_all(self.pool())
                    .await
            }
        }
        .map_err(|e| Error::DatabaseError(format!("failed to list sessions: {e}")))?;

        rows.iter().map(parse_session_row).collect()
    }

    /// Apply a partial update.
    ///
    /// Terminating a session is refused while it still owns active
    /// reservations.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown id and
    /// `Error::ValidationError` for a refused termination.
    pub async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<()> {
        if update.status == Some(SessionStatus::Terminated) {
            let active = self.list_reservations(id, true).await?;
            if !active.is_empty() {
                return Err(Error::ValidationError(format!(
                    "session '{id}' still owns {} active reservations",
                    active.len()
                )));
            }
        }

        let mut clauses: Vec<(&str, String)> = Vec::new();
        if let Some(status) = update.status {
            clauses.push(("status", status.to_string()));
        }
        if let Some(snapshot) = update.config_snapshot {
            clauses.push(("config_snapshot", snapshot));
        }
        if let Some(coordinator) = update.coordinator {
            clauses.push(("coordinator", coordinator));
        }
        if clauses.is_empty() {
            return Ok(());
        }

        let set_sql: Vec<String> = clauses.iter().map(|(f, _)| format!("{f} = ?")).collect();
        let sql = format!("UPDATE sessions SET {} WHERE id = ?", set_sql.join(", "));

        let mut query = sqlx::query(&sql);
        for (_, value) in clauses {
            query = query.bind(value);
        }
        let result = query
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to update session: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session '{id}'")));
        }
        Ok(())
    }

    /// Delete a session; agents, tasks and reservations cascade.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown id.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to delete session: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("session '{id}'")));
        }
        Ok(())
    }
}
