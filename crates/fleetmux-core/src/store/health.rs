//! Tool health and context packs.

use sqlx::Row;

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{Error, Result};

/// Last observed health of an external tool (bead CLI, mail CLI, tmux).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ToolHealth {
    pub tool: String,
    pub status: String,
    pub details: Option<String>,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

/// A named blob of context shared with agents at assignment time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ContextPack {
    pub id: String,
    pub session_id: Option<String>,
    pub name: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl StateDb {
    /// Insert or refresh a tool's health row.
    pub async fn upsert_tool_health(
        &self,
        tool: &str,
        status: &str,
        details: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO tool_health (tool, status, details, checked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tool) DO UPDATE SET status = ?2, details = ?3, checked_at = ?4",
        )
        .bind(tool)
        .bind(status)
        .bind(details)
        .bind(now_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to upsert tool health: {e}")))?;
        Ok(())
    }

    /// Fetch one tool's health; `None` when never recorded.
    pub async fn get_tool_health(&self, tool: &str) -> Result<Option<ToolHealth>> {
        let row = sqlx::query("SELECT * FROM tool_health WHERE tool = ?")
            .bind(tool)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get tool health: {e}")))?;

        row.as_ref().map(parse_tool_health_row).transpose()
    }

    /// All recorded tool health rows.
    pub async fn list_tool_health(&self) -> Result<Vec<ToolHealth>> {
        let rows = sqlx::query("SELECT * FROM tool_health ORDER BY tool")
            .fetch_all(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to list tool health: {e}")))?;

        rows.iter().map(parse_tool_health_row).collect()
    }

    /// Store a context pack.
    pub async fn create_context_pack(
        &self,
        id: &str,
        session_id: Option<&str>,
        name: &str,
        content: &str,
    ) -> Result<ContextPack> {
        let created_at = now_rfc3339();
        sqlx::query(
            "INSERT INTO context_packs (id, session_id, name, content, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(session_id)
        .bind(name)
        .bind(content)
        .bind(&created_at)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(ContextPack {
            id: id.to_string(),
            session_id: session_id.map(str::to_string),
            name: name.to_string(),
            content: content.to_string(),
            created_at: parse_rfc3339(&created_at)?,
        })
    }

    /// Fetch a context pack by id; `None` when absent.
    pub async fn get_context_pack(&self, id: &str) -> Result<Option<ContextPack>> {
        let row = sqlx::query("SELECT * FROM context_packs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get context pack: {e}")))?;

        row.as_ref().map(parse_context_pack_row).transpose()
    }
}

fn parse_tool_health_row(row: &sqlx::sqlite::SqliteRow) -> Result<ToolHealth> {
    let checked_at_str: String = row
        .try_get("checked_at")
        .map_err(|e| Error::DatabaseError(format!("field 'checked_at': {e}")))?;
    Ok(ToolHealth {
        tool: row
            .try_get("tool")
            .map_err(|e| Error::DatabaseError(format!("field 'tool': {e}")))?,
        status: row
            .try_get("status")
            .map_err(|e| Error::DatabaseError(format!("field 'status': {e}")))?,
        details: row
            .try_get("details")
            .map_err(|e| Error::DatabaseError(format!("field 'details': {e}")))?,
        checked_at: parse_rfc3339(&checked_at_str)?,
    })
}

fn parse_context_pack_row(row: &sqlx::sqlite::SqliteRow) -> Result<ContextPack> {
    let created_at_str: String = row
        .try_get("created_at")
        .map_err(|e| Error::DatabaseError(format!("field 'created_at': {e}")))?;
    Ok(ContextPack {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| Error::DatabaseError(format!("field 'session_id': {e}")))?,
        name: row
            .try_get("name")
            .map_err(|e| Error::DatabaseError(format!("field 'name': {e}")))?,
        content: row
            .try_get("content")
            .map_err(|e| Error::DatabaseError(format!("field 'content': {e}")))?,
        created_at: parse_rfc3339(&created_at_str)?,
    })
}
