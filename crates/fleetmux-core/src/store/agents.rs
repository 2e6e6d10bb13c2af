//! Agent persistence.
//!
//! An agent row is created when a pane is bound to an agent kind and updated
//! on every observation tick; it is destroyed with its session.

use sqlx::Row;

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{
    types::{AgentKind, AgentStatus},
    Error, Result,
};

/// A stored agent bound to a pane.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AgentRecord {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub kind: AgentKind,
    pub model: Option<String>,
    /// Pane address, e.g. `%3` or `session:0.2`.
    pub pane: String,
    pub status: AgentStatus,
    pub current_task: Option<String>,
    /// Free-form performance blob (JSON).
    pub performance: Option<String>,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

/// Partial update applied on an observation tick.
#[derive(Debug, Clone, Default)]
pub struct AgentUpdate {
    pub status: Option<AgentStatus>,
    pub current_task: Option<Option<String>>,
    pub performance: Option<String>,
    pub pane: Option<String>,
    /// Refresh `last_seen` to now.
    pub touch: bool,
}

fn parse_agent_row(row: &sqlx::sqlite::SqliteRow) -> Result<AgentRecord> {
    let kind_str: String = row
        .try_get("kind")
        .map_err(|e| Error::DatabaseError(format!("field 'kind': {e}")))?;
    let status_str: String = row
        .try_get("status")
        .map_err(|e| Error::DatabaseError(format!("field 'status': {e}")))?;
    let last_seen_str: String = row
        .try_get("last_seen")
        .map_err(|e| Error::DatabaseError(format!("field 'last_seen': {e}")))?;

    Ok(AgentRecord {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| Error::DatabaseError(format!("field 'session_id': {e}")))?,
        name: row
            .try_get("name")
            .map_err(|e| Error::DatabaseError(format!("field 'name': {e}")))?,
        kind: kind_str
            .parse()
            .map_err(|_| Error::ParseError(format!("invalid agent kind '{kind_str}'")))?,
        model: row
            .try_get("model")
            .map_err(|e| Error::DatabaseError(format!("field 'model': {e}")))?,
        pane: row
            .try_get("pane")
            .map_err(|e| Error::DatabaseError(format!("field 'pane': {e}")))?,
        status: status_str
            .parse()
            .map_err(|_| Error::ParseError(format!("invalid agent status '{status_str}'")))?,
        current_task: row
            .try_get("current_task")
            .map_err(|e| Error::DatabaseError(format!("field 'current_task': {e}")))?,
        performance: row
            .try_get("performance")
            .map_err(|e| Error::DatabaseError(format!("field 'performance': {e}")))?,
        last_seen: parse_rfc3339(&last_seen_str)?,
    })
}

impl StateDb {
    /// Register an agent for a pane.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConstraintViolation` on a duplicate id or a duplicate
    /// (session, name) pair, or when the session does not exist.
    pub async fn create_agent(
        &self,
        id: &str,
        session_id: &str,
        name: &str,
        kind: AgentKind,
        model: Option<&str>,
        pane: &str,
    ) -> Result<AgentRecord> {
        let last_seen = now_rfc3339();
        sqlx::query(
            "INSERT INTO agents (id, session_id, name, kind, model, pane, status, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, 'idle', ?)",
        )
        .bind(id)
        .bind(session_id)
        .bind(name)
        .bind(kind.to_string())
        .bind(model)
        .bind(pane)
        .bind(&last_seen)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(AgentRecord {
            id: id.to_string(),
            session_id: session_id.to_string(),
            name: name.to_string(),
            kind,
            model: model.map(str::to_string),
            pane: pane.to_string(),
            status: AgentStatus::Idle,
            current_task: None,
            performance: None,
            last_seen: parse_rfc3339(&last_seen)?,
        })
    }

    /// Fetch an agent by id; `None` when absent.
    pub async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>> {
        sqlx::query("SELECT * FROM agents WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get agent: {e}")))?
            .as_ref()
            .map(parse_agent_row)
            .transpose()
    }

    /// Fetch an agent by (session, name); `None` when absent.
    pub async fn get_agent_by_name(
        &self,
        session_id: &str,
        name: &str,
    ) -> Result<Option<AgentRecord>> {
        sqlx::query("SELECT * FROM agents WHERE session_id = ? AND name = ?")
            .bind(session_id)
            .bind(name)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get agent by name: {e}")))?
            .as_ref()
            .map(parse_agent_row)
            .transpose()
    }

    /// All agents of a session, in pane order.
    pub async fn list_agents(&self, session_id: &str) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query("SELECT * FROM agents WHERE session_id = ? ORDER BY pane")
            .bind(session_id)
            .fetch_all(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to list agents: {e}")))?;

        rows.iter().map(parse_agent_row).collect()
    }

    /// Apply a partial update to an agent.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown id.
    pub async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<()> {
        let mut clauses: Vec<(&str, Option<String>)> = Vec::new();
        if let Some(status) = update.status {
            clauses.push(("status", Some(status.to_string())));
        }
        if let Some(task) = update.current_task {
            clauses.push(("current_task", task));
        }
        if let Some(performance) = update.performance {
            clauses.push(("performance", Some(performance)));
        }
        if let Some(pane) = update.pane {
            clauses.push(("pane", Some(pane)));
        }
        if update.touch {
            clauses.push(("last_seen", Some(now_rfc3339())));
        }
        if clauses.is_empty() {
            return Ok(());
        }

        let set_sql: Vec<String> = clauses.iter().map(|(f, _)| format!("{f} = ?")).collect();
        let sql = format!("UPDATE agents SET {} WHERE id = ?", set_sql.join(", "));

        let mut query = sqlx::query(&sql);
        for (_, value) in clauses {
            query = query.bind(value);
        }
        let result = query
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to update agent: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("agent '{id}'")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db_with_session() -> Result<StateDb> {
        let db = StateDb::open_in_memory().await?;
        db.create_session("s1", "alpha", "/a").await?;
        Ok(db)
    }

    #[tokio::test]
    async fn test_create_and_get_agent() -> Result<()> {
        let db = db_with_session().await?;
        let created = db
            .create_agent("ag-1", "s1", "worker-1", AgentKind::Claude, Some("opus"), "%1")
            .await?;

        assert_eq!(db.get_agent("ag-1").await?, Some(created.clone()));
        assert_eq!(
            db.get_agent_by_name("s1", "worker-1").await?,
            Some(created)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_agent_requires_session() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let result = db
            .create_agent("ag-1", "missing", "worker-1", AgentKind::Claude, None, "%1")
            .await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicate_name_in_session_rejected() -> Result<()> {
        let db = db_with_session().await?;
        db.create_agent("ag-1", "s1", "worker-1", AgentKind::Claude, None, "%1")
            .await?;
        let result = db
            .create_agent("ag-2", "s1", "worker-1", AgentKind::Codex, None, "%2")
            .await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_update_status_and_task() -> Result<()> {
        let db = db_with_session().await?;
        db.create_agent("ag-1", "s1", "worker-1", AgentKind::Gemini, None, "%1")
            .await?;

        db.update_agent(
            "ag-1",
            AgentUpdate {
                status: Some(AgentStatus::Working),
                current_task: Some(Some("42".to_string())),
                touch: true,
                ..AgentUpdate::default()
            },
        )
        .await?;

        let agent = db
            .get_agent("ag-1")
            .await?
            .ok_or_else(|| Error::NotFound("agent".into()))?;
        assert_eq!(agent.status, AgentStatus::Working);
        assert_eq!(agent.current_task, Some("42".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_clearing_current_task() -> Result<()> {
        let db = db_with_session().await?;
        db.create_agent("ag-1", "s1", "worker-1", AgentKind::Claude, None, "%1")
            .await?;
        db.update_agent(
            "ag-1",
            AgentUpdate {
                current_task: Some(Some("42".to_string())),
                ..AgentUpdate::default()
            },
        )
        .await?;
        db.update_agent(
            "ag-1",
            AgentUpdate {
                current_task: Some(None),
                ..AgentUpdate::default()
            },
        )
        .await?;

        let agent = db
            .get_agent("ag-1")
            .await?
            .ok_or_else(|| Error::NotFound("agent".into()))?;
        assert_eq!(agent.current_task, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_delete_cascades_to_agents() -> Result<()> {
        let db = db_with_session().await?;
        db.create_agent("ag-1", "s1", "worker-1", AgentKind::Claude, None, "%1")
            .await?;
        db.delete_session("s1").await?;

        assert_eq!(db.get_agent("ag-1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_agents_ordered_by_pane() -> Result<()> {
        let db = db_with_session().await?;
        db.create_agent("ag-2", "s1", "worker-2", AgentKind::Codex, None, "%2")
            .await?;
        db.create_agent("ag-1", "s1", "worker-1", AgentKind::Claude, None, "%1")
            .await?;

        let agents = db.list_agents("s1").await?;
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0].pane, "%1");
        assert_eq!(agents[1].pane, "%2");
        Ok(())
    }
}
