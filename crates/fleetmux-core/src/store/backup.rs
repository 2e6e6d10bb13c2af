//! Backup and restore of the durable state to a JSON file.
//!
//! The backup captures sessions, agents and tasks; the append-only event
//! log and history stay in the live database file. Restore is atomic: the
//! affected tables are cleared and repopulated inside one transaction.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AgentRecord, Session, StateDb, TaskRecord};
use crate::{Error, Result};

/// Serialized backup document.
#[derive(Debug, Serialize, Deserialize)]
struct BackupDoc {
    sessions: Vec<SessionRow>,
    agents: Vec<AgentRow>,
    tasks: Vec<TaskRow>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRow {
    id: String,
    name: String,
    project_path: String,
    status: String,
    config_snapshot: Option<String>,
    coordinator: Option<String>,
    created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AgentRow {
    id: String,
    session_id: String,
    name: String,
    kind: String,
    model: Option<String>,
    pane: String,
    status: String,
    current_task: Option<String>,
    performance: Option<String>,
    last_seen: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct TaskRow {
    session_id: String,
    agent_id: String,
    bead_id: String,
    correlation_id: Option<String>,
    status: String,
    score: f64,
    confidence: f64,
    reason: String,
    prompt: String,
    retry_count: i64,
    result: Option<String>,
    assigned_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

fn session_to_row(s: &Session) -> SessionRow {
    SessionRow {
        id: s.id.clone(),
        name: s.name.clone(),
        project_path: s.project_path.clone(),
        status: s.status.to_string(),
        config_snapshot: s.config_snapshot.clone(),
        coordinator: s.coordinator.clone(),
        created_at: s.created_at.to_rfc3339(),
    }
}

fn agent_to_row(a: &AgentRecord) -> AgentRow {
    AgentRow {
        id: a.id.clone(),
        session_id: a.session_id.clone(),
        name: a.name.clone(),
        kind: a.kind.to_string(),
        model: a.model.clone(),
        pane: a.pane.clone(),
        status: a.status.to_string(),
        current_task: a.current_task.clone(),
        performance: a.performance.clone(),
        last_seen: a.last_seen.to_rfc3339(),
    }
}

fn task_to_row(t: &TaskRecord) -> TaskRow {
    TaskRow {
        session_id: t.session_id.clone(),
        agent_id: t.agent_id.clone(),
        bead_id: t.bead_id.clone(),
        correlation_id: t.correlation_id.clone(),
        status: t.status.to_string(),
        score: t.score,
        confidence: t.confidence,
        reason: t.reason.clone(),
        prompt: t.prompt.clone(),
        retry_count: t.retry_count,
        result: t.result.clone(),
        assigned_at: t.assigned_at.to_rfc3339(),
        started_at: t.started_at.map(|dt| dt.to_rfc3339()),
        completed_at: t.completed_at.map(|dt| dt.to_rfc3339()),
    }
}

/// Verify a backup file without touching the database.
///
/// Returns the number of sessions it contains.
///
/// # Errors
///
/// Returns `Error::IoError` on read failure, `Error::ParseError` on a
/// malformed document.
pub fn verify_backup(path: &Path) -> Result<usize> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("failed to read backup file: {e}")))?;
    let doc: BackupDoc = serde_json::from_str(&json)
        .map_err(|e| Error::ParseError(format!("failed to parse backup file: {e}")))?;
    Ok(doc.sessions.len())
}

impl StateDb {
    /// Write sessions, agents and tasks to a pretty-printed JSON file.
    pub async fn backup(&self, path: &Path) -> Result<()> {
        let mut doc = BackupDoc {
            sessions: Vec::new(),
            agents: Vec::new(),
            tasks: Vec::new(),
        };

        for session in self.list_sessions(None).await? {
            for agent in self.list_agents(&session.id).await? {
                doc.agents.push(agent_to_row(&agent));
            }
            for task in self.list_tasks(&session.id, None).await? {
                doc.tasks.push(task_to_row(&task));
            }
            doc.sessions.push(session_to_row(&session));
        }

        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::ParseError(format!("failed to serialize backup: {e}")))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| Error::IoError(format!("failed to write backup file: {e}")))
    }

    /// Atomically replace sessions, agents and tasks with a backup's
    /// content.
    pub async fn restore(&self, path: &Path) -> Result<()> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::IoError(format!("failed to read backup file: {e}")))?;
        let doc: BackupDoc = serde_json::from_str(&json)
            .map_err(|e| Error::ParseError(format!("failed to parse backup file: {e}")))?;

        self.transaction(move |conn: &mut sqlx::SqliteConnection| {
            Box::pin(async move {
                for table in ["tasks", "agents", "sessions"] {
                    sqlx::query(&format!("DELETE FROM {table}"))
                        .execute(&mut *conn)
                        .await
                        .map_err(Error::from)?;
                }

                for s in &doc.sessions {
                    sqlx::query(
                        "INSERT INTO sessions (id, name, project_path, status, config_snapshot,
                                               coordinator, created_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&s.id)
                    .bind(&s.name)
                    .bind(&s.project_path)
                    .bind(&s.status)
                    .bind(&s.config_snapshot)
                    .bind(&s.coordinator)
                    .bind(&s.created_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(Error::from)?;
                }

                for a in &doc.agents {
                    sqlx::query(
                        "INSERT INTO agents (id, session_id, name, kind, model, pane, status,
                                             current_task, performance, last_seen)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&a.id)
                    .bind(&a.session_id)
                    .bind(&a.name)
                    .bind(&a.kind)
                    .bind(&a.model)
                    .bind(&a.pane)
                    .bind(&a.status)
                    .bind(&a.current_task)
                    .bind(&a.performance)
                    .bind(&a.last_seen)
                    .execute(&mut *conn)
                    .await
                    .map_err(Error::from)?;
                }

                for t in &doc.tasks {
                    sqlx::query(
                        "INSERT INTO tasks (session_id, agent_id, bead_id, correlation_id, status,
                                            score, confidence, reason, prompt, retry_count, result,
                                            assigned_at, started_at, completed_at)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&t.session_id)
                    .bind(&t.agent_id)
                    .bind(&t.bead_id)
                    .bind(&t.correlation_id)
                    .bind(&t.status)
                    .bind(t.score)
                    .bind(t.confidence)
                    .bind(&t.reason)
                    .bind(&t.prompt)
                    .bind(t.retry_count)
                    .bind(&t.result)
                    .bind(&t.assigned_at)
                    .bind(&t.started_at)
                    .bind(&t.completed_at)
                    .execute(&mut *conn)
                    .await
                    .map_err(Error::from)?;
                }

                Ok(())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::types::AgentKind;

    #[tokio::test]
    async fn test_backup_restore_round_trip() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::IoError(e.to_string()))?;
        let backup_path = dir.path().join("backup.json");

        let source = StateDb::open_in_memory().await?;
        source.create_session("s1", "alpha", "/a").await?;
        source
            .create_agent("ag-1", "s1", "worker-1", AgentKind::Claude, None, "%1")
            .await?;
        source
            .create_task(super::super::NewTask {
                session_id: "s1".to_string(),
                agent_id: "ag-1".to_string(),
                bead_id: "bd-1".to_string(),
                correlation_id: None,
                score: 0.8,
                confidence: 0.8,
                reason: "test".to_string(),
                prompt: "go".to_string(),
            })
            .await?;

        source.backup(&backup_path).await?;
        assert_eq!(verify_backup(&backup_path)?, 1);

        let target = StateDb::open_in_memory().await?;
        target.restore(&backup_path).await?;

        let sessions = target.list_sessions(None).await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
        assert_eq!(target.list_agents("s1").await?.len(), 1);
        assert_eq!(target.list_tasks("s1", None).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_replaces_existing_rows() -> Result<()> {
        let dir = TempDir::new().map_err(|e| Error::IoError(e.to_string()))?;
        let backup_path = dir.path().join("backup.json");

        let source = StateDb::open_in_memory().await?;
        source.create_session("s1", "alpha", "/a").await?;
        source.backup(&backup_path).await?;

        let target = StateDb::open_in_memory().await?;
        target.create_session("old", "stale", "/old").await?;
        target.restore(&backup_path).await?;

        let sessions = target.list_sessions(None).await?;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, "s1");
        Ok(())
    }

    #[test]
    fn test_verify_rejects_garbage() {
        let dir = TempDir::new().ok();
        let Some(dir) = dir else { return };
        let path = dir.path().join("garbage.json");
        if std::fs::write(&path, "not json").is_err() {
            return;
        }
        assert!(verify_backup(&path).is_err());
    }
}
