//! Task (assignment) persistence.
//!
//! A task is one bead assigned to one agent. At most one active task per
//! agent and one per bead across a session; the create path enforces both.

use sqlx::{Row, SqliteConnection};

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{types::AssignmentStatus, Error, Result};

/// A stored assignment.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TaskRecord {
    pub id: i64,
    pub session_id: String,
    pub agent_id: String,
    pub bead_id: String,
    pub correlation_id: Option<String>,
    pub status: AssignmentStatus,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
    /// Prompt text injected into the pane at assignment time.
    pub prompt: String,
    pub retry_count: i64,
    pub result: Option<String>,
    pub assigned_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Input for creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub session_id: String,
    pub agent_id: String,
    pub bead_id: String,
    pub correlation_id: Option<String>,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
    pub prompt: String,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<AssignmentStatus>,
    pub result: Option<String>,
    pub retry_count: Option<i64>,
    /// Stamp `started_at` with now.
    pub mark_started: bool,
}

fn parse_task_row(row: &sqlx::sqlite::SqliteRow) -> Result<TaskRecord> {
    let status_str: String = row
        .try_get("status")
        .map_err(|e| Error::DatabaseError(format!("field 'status': {e}")))?;
    let assigned_at_str: String = row
        .try_get("assigned_at")
        .map_err(|e| Error::DatabaseError(format!("field 'assigned_at': {e}")))?;
    let started_at_str: Option<String> = row
        .try_get("started_at")
        .map_err(|e| Error::DatabaseError(format!("field 'started_at': {e}")))?;
    let completed_at_str: Option<String> = row
        .try_get("completed_at")
        .map_err(|e| Error::DatabaseError(format!("field 'completed_at': {e}")))?;

    Ok(TaskRecord {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| Error::DatabaseError(format!("field 'session_id': {e}")))?,
        agent_id: row
            .try_get("agent_id")
            .map_err(|e| Error::DatabaseError(format!("field 'agent_id': {e}")))?,
        bead_id: row
            .try_get("bead_id")
            .map_err(|e| Error::DatabaseError(format!("field 'bead_id': {e}")))?,
        correlation_id: row
            .try_get("correlation_id")
            .map_err(|e| Error::DatabaseError(format!("field 'correlation_id': {e}")))?,
        status: status_str
            .parse()
            .map_err(|_| Error::ParseError(format!("invalid task status '{status_str}'")))?,
        score: row
            .try_get("score")
            .map_err(|e| Error::DatabaseError(format!("field 'score': {e}")))?,
        confidence: row
            .try_get("confidence")
            .map_err(|e| Error::DatabaseError(format!("field 'confidence': {e}")))?,
        reason: row
            .try_get("reason")
            .map_err(|e| Error::DatabaseError(format!("field 'reason': {e}")))?,
        prompt: row
            .try_get("prompt")
            .map_err(|e| Error::DatabaseError(format!("field 'prompt': {e}")))?,
        retry_count: row
            .try_get("retry_count")
            .map_err(|e| Error::DatabaseError(format!("field 'retry_count': {e}")))?,
        result: row
            .try_get("result")
            .map_err(|e| Error::DatabaseError(format!("field 'result': {e}")))?,
        assigned_at: parse_rfc3339(&assigned_at_str)?,
        started_at: started_at_str.as_deref().map(parse_rfc3339).transpose()?,
        completed_at: completed_at_str
            .as_deref()
            .map(parse_rfc3339)
            .transpose()?,
    })
}

impl StateDb {
    /// Create a task in `assigned` status.
    ///
    /// # Errors
    ///
    /// Returns `Error::ConstraintViolation` when the agent or the bead
    /// already has an active task in the session.
    pub async fn create_task(&self, new: NewTask) -> Result<TaskRecord> {
        let active_for_agent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks
             WHERE agent_id = ? AND status IN ('assigned', 'working')",
        )
        .bind(&new.agent_id)
        .fetch_one(self.pool())
        .await
        .map_err(Error::from)?;
        if active_for_agent > 0 {
            return Err(Error::ConstraintViolation(format!(
                "agent '{}' already has an active task",
                new.agent_id
            )));
        }

        let active_for_bead: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks
             WHERE session_id = ? AND bead_id = ? AND status IN ('assigned', 'working')",
        )
        .bind(&new.session_id)
        .bind(&new.bead_id)
        .fetch_one(self.pool())
        .await
        .map_err(Error::from)?;
        if active_for_bead > 0 {
            return Err(Error::ConstraintViolation(format!(
                "bead '{}' already has an active task in session '{}'",
                new.bead_id, new.session_id
            )));
        }

        let assigned_at = now_rfc3339();
        let result = sqlx::query(
            "INSERT INTO tasks (session_id, agent_id, bead_id, correlation_id, status,
                                score, confidence, reason, prompt, assigned_at)
             VALUES (?, ?, ?, ?, 'assigned', ?, ?, ?, ?, ?)",
        )
        .bind(&new.session_id)
        .bind(&new.agent_id)
        .bind(&new.bead_id)
        .bind(&new.correlation_id)
        .bind(new.score)
        .bind(new.confidence)
        .bind(&new.reason)
        .bind(&new.prompt)
        .bind(&assigned_at)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(TaskRecord {
            id: result.last_insert_rowid(),
            session_id: new.session_id,
            agent_id: new.agent_id,
            bead_id: new.bead_id,
            correlation_id: new.correlation_id,
            status: AssignmentStatus::Assigned,
            score: new.score,
            confidence: new.confidence,
            reason: new.reason,
            prompt: new.prompt,
            retry_count: 0,
            result: None,
            assigned_at: parse_rfc3339(&assigned_at)?,
            started_at: None,
            completed_at: None,
        })
    }

    /// Fetch a task by id; `None` when absent.
    pub async fn get_task(&self, id: i64) -> Result<Option<TaskRecord>> {
        sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get task: {e}")))?
            .as_ref()
            .map(parse_task_row)
            .transpose()
    }

    /// Fetch a task by correlation id; `None` when absent.
    pub async fn get_task_by_correlation(&self, correlation_id: &str) -> Result<Option<TaskRecord>> {
        sqlx::query("SELECT * FROM tasks WHERE correlation_id = ?")
            .bind(correlation_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get task by correlation: {e}")))?
            .as_ref()
            .map(parse_task_row)
            .transpose()
    }

    /// Tasks of a session, optionally filtered by status, oldest first.
    pub async fn list_tasks(
        &self,
        session_id: &str,
        status: Option<AssignmentStatus>,
    ) -> Result<Vec<TaskRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM tasks WHERE session_id = ? AND status = ? ORDER BY id",
                )
                .bind(session_id)
                .bind(status.to_string())
                .fetch_all(self.pool())
                .await
            }
            None => {
                sqlx::query("SELECT * FROM tasks WHERE session_id = ? ORDER BY id")
                    .bind(session_id)
                    .fetch_all(self.pool())
                    .await
            }
        }
        .map_err(|e| Error::DatabaseError(format!("failed to list tasks: {e}")))?;

        rows.iter().map(parse_task_row).collect()
    }

    /// Tasks still in flight (`assigned` or `working`) for a session.
    pub async fn list_active_tasks(&self, session_id: &str) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks
             WHERE session_id = ? AND status IN ('assigned', 'working') ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to list active tasks: {e}")))?;

        rows.iter().map(parse_task_row).collect()
    }

    /// Apply a partial update to a task.
    ///
    /// Setting a terminal status stamps `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown id.
    pub async fn update_task(&self, id: i64, update: TaskUpdate) -> Result<()> {
        let mut tx = self.pool().begin().await.map_err(Error::from)?;
        update_task_tx(&mut tx, id, update).await?;
        tx.commit().await.map_err(Error::from)?;
        Ok(())
    }
}

/// Transaction-scoped task update; the detector uses this to commit an
/// assignment status change together with its history entry and event.
pub async fn update_task_tx(
    conn: &mut SqliteConnection,
    id: i64,
    update: TaskUpdate,
) -> Result<()> {
    let mut clauses: Vec<(&str, String)> = Vec::new();
    if let Some(status) = update.status {
        clauses.push(("status", status.to_string()));
        if status.is_terminal() {
            clauses.push(("completed_at", now_rfc3339()));
        }
    }
    if let Some(result) = update.result {
        clauses.push(("result", result));
    }
    if let Some(retry_count) = update.retry_count {
        clauses.push(("retry_count", retry_count.to_string()));
    }
    if update.mark_started {
        clauses.push(("started_at", now_rfc3339()));
    }
    if clauses.is_empty() {
        return Ok(());
    }

    let set_sql: Vec<String> = clauses.iter().map(|(f, _)| format!("{f} = ?")).collect();
    let sql = format!("UPDATE tasks SET {} WHERE id = ?", set_sql.join(", "));

    let mut query = sqlx::query(&sql);
    for (_, value) in clauses {
        query = query.bind(value);
    }
    let result = query
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to update task: {e}")))?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("task {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn db_with_agent() -> Result<StateDb> {
        let db = StateDb::open_in_memory().await?;
        db.create_session("s1", "alpha", "/a").await?;
        db.create_agent(
            "ag-1",
            "s1",
            "worker-1",
            crate::types::AgentKind::Claude,
            None,
            "%1",
        )
        .await?;
        Ok(db)
    }

    fn new_task(bead: &str) -> NewTask {
        NewTask {
            session_id: "s1".to_string(),
            agent_id: "ag-1".to_string(),
            bead_id: bead.to_string(),
            correlation_id: Some(format!("corr-{bead}")),
            score: 0.8,
            confidence: 0.8,
            reason: "claude excels at feature".to_string(),
            prompt: format!("work on {bead}"),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_round_trip() -> Result<()> {
        let db = db_with_agent().await?;
        let task = db.create_task(new_task("bd-1")).await?;

        assert_eq!(db.get_task(task.id).await?, Some(task.clone()));
        assert_eq!(
            db.get_task_by_correlation("corr-bd-1").await?,
            Some(task)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_one_active_task_per_agent() -> Result<()> {
        let db = db_with_agent().await?;
        db.create_task(new_task("bd-1")).await?;

        let result = db.create_task(new_task("bd-2")).await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_one_active_task_per_bead() -> Result<()> {
        let db = db_with_agent().await?;
        db.create_agent(
            "ag-2",
            "s1",
            "worker-2",
            crate::types::AgentKind::Codex,
            None,
            "%2",
        )
        .await?;
        db.create_task(new_task("bd-1")).await?;

        let second = NewTask {
            agent_id: "ag-2".to_string(),
            correlation_id: None,
            ..new_task("bd-1")
        };
        let result = db.create_task(second).await;
        assert!(matches!(result, Err(Error::ConstraintViolation(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_completing_frees_agent_and_bead() -> Result<()> {
        let db = db_with_agent().await?;
        let task = db.create_task(new_task("bd-1")).await?;
        db.update_task(
            task.id,
            TaskUpdate {
                status: Some(AssignmentStatus::Completed),
                result: Some("done".to_string()),
                ..TaskUpdate::default()
            },
        )
        .await?;

        // Same agent and bead can be assigned again.
        let again = db.create_task(new_task("bd-1")).await;
        assert!(again.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_terminal_status_stamps_completed_at() -> Result<()> {
        let db = db_with_agent().await?;
        let task = db.create_task(new_task("bd-1")).await?;
        assert_eq!(task.completed_at, None);

        db.update_task(
            task.id,
            TaskUpdate {
                status: Some(AssignmentStatus::Failed),
                ..TaskUpdate::default()
            },
        )
        .await?;

        let task = db
            .get_task(task.id)
            .await?
            .ok_or_else(|| Error::NotFound("task".into()))?;
        assert_eq!(task.status, AssignmentStatus::Failed);
        assert!(task.completed_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_by_status() -> Result<()> {
        let db = db_with_agent().await?;
        let task = db.create_task(new_task("bd-1")).await?;
        db.update_task(
            task.id,
            TaskUpdate {
                status: Some(AssignmentStatus::Working),
                mark_started: true,
                ..TaskUpdate::default()
            },
        )
        .await?;

        let working = db
            .list_tasks("s1", Some(AssignmentStatus::Working))
            .await?;
        assert_eq!(working.len(), 1);
        assert!(working[0].started_at.is_some());

        let active = db.list_active_tasks("s1").await?;
        assert_eq!(active.len(), 1);

        let completed = db
            .list_tasks("s1", Some(AssignmentStatus::Completed))
            .await?;
        assert!(completed.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_missing_task_not_found() -> Result<()> {
        let db = db_with_agent().await?;
        let result = db
            .update_task(
                999,
                TaskUpdate {
                    status: Some(AssignmentStatus::Completed),
                    ..TaskUpdate::default()
                },
            )
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        Ok(())
    }
}
