//! Bead status history: append-only, used for forensic replay and stats.
//!
//! The most recent entry for a bead is its current status; ties on the
//! transition instant break by row id.

use std::collections::HashMap;

use sqlx::{Row, SqliteConnection};

use super::{parse_rfc3339, StateDb};
use crate::{Error, Result};

/// One recorded status transition.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BeadHistoryEntry {
    pub id: i64,
    pub session_id: Option<String>,
    pub bead_id: String,
    pub bead_title: Option<String>,
    /// Empty for the initial transition.
    pub from_status: Option<String>,
    pub to_status: String,
    pub agent_id: Option<String>,
    pub agent_kind: Option<String>,
    pub agent_name: Option<String>,
    pub pane: Option<String>,
    /// What caused the transition, e.g. `detector:idle` or `matcher`.
    pub trigger: String,
    pub reason: Option<String>,
    /// Prompt text at the time of assignment.
    pub prompt: Option<String>,
    pub retry_count: i64,
    pub transitioned_at: chrono::DateTime<chrono::Utc>,
}

/// Input for recording a transition; the store assigns id and instant.
#[derive(Debug, Clone, Default)]
pub struct NewHistoryEntry {
    pub session_id: Option<String>,
    pub bead_id: String,
    pub bead_title: Option<String>,
    pub from_status: Option<String>,
    pub to_status: String,
    pub agent_id: Option<String>,
    pub agent_kind: Option<String>,
    pub agent_name: Option<String>,
    pub pane: Option<String>,
    pub trigger: String,
    pub reason: Option<String>,
    pub prompt: Option<String>,
    pub retry_count: i64,
}

/// Aggregate statistics over a session's history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BeadStats {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_agent: HashMap<String, i64>,
    pub failure_reasons: HashMap<String, i64>,
}

fn parse_history_row(row: &sqlx::sqlite::SqliteRow) -> Result<BeadHistoryEntry> {
    let transitioned_at_str: String = row
        .try_get("transitioned_at")
        .map_err(|e| Error::DatabaseError(format!("field 'transitioned_at': {e}")))?;

    Ok(BeadHistoryEntry {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| Error::DatabaseError(format!("field 'session_id': {e}")))?,
        bead_id: row
            .try_get("bead_id")
            .map_err(|e| Error::DatabaseError(format!("field 'bead_id': {e}")))?,
        bead_title: row
            .try_get("bead_title")
            .map_err(|e| Error::DatabaseError(format!("field 'bead_title': {e}")))?,
        from_status: row
            .try_get("from_status")
            .map_err(|e| Error::DatabaseError(format!("field 'from_status': {e}")))?,
        to_status: row
            .try_get("to_status")
            .map_err(|e| Error::DatabaseError(format!("field 'to_status': {e}")))?,
        agent_id: row
            .try_get("agent_id")
            .map_err(|e| Error::DatabaseError(format!("field 'agent_id': {e}")))?,
        agent_kind: row
            .try_get("agent_kind")
            .map_err(|e| Error::DatabaseError(format!("field 'agent_kind': {e}")))?,
        agent_name: row
            .try_get("agent_name")
            .map_err(|e| Error::DatabaseError(format!("field 'agent_name': {e}")))?,
        pane: row
            .try_get("pane")
            .map_err(|e| Error::DatabaseError(format!("field 'pane': {e}")))?,
        trigger: row
            .try_get("trigger_kind")
            .map_err(|e| Error::DatabaseError(format!("field 'trigger_kind': {e}")))?,
        reason: row
            .try_get("reason")
            .map_err(|e| Error::DatabaseError(format!("field 'reason': {e}")))?,
        prompt: row
            .try_get("prompt")
            .map_err(|e| Error::DatabaseError(format!("field 'prompt': {e}")))?,
        retry_count: row
            .try_get("retry_count")
            .map_err(|e| Error::DatabaseError(format!("field 'retry_count': {e}")))?,
        transitioned_at: parse_rfc3339(&transitioned_at_str)?,
    })
}

impl StateDb {
    /// Append a transition.
    pub async fn record_history(&self, entry: NewHistoryEntry) -> Result<i64> {
        let mut conn = self.pool().acquire().await.map_err(Error::from)?;
        record_history_tx(&mut conn, entry).await
    }

    /// A bead's full history, oldest first.
    pub async fn history_by_bead(&self, bead_id: &str) -> Result<Vec<BeadHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM bead_history WHERE bead_id = ? ORDER BY transitioned_at, id",
        )
        .bind(bead_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to read history: {e}")))?;

        rows.iter().map(parse_history_row).collect()
    }

    /// A bead's most recent entry, i.e. its current status.
    pub async fn latest_history(&self, bead_id: &str) -> Result<Option<BeadHistoryEntry>> {
        sqlx::query(
            "SELECT * FROM bead_history WHERE bead_id = ?
             ORDER BY transitioned_at DESC, id DESC LIMIT 1",
        )
        .bind(bead_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to read latest history: {e}")))?
        .as_ref()
        .map(parse_history_row)
        .transpose()
    }

    /// A session's recent entries, newest first.
    pub async fn history_by_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<BeadHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM bead_history WHERE session_id = ?
             ORDER BY transitioned_at DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to read session history: {e}")))?;

        rows.iter().map(parse_history_row).collect()
    }

    /// A session's entries with a given target status, newest first.
    pub async fn history_by_status(
        &self,
        session_id: &str,
        to_status: &str,
        limit: i64,
    ) -> Result<Vec<BeadHistoryEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM bead_history WHERE session_id = ? AND to_status = ?
             ORDER BY transitioned_at DESC, id DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(to_status)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to read status history: {e}")))?;

        rows.iter().map(parse_history_row).collect()
    }

    /// Number of recorded transitions for a bead.
    pub async fn history_count(&self, bead_id: &str) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM bead_history WHERE bead_id = ?")
            .bind(bead_id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to count history: {e}")))
    }

    /// Aggregate a session's history into totals, per-status and per-agent
    /// counts, and failure-reason tallies.
    pub async fn history_stats(&self, session_id: &str) -> Result<BeadStats> {
        let entries = {
            let rows = sqlx::query("SELECT * FROM bead_history WHERE session_id = ?")
                .bind(session_id)
                .fetch_all(self.pool())
                .await
                .map_err(|e| Error::DatabaseError(format!("failed to read history: {e}")))?;
            rows.iter()
                .map(parse_history_row)
                .collect::<Result<Vec<_>>>()?
        };

        let mut by_status = HashMap::new();
        let mut by_agent = HashMap::new();
        let mut failure_reasons = HashMap::new();
        for entry in &entries {
            *by_status.entry(entry.to_status.clone()).or_insert(0) += 1;
            if let Some(agent) = &entry.agent_id {
                *by_agent.entry(agent.clone()).or_insert(0) += 1;
            }
            if entry.to_status == "failed" {
                if let Some(reason) = &entry.reason {
                    *failure_reasons.entry(reason.clone()).or_insert(0) += 1;
                }
            }
        }

        Ok(BeadStats {
            total: i64::try_from(entries.len()).unwrap_or(i64::MAX),
            by_status,
            by_agent,
            failure_reasons,
        })
    }
}

/// Transaction-scoped append; the detector commits a history entry together
/// with its task update and event.
pub async fn record_history_tx(
    conn: &mut SqliteConnection,
    entry: NewHistoryEntry,
) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO bead_history (session_id, bead_id, bead_title, from_status, to_status,
                                   agent_id, agent_kind, agent_name, pane, trigger_kind,
                                   reason, prompt, retry_count, transitioned_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.session_id)
    .bind(&entry.bead_id)
    .bind(&entry.bead_title)
    .bind(&entry.from_status)
    .bind(&entry.to_status)
    .bind(&entry.agent_id)
    .bind(&entry.agent_kind)
    .bind(&entry.agent_name)
    .bind(&entry.pane)
    .bind(&entry.trigger)
    .bind(&entry.reason)
    .bind(&entry.prompt)
    .bind(entry.retry_count)
    .bind(super::now_rfc3339())
    .execute(conn)
    .await
    .map_err(|e| Error::DatabaseError(format!("failed to record history: {e}")))?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(bead: &str, to: &str) -> NewHistoryEntry {
        NewHistoryEntry {
            session_id: Some("s1".to_string()),
            bead_id: bead.to_string(),
            to_status: to.to_string(),
            agent_id: Some("ag-1".to_string()),
            trigger: "matcher".to_string(),
            ..NewHistoryEntry::default()
        }
    }

    #[tokio::test]
    async fn test_history_is_append_only_and_ordered() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        db.record_history(entry("bd-1", "assigned")).await?;
        db.record_history(NewHistoryEntry {
            from_status: Some("assigned".to_string()),
            ..entry("bd-1", "working")
        })
        .await?;
        db.record_history(NewHistoryEntry {
            from_status: Some("working".to_string()),
            trigger: "detector:idle".to_string(),
            ..entry("bd-1", "completed")
        })
        .await?;

        let history = db.history_by_bead("bd-1").await?;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].to_status, "assigned");
        assert_eq!(history[2].to_status, "completed");
        assert_eq!(history[0].from_status, None);
        assert_eq!(db.history_count("bd-1").await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_is_current_status() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        db.record_history(entry("bd-1", "assigned")).await?;
        db.record_history(entry("bd-1", "working")).await?;

        let latest = db
            .latest_history("bd-1")
            .await?
            .ok_or_else(|| Error::NotFound("history".into()))?;
        assert_eq!(latest.to_status, "working");
        Ok(())
    }

    #[tokio::test]
    async fn test_latest_ties_break_by_id() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        // Two entries can share a timestamp; the higher id wins.
        db.record_history(entry("bd-1", "assigned")).await?;
        db.record_history(entry("bd-1", "working")).await?;

        let latest = db
            .latest_history("bd-1")
            .await?
            .ok_or_else(|| Error::NotFound("history".into()))?;
        let history = db.history_by_bead("bd-1").await?;
        assert_eq!(
            latest.id,
            history.iter().map(|e| e.id).max().unwrap_or(0)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_by_status_filter() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        db.record_history(entry("bd-1", "completed")).await?;
        db.record_history(entry("bd-2", "failed")).await?;
        db.record_history(entry("bd-3", "completed")).await?;

        let completed = db.history_by_status("s1", "completed", 10).await?;
        assert_eq!(completed.len(), 2);
        assert!(completed.iter().all(|e| e.to_status == "completed"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stats_aggregation() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        db.record_history(entry("bd-1", "completed")).await?;
        db.record_history(NewHistoryEntry {
            agent_id: Some("ag-2".to_string()),
            reason: Some("pane no longer exists".to_string()),
            ..entry("bd-2", "failed")
        })
        .await?;
        db.record_history(NewHistoryEntry {
            reason: Some("pane no longer exists".to_string()),
            ..entry("bd-3", "failed")
        })
        .await?;

        let stats = db.history_stats("s1").await?;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get("completed"), Some(&1));
        assert_eq!(stats.by_status.get("failed"), Some(&2));
        assert_eq!(stats.by_agent.get("ag-1"), Some(&2));
        assert_eq!(stats.by_agent.get("ag-2"), Some(&1));
        assert_eq!(
            stats.failure_reasons.get("pane no longer exists"),
            Some(&2)
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_session_history_limit() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        for n in 0..5 {
            db.record_history(entry(&format!("bd-{n}"), "assigned"))
                .await?;
        }

        let recent = db.history_by_session("s1", 2).await?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].bead_id, "bd-4");
        Ok(())
    }
}
