//! Approval gates for destructive operations.
//!
//! An approval must be granted before the orchestrator performs anything
//! destructive (killing panes, force-releasing reservations). The
//! `requires_slb` flag (Stop-Look-Broadcast) enforces separation of duties:
//! the requester may not approve their own request. Expiry is enforced both
//! on read and by a periodic sweep.

use sqlx::Row;

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{types::ApprovalStatus, Error, Result};

/// A stored approval request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Approval {
    pub id: i64,
    pub action: String,
    pub resource: String,
    pub reason: String,
    pub requester: String,
    pub requires_slb: bool,
    /// When set, only these names may approve.
    pub allowed_approvers: Option<Vec<String>>,
    pub status: ApprovalStatus,
    pub approver: Option<String>,
    pub approved_at: Option<chrono::DateTime<chrono::Utc>>,
    pub deny_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Input for requesting an approval.
#[derive(Debug, Clone)]
pub struct NewApproval {
    pub action: String,
    pub resource: String,
    pub reason: String,
    pub requester: String,
    pub requires_slb: bool,
    pub allowed_approvers: Option<Vec<String>>,
    pub ttl: chrono::Duration,
}

fn parse_approval_row(row: &sqlx::sqlite::SqliteRow) -> Result<Approval> {
    let status_str: String = row
        .try_get("status")
        .map_err(|e| Error::DatabaseError(format!("field 'status': {e}")))?;
    let requires_slb: i64 = row
        .try_get("requires_slb")
        .map_err(|e| Error::DatabaseError(format!("field 'requires_slb': {e}")))?;
    let allowed_str: Option<String> = row
        .try_get("allowed_approvers")
        .map_err(|e| Error::DatabaseError(format!("field 'allowed_approvers': {e}")))?;
    let allowed_approvers = allowed_str
        .map(|s| serde_json::from_str::<Vec<String>>(&s))
        .transpose()
        .map_err(|e| Error::ParseError(format!("invalid allowed_approvers: {e}")))?;
    let created_at_str: String = row
        .try_get("created_at")
        .map_err(|e| Error::DatabaseError(format!("field 'created_at': {e}")))?;
    let expires_at_str: String = row
        .try_get("expires_at")
        .map_err(|e| Error::DatabaseError(format!("field 'expires_at': {e}")))?;
    let approved_at_str: Option<String> = row
        .try_get("approved_at")
        .map_err(|e| Error::DatabaseError(format!("field 'approved_at': {e}")))?;

    Ok(Approval {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        action: row
            .try_get("action")
            .map_err(|e| Error::DatabaseError(format!("field 'action': {e}")))?,
        resource: row
            .try_get("resource")
            .map_err(|e| Error::DatabaseError(format!("field 'resource': {e}")))?,
        reason: row
            .try_get("reason")
            .map_err(|e| Error::DatabaseError(format!("field 'reason': {e}")))?,
        requester: row
            .try_get("requester")
            .map_err(|e| Error::DatabaseError(format!("field 'requester': {e}")))?,
        requires_slb: requires_slb != 0,
        allowed_approvers,
        status: status_str
            .parse()
            .map_err(|_| Error::ParseError(format!("invalid approval status '{status_str}'")))?,
        approver: row
            .try_get("approver")
            .map_err(|e| Error::DatabaseError(format!("field 'approver': {e}")))?,
        approved_at: approved_at_str.as_deref().map(parse_rfc3339).transpose()?,
        deny_reason: row
            .try_get("deny_reason")
            .map_err(|e| Error::DatabaseError(format!("field 'deny_reason': {e}")))?,
        created_at: parse_rfc3339(&created_at_str)?,
        expires_at: parse_rfc3339(&expires_at_str)?,
    })
}

impl StateDb {
    /// Request an approval; it starts `pending`.
    pub async fn create_approval(&self, new: NewApproval) -> Result<Approval> {
        let created_at = now_rfc3339();
        let expires_at = (chrono::Utc::now() + new.ttl).to_rfc3339();
        let allowed_json = new
            .allowed_approvers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| Error::ParseError(format!("failed to encode approvers: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO approvals (action, resource, reason, requester, requires_slb,
                                    allowed_approvers, status, created_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(&new.action)
        .bind(&new.resource)
        .bind(&new.reason)
        .bind(&new.requester)
        .bind(i64::from(new.requires_slb))
        .bind(&allowed_json)
        .bind(&created_at)
        .bind(&expires_at)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(Approval {
            id: result.last_insert_rowid(),
            action: new.action,
            resource: new.resource,
            reason: new.reason,
            requester: new.requester,
            requires_slb: new.requires_slb,
            allowed_approvers: new.allowed_approvers,
            status: ApprovalStatus::Pending,
            approver: None,
            approved_at: None,
            deny_reason: None,
            created_at: parse_rfc3339(&created_at)?,
            expires_at: parse_rfc3339(&expires_at)?,
        })
    }

    /// Fetch an approval by id, enforcing expiry on read: a pending
    /// approval past its deadline is flipped to `expired` before being
    /// returned.
    pub async fn get_approval(&self, id: i64) -> Result<Option<Approval>> {
        let approval = sqlx::query("SELECT * FROM approvals WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get approval: {e}")))?
            .as_ref()
            .map(parse_approval_row)
            .transpose()?;

        match approval {
            Some(approval)
                if approval.status == ApprovalStatus::Pending
                    && approval.expires_at <= chrono::Utc::now() =>
            {
                sqlx::query("UPDATE approvals SET status = 'expired' WHERE id = ?")
                    .bind(id)
                    .execute(self.pool())
                    .await
                    .map_err(Error::from)?;
                Ok(Some(Approval {
                    status: ApprovalStatus::Expired,
                    ..approval
                }))
            }
            other => Ok(other),
        }
    }

    /// Approvals still pending and not yet expired.
    pub async fn list_pending_approvals(&self) -> Result<Vec<Approval>> {
        let rows = sqlx::query(
            "SELECT * FROM approvals
             WHERE status = 'pending' AND expires_at > ? ORDER BY id",
        )
        .bind(now_rfc3339())
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to list approvals: {e}")))?;

        rows.iter().map(parse_approval_row).collect()
    }

    /// Grant an approval.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` for an unknown id.
    /// - `Error::Expired` when the deadline passed.
    /// - `Error::NoLongerPending` after a prior approve/deny.
    /// - `Error::SelfApprovalForbidden` when `requires_slb` and the
    ///   approver is the requester.
    /// - `Error::ApproverNotAllowed` when an allowlist excludes the
    ///   approver.
    pub async fn approve(&self, id: i64, approver: &str) -> Result<Approval> {
        let approval = self
            .get_approval(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval {id}")))?;

        match approval.status {
            ApprovalStatus::Expired => return Err(Error::Expired(format!("approval {id}"))),
            ApprovalStatus::Approved | ApprovalStatus::Denied => {
                return Err(Error::NoLongerPending(id.to_string()))
            }
            ApprovalStatus::Pending => {}
        }
        if approval.requires_slb && approval.requester == approver {
            return Err(Error::SelfApprovalForbidden(id.to_string()));
        }
        if let Some(allowed) = &approval.allowed_approvers {
            if !allowed.iter().any(|name| name == approver) {
                return Err(Error::ApproverNotAllowed {
                    id: id.to_string(),
                    approver: approver.to_string(),
                });
            }
        }

        let approved_at = now_rfc3339();
        sqlx::query(
            "UPDATE approvals SET status = 'approved', approver = ?, approved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(approver)
        .bind(&approved_at)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(Approval {
            status: ApprovalStatus::Approved,
            approver: Some(approver.to_string()),
            approved_at: Some(parse_rfc3339(&approved_at)?),
            ..approval
        })
    }

    /// Deny an approval.
    ///
    /// # Errors
    ///
    /// Same preconditions as `approve`, minus the SLB and allowlist checks
    /// (anyone may deny).
    pub async fn deny(&self, id: i64, approver: &str, reason: &str) -> Result<Approval> {
        let approval = self
            .get_approval(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval {id}")))?;

        match approval.status {
            ApprovalStatus::Expired => return Err(Error::Expired(format!("approval {id}"))),
            ApprovalStatus::Approved | ApprovalStatus::Denied => {
                return Err(Error::NoLongerPending(id.to_string()))
            }
            ApprovalStatus::Pending => {}
        }

        sqlx::query(
            "UPDATE approvals SET status = 'denied', approver = ?, deny_reason = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(approver)
        .bind(reason)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(Approval {
            status: ApprovalStatus::Denied,
            approver: Some(approver.to_string()),
            deny_reason: Some(reason.to_string()),
            ..approval
        })
    }

    /// Sweep: flip every overdue pending approval to `expired`.
    ///
    /// Returns the number of approvals expired.
    pub async fn expire_due_approvals(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE approvals SET status = 'expired'
             WHERE status = 'pending' AND expires_at <= ?",
        )
        .bind(now_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to expire approvals: {e}")))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(requires_slb: bool) -> NewApproval {
        NewApproval {
            action: "kill-pane".to_string(),
            resource: "main:0.2".to_string(),
            reason: "agent wedged".to_string(),
            requester: "alice".to_string(),
            requires_slb,
            allowed_approvers: None,
            ttl: chrono::Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn test_create_starts_pending() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(false)).await?;
        assert_eq!(approval.status, ApprovalStatus::Pending);

        let pending = db.list_pending_approvals().await?;
        assert_eq!(pending.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_by_other_user() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(true)).await?;

        let approved = db.approve(approval.id, "bob").await?;
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.approver.as_deref(), Some("bob"));
        assert!(approved.approved_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_self_approval_forbidden_with_slb() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(true)).await?;

        let result = db.approve(approval.id, "alice").await;
        assert!(matches!(result, Err(Error::SelfApprovalForbidden(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_self_approval_allowed_without_slb() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(false)).await?;

        let result = db.approve(approval.id, "alice").await;
        assert!(result.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_allowlist_excludes_outsiders() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db
            .create_approval(NewApproval {
                allowed_approvers: Some(vec!["carol".to_string()]),
                ..request(false)
            })
            .await?;

        let result = db.approve(approval.id, "mallory").await;
        assert!(matches!(result, Err(Error::ApproverNotAllowed { .. })));

        let result = db.approve(approval.id, "carol").await;
        assert!(result.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_approve_after_deny_rejected() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(false)).await?;
        db.deny(approval.id, "bob", "too risky").await?;

        let result = db.approve(approval.id, "bob").await;
        assert!(matches!(result, Err(Error::NoLongerPending(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_double_approve_rejected() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(false)).await?;
        db.approve(approval.id, "bob").await?;

        let result = db.approve(approval.id, "carol").await;
        assert!(matches!(result, Err(Error::NoLongerPending(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_expiry_enforced_on_read() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db
            .create_approval(NewApproval {
                ttl: chrono::Duration::seconds(-5),
                ..request(false)
            })
            .await?;

        let fetched = db
            .get_approval(approval.id)
            .await?
            .ok_or_else(|| Error::NotFound("approval".into()))?;
        assert_eq!(fetched.status, ApprovalStatus::Expired);

        let result = db.approve(approval.id, "bob").await;
        assert!(matches!(result, Err(Error::Expired(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_expire_sweep_counts() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        db.create_approval(NewApproval {
            ttl: chrono::Duration::seconds(-5),
            ..request(false)
        })
        .await?;
        db.create_approval(request(false)).await?;

        let expired = db.expire_due_approvals().await?;
        assert_eq!(expired, 1);

        let pending = db.list_pending_approvals().await?;
        assert_eq!(pending.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_deny_records_reason() -> Result<()> {
        let db = StateDb::open_in_memory().await?;
        let approval = db.create_approval(request(false)).await?;
        let denied = db.deny(approval.id, "bob", "not during release week").await?;

        assert_eq!(denied.status, ApprovalStatus::Denied);
        assert_eq!(denied.deny_reason.as_deref(), Some("not during release week"));
        Ok(())
    }
}
