//! Advisory file reservations.
//!
//! A reservation records that an agent intends to modify files matching a
//! glob for a bounded time. Nothing is enforced at the filesystem level;
//! callers that respect the advisory obtain mutual exclusion. Exclusive
//! reservations refuse to coexist with any overlapping active reservation.

use sqlx::Row;

use super::{now_rfc3339, parse_rfc3339, StateDb};
use crate::{Error, Result};

/// A stored reservation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Reservation {
    pub id: i64,
    pub session_id: String,
    pub agent_id: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub correlation_id: Option<String>,
    pub reason: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub released_at: Option<chrono::DateTime<chrono::Utc>>,
    pub force_released_by: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Reservation {
    /// Active = unreleased and not yet expired.
    #[must_use]
    pub fn is_active(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }
}

/// Input for creating a reservation.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub session_id: String,
    pub agent_id: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub correlation_id: Option<String>,
    pub reason: Option<String>,
    pub ttl: chrono::Duration,
}

// ═══════════════════════════════════════════════════════════════════════════
// PATTERN OVERLAP (pure)
// ═══════════════════════════════════════════════════════════════════════════

/// Wildcard match: `*` spans any run of characters, `?` exactly one.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    // Classic two-pointer glob walk with backtracking to the last star.
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Literal prefix of a pattern: everything before the first wildcard.
fn literal_prefix(pattern: &str) -> &str {
    pattern
        .find(['*', '?'])
        .map_or(pattern, |idx| &pattern[..idx])
}

/// Whether two path patterns can name a common path.
///
/// Approximate but safe in one direction: identical patterns always
/// overlap, and the check errs toward reporting a conflict. Each pattern is
/// matched against the other's literal text, then literal prefixes are
/// compared for containment (so `src/*` and `src/io/?.rs` collide).
#[must_use]
pub fn patterns_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    if wildcard_match(a, b) || wildcard_match(b, a) {
        return true;
    }
    let (pa, pb) = (literal_prefix(a), literal_prefix(b));
    // Two globs with nested literal prefixes can always collide; a literal
    // path against a glob was already decided by the match above.
    if pa.len() != a.len() && pb.len() != b.len() {
        return pa.starts_with(pb) || pb.starts_with(pa);
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════

fn parse_reservation_row(row: &sqlx::sqlite::SqliteRow) -> Result<Reservation> {
    let expires_at_str: String = row
        .try_get("expires_at")
        .map_err(|e| Error::DatabaseError(format!("field 'expires_at': {e}")))?;
    let released_at_str: Option<String> = row
        .try_get("released_at")
        .map_err(|e| Error::DatabaseError(format!("field 'released_at': {e}")))?;
    let created_at_str: String = row
        .try_get("created_at")
        .map_err(|e| Error::DatabaseError(format!("field 'created_at': {e}")))?;
    let exclusive: i64 = row
        .try_get("exclusive")
        .map_err(|e| Error::DatabaseError(format!("field 'exclusive': {e}")))?;

    Ok(Reservation {
        id: row
            .try_get("id")
            .map_err(|e| Error::DatabaseError(format!("field 'id': {e}")))?,
        session_id: row
            .try_get("session_id")
            .map_err(|e| Error::DatabaseError(format!("field 'session_id': {e}")))?,
        agent_id: row
            .try_get("agent_id")
            .map_err(|e| Error::DatabaseError(format!("field 'agent_id': {e}")))?,
        path_pattern: row
            .try_get("path_pattern")
            .map_err(|e| Error::DatabaseError(format!("field 'path_pattern': {e}")))?,
        exclusive: exclusive != 0,
        correlation_id: row
            .try_get("correlation_id")
            .map_err(|e| Error::DatabaseError(format!("field 'correlation_id': {e}")))?,
        reason: row
            .try_get("reason")
            .map_err(|e| Error::DatabaseError(format!("field 'reason': {e}")))?,
        expires_at: parse_rfc3339(&expires_at_str)?,
        released_at: released_at_str.as_deref().map(parse_rfc3339).transpose()?,
        force_released_by: row
            .try_get("force_released_by")
            .map_err(|e| Error::DatabaseError(format!("field 'force_released_by': {e}")))?,
        created_at: parse_rfc3339(&created_at_str)?,
    })
}

impl StateDb {
    /// Create a reservation, refusing exclusivity conflicts.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReservationConflict` when the new reservation is
    /// exclusive and overlaps any active reservation, or is shared and
    /// overlaps an active exclusive one.
    pub async fn create_reservation(&self, new: NewReservation) -> Result<Reservation> {
        let now = chrono::Utc::now();
        let active = self.list_reservations(&new.session_id, true).await?;
        let conflict = active.iter().find(|existing| {
            (new.exclusive || existing.exclusive)
                && patterns_overlap(&existing.path_pattern, &new.path_pattern)
        });
        if let Some(existing) = conflict {
            return Err(Error::ReservationConflict(format!(
                "pattern '{}' overlaps active reservation {} ('{}')",
                new.path_pattern, existing.id, existing.path_pattern
            )));
        }

        let created_at = now_rfc3339();
        let expires_at = (now + new.ttl).to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO reservations (session_id, agent_id, path_pattern, exclusive,
                                       correlation_id, reason, expires_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&new.session_id)
        .bind(&new.agent_id)
        .bind(&new.path_pattern)
        .bind(i64::from(new.exclusive))
        .bind(&new.correlation_id)
        .bind(&new.reason)
        .bind(&expires_at)
        .bind(&created_at)
        .execute(self.pool())
        .await
        .map_err(Error::from)?;

        Ok(Reservation {
            id: result.last_insert_rowid(),
            session_id: new.session_id,
            agent_id: new.agent_id,
            path_pattern: new.path_pattern,
            exclusive: new.exclusive,
            correlation_id: new.correlation_id,
            reason: new.reason,
            expires_at: parse_rfc3339(&expires_at)?,
            released_at: None,
            force_released_by: None,
            created_at: parse_rfc3339(&created_at)?,
        })
    }

    /// Fetch a reservation by id; `None` when absent.
    pub async fn get_reservation(&self, id: i64) -> Result<Option<Reservation>> {
        sqlx::query("SELECT * FROM reservations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| Error::DatabaseError(format!("failed to get reservation: {e}")))?
            .as_ref()
            .map(parse_reservation_row)
            .transpose()
    }

    /// Reservations of a session; `active_only` keeps unreleased, unexpired
    /// ones.
    pub async fn list_reservations(
        &self,
        session_id: &str,
        active_only: bool,
    ) -> Result<Vec<Reservation>> {
        let rows = if active_only {
            sqlx::query(
                "SELECT * FROM reservations
                 WHERE session_id = ? AND released_at IS NULL AND expires_at > ?
                 ORDER BY id",
            )
            .bind(session_id)
            .bind(now_rfc3339())
            .fetch_all(self.pool())
            .await
        } else {
            sqlx::query("SELECT * FROM reservations WHERE session_id = ? ORDER BY id")
                .bind(session_id)
                .fetch_all(self.pool())
                .await
        }
        .map_err(|e| Error::DatabaseError(format!("failed to list reservations: {e}")))?;

        rows.iter().map(parse_reservation_row).collect()
    }

    /// Release a reservation.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown id and
    /// `Error::AlreadyReleased` for a double release.
    pub async fn release_reservation(&self, id: i64, forced_by: Option<&str>) -> Result<()> {
        let existing = self
            .get_reservation(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reservation {id}")))?;
        if existing.released_at.is_some() {
            return Err(Error::AlreadyReleased(format!("reservation {id}")));
        }

        sqlx::query(
            "UPDATE reservations SET released_at = ?, force_released_by = ? WHERE id = ?",
        )
        .bind(now_rfc3339())
        .bind(forced_by)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::DatabaseError(format!("failed to release reservation: {e}")))?;
        Ok(())
    }

    /// Active exclusive reservations whose pattern matches a candidate path.
    pub async fn find_reservation_conflicts(
        &self,
        session_id: &str,
        candidate_path: &str,
    ) -> Result<Vec<Reservation>> {
        let active = self.list_reservations(session_id, true).await?;
        Ok(active
            .into_iter()
            .filter(|r| r.exclusive && patterns_overlap(&r.path_pattern, candidate_path))
            .collect())
    }
}
