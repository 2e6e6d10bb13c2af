//! Beads: externally-tracked work units.
//!
//! Beads live in an external tracker; the core only reads them. The optional
//! `br` CLI is probed once, and its absence degrades bead-closed completion
//! detection rather than failing it.

use std::{str::FromStr, sync::OnceLock, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{types::TaskType, Error, Result};

/// An externally-tracked unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bead {
    /// External identifier, e.g. `bd-142`.
    pub id: String,
    pub title: String,
    /// Lower is more urgent; 0 is critical.
    pub priority: i64,
    pub task_type: TaskType,
    /// Bead ids unblocked when this bead completes.
    #[serde(default)]
    pub unblocks: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl Bead {
    /// Convenience constructor; task type inferred from title and labels.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, priority: i64) -> Self {
        let title = title.into();
        let task_type = infer_task_type(&title, &[]);
        Self {
            id: id.into(),
            title,
            priority,
            task_type,
            unblocks: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Replace the unblocks set.
    #[must_use]
    pub fn with_unblocks(mut self, unblocks: Vec<String>) -> Self {
        self.unblocks = unblocks;
        self
    }

    /// Replace the label set, re-inferring the task type.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.task_type = infer_task_type(&self.title, &labels);
        self.labels = labels;
        self
    }
}

/// Keyword table for title-based inference, checked in order.
const TITLE_KEYWORDS: &[(&str, TaskType)] = &[
    ("refactor", TaskType::Refactor),
    ("cleanup", TaskType::Refactor),
    ("analy", TaskType::Analysis),
    ("investigate", TaskType::Analysis),
    ("doc", TaskType::Docs),
    ("readme", TaskType::Docs),
    ("fix", TaskType::Bug),
    ("bug", TaskType::Bug),
    ("crash", TaskType::Bug),
    ("test", TaskType::Testing),
    ("coverage", TaskType::Testing),
    ("feature", TaskType::Feature),
    ("implement", TaskType::Feature),
    ("add ", TaskType::Feature),
    ("chore", TaskType::Chore),
    ("bump", TaskType::Chore),
    ("epic", TaskType::Epic),
];

/// Infer a task type from a bead's title and labels.
///
/// A label that names a task type wins outright; otherwise the first title
/// keyword match decides; otherwise the generic `Task`.
#[must_use]
pub fn infer_task_type(title: &str, labels: &[String]) -> TaskType {
    if let Some(task) = labels
        .iter()
        .find_map(|label| TaskType::from_str(&label.to_lowercase()).ok())
    {
        return task;
    }

    let lowered = title.to_lowercase();
    TITLE_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map_or(TaskType::Task, |&(_, task)| task)
}

/// Status document returned by `br show <id> --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct BeadStatusDoc {
    pub status: String,
}

/// Client for the optional external bead CLI.
#[derive(Debug)]
pub struct BeadClient {
    program: String,
    timeout: Duration,
    available: OnceLock<bool>,
}

impl BeadClient {
    /// Client for the named binary (conventionally `br`).
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
            available: OnceLock::new(),
        }
    }

    /// Whether the bead CLI is installed. Probed once, then cached.
    pub fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| which::which(&self.program).is_ok())
    }

    /// Fetch a bead's status from the external tracker.
    ///
    /// Returns `Ok(None)` when the CLI is not installed (graceful
    /// degradation) or the bead is unknown to it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` past the deadline or `Error::ParseError`
    /// on malformed JSON.
    pub async fn show(&self, bead_id: &str) -> Result<Option<BeadStatusDoc>> {
        if !self.is_available() {
            return Ok(None);
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(["show", bead_id, "--json"])
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(format!("bead show {bead_id} exceeded {:?}", self.timeout)))?
        .map_err(|e| Error::Command(format!("failed to execute {}: {e}", self.program)))?;

        if !output.status.success() {
            // Unknown bead or tracker hiccup; no signal either way.
            return Ok(None);
        }

        let doc: BeadStatusDoc = serde_json::from_slice(&output.stdout)
            .map_err(|e| Error::ParseError(format!("bead show {bead_id}: {e}")))?;
        Ok(Some(doc))
    }

    /// Whether the external tracker reports the bead closed.
    ///
    /// # Errors
    ///
    /// Propagates `show` errors; absence of the CLI is `Ok(false)`.
    pub async fn is_closed(&self, bead_id: &str) -> Result<bool> {
        Ok(self
            .show(bead_id)
            .await?
            .is_some_and(|doc| doc.status.eq_ignore_ascii_case("closed")))
    }
}
